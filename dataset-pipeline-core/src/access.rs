use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

/// Access level that permits running the pipeline.
pub const FULL_ACCESS: &str = "full";

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("failed to read roles file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse roles file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleEntry {
    pub access_level: String,
}

/// Role name to access level, as stored in `roles.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RoleRegistry {
    roles: HashMap<String, RoleEntry>,
}

impl RoleRegistry {
    pub fn load(path: &Path) -> Result<Self, AccessError> {
        let text = std::fs::read_to_string(path).map_err(|source| AccessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry: Self = serde_json::from_str(&text).map_err(|source| AccessError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), roles = registry.roles.len(), "Loaded role registry");
        Ok(registry)
    }

    pub fn from_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            roles: roles
                .into_iter()
                .map(|(role, level)| {
                    (
                        role.into(),
                        RoleEntry {
                            access_level: level.into(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn is_allowed(&self, role: &str) -> bool {
        match self.roles.get(role) {
            Some(entry) if entry.access_level == FULL_ACCESS => {
                debug!(role, "Role has full access");
                true
            }
            Some(entry) => {
                warn!(role, access_level = %entry.access_level, "Role lacks full access");
                false
            }
            None => {
                warn!(role, "Unknown role");
                false
            }
        }
    }
}
