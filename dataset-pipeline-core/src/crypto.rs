//! Fernet-based protection for sensitive columns and the stored API token.
//!
//! Keys and tokens use the standard Fernet text encoding, so files written
//! by other Fernet implementations can be read here and the other way round.

use std::path::{Path, PathBuf};

use fernet::Fernet;
use tracing::{debug, error, info};

use crate::table::Table;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to access key file {path}: {source}")]
    KeyIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key file {0} does not contain a valid Fernet key")]
    InvalidKey(PathBuf),
    #[error("encrypted token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("failed to access token file {path}: {source}")]
    TokenIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decryption failed: token is invalid or was made with another key")]
    Decrypt,
    #[error("decrypted value is not valid UTF-8")]
    NotUtf8,
}

/// Loads the Fernet key from disk, creating it on first use.
pub struct KeyStore;

impl KeyStore {
    /// Reads an existing key. A missing file is an error.
    pub fn load(path: &Path) -> Result<ColumnCipher, CryptoError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CryptoError::KeyIo {
            path: path.to_path_buf(),
            source,
        })?;
        let cipher = ColumnCipher::from_key(raw.trim())
            .ok_or_else(|| CryptoError::InvalidKey(path.to_path_buf()))?;
        info!(path = %path.display(), "Loaded encryption key");
        Ok(cipher)
    }

    pub fn load_or_generate(path: &Path) -> Result<ColumnCipher, CryptoError> {
        if path.exists() {
            return Self::load(path);
        }

        let key = Fernet::generate_key();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CryptoError::KeyIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, &key).map_err(|source| {
            error!(error = ?source, path = %path.display(), "Failed to write new encryption key");
            CryptoError::KeyIo {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(path = %path.display(), "Generated new encryption key");
        ColumnCipher::from_key(&key).ok_or_else(|| CryptoError::InvalidKey(path.to_path_buf()))
    }
}

pub struct ColumnCipher {
    fernet: Fernet,
}

impl ColumnCipher {
    /// Returns `None` when `key` is not 32 bytes of url-safe base64.
    pub fn from_key(key: &str) -> Option<Self> {
        Fernet::new(key).map(|fernet| Self { fernet })
    }

    pub fn encrypt_str(&self, value: &str) -> String {
        self.fernet.encrypt(value.as_bytes())
    }

    pub fn decrypt_str(&self, token: &str) -> Result<String, CryptoError> {
        let bytes = self
            .fernet
            .decrypt(token.trim())
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::NotUtf8)
    }

    /// Encrypts every present cell of `column`. A missing column is a no-op.
    pub fn encrypt_column(&self, table: &mut Table, column: &str) -> usize {
        let result: Result<Option<usize>, CryptoError> =
            table.map_column(column, |v| Ok(self.encrypt_str(v)));
        let count = result.ok().flatten().unwrap_or(0);
        debug!(column, count, "Encrypted column");
        count
    }

    pub fn decrypt_column(&self, table: &mut Table, column: &str) -> Result<usize, CryptoError> {
        let count = table
            .map_column(column, |v| self.decrypt_str(v))?
            .unwrap_or(0);
        debug!(column, count, "Decrypted column");
        Ok(count)
    }
}

/// Reads and decrypts the API token stored at `path`.
pub fn load_encrypted_token(path: &Path, cipher: &ColumnCipher) -> Result<String, CryptoError> {
    if !path.exists() {
        error!(path = %path.display(), "Encrypted token file not found");
        return Err(CryptoError::TokenNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|source| CryptoError::TokenIo {
        path: path.to_path_buf(),
        source,
    })?;
    let token = cipher.decrypt_str(&raw)?;
    debug!(path = %path.display(), "Decrypted stored token");
    Ok(token.trim().to_owned())
}

pub fn write_encrypted_token(
    path: &Path,
    cipher: &ColumnCipher,
    token: &str,
) -> Result<(), CryptoError> {
    std::fs::write(path, cipher.encrypt_str(token)).map_err(|source| CryptoError::TokenIo {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Encrypted token written");
    Ok(())
}
