/// `load_config` module: loads the static YAML pipeline config and merges
/// environment overrides into a [`LoadedConfig`].
///
/// The YAML file never holds secrets. The GitHub token lives encrypted on
/// disk (see `secrets.token_file`) and Kaggle credentials come from the
/// environment or `kaggle.json`. Only the API base URLs may be overridden
/// from the environment (`GITHUB_API_URL`, `KAGGLE_API_URL`), which is how
/// tests and enterprise hosts point the pipeline elsewhere.
///
/// # Errors
/// All errors use `anyhow::Error` and name the file or variable at fault.
use anyhow::Result;
use dataset_pipeline_core::config::PipelineConfig;
use dataset_pipeline_core::download::DEFAULT_KAGGLE_API;
use dataset_pipeline_core::preprocess::CleanConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    pub dataset: DatasetSection,
    pub github: GitHubSection,
    #[serde(default)]
    pub secrets: SecretsSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub transform: TransformSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Deserialize)]
pub struct DatasetSection {
    #[serde(default = "default_dataset")]
    pub name: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            name: default_dataset(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSection {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_original_path")]
    pub original_path: String,
    #[serde(default = "default_processed_path")]
    pub processed_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SecretsSection {
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

impl Default for SecretsSection {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            token_file: default_token_file(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccessSection {
    #[serde(default = "default_roles_file")]
    pub roles_file: PathBuf,
    #[serde(default = "default_role")]
    pub default_role: String,
}

impl Default for AccessSection {
    fn default() -> Self {
        Self {
            roles_file: default_roles_file(),
            default_role: default_role(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransformSection {
    #[serde(default = "default_sensitive_column")]
    pub sensitive_column: String,
    #[serde(flatten)]
    pub clean: CleanConfig,
}

impl Default for TransformSection {
    fn default() -> Self {
        Self {
            sensitive_column: default_sensitive_column(),
            clean: CleanConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_dataset() -> String {
    "dnkumars/cybersecurity-intrusion-detection-dataset".to_string()
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_original_path() -> String {
    "datos/dataset_original.csv".to_string()
}
fn default_processed_path() -> String {
    "datos/dataset_procesado.csv".to_string()
}
fn default_key_file() -> PathBuf {
    PathBuf::from("secret.key")
}
fn default_token_file() -> PathBuf {
    PathBuf::from("github_token.enc")
}
fn default_roles_file() -> PathBuf {
    PathBuf::from("roles.json")
}
fn default_role() -> String {
    "admin".to_string()
}
fn default_sensitive_column() -> String {
    "session_id".to_string()
}

/// Connection settings for the GitHub contents API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubSettings {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

/// The fully merged configuration used by the `run` command.
#[derive(Debug)]
pub struct LoadedConfig {
    pub pipeline: PipelineConfig,
    pub github: GitHubSettings,
    pub kaggle_api: String,
    pub key_file: PathBuf,
    pub token_file: PathBuf,
    pub roles_file: PathBuf,
}

/// Parses the YAML file without touching the environment.
pub fn read_cli_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    match serde_yaml::from_str::<CliConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Loads the YAML config and applies environment overrides. `role`
/// replaces `access.default_role` when given.
pub fn load_config<P: AsRef<Path>>(path: P, role: Option<&str>) -> Result<LoadedConfig> {
    let raw = read_cli_config(path)?;

    if raw.github.owner.trim().is_empty() || raw.github.repo.trim().is_empty() {
        error!("github.owner and github.repo must be non-empty");
        anyhow::bail!("github.owner and github.repo must be non-empty");
    }

    let github_api = env_or("GITHUB_API_URL", DEFAULT_GITHUB_API);
    let kaggle_api = env_or("KAGGLE_API_URL", DEFAULT_KAGGLE_API);

    let pipeline = PipelineConfig {
        dataset: raw.dataset.name,
        work_dir: raw.dataset.work_dir,
        output_dir: raw.output.dir,
        original_path: raw.github.original_path,
        processed_path: raw.github.processed_path,
        branch: raw.github.branch.clone(),
        sensitive_column: raw.transform.sensitive_column,
        clean: raw.transform.clean,
        role: role
            .map(str::to_owned)
            .unwrap_or(raw.access.default_role),
    };
    pipeline.trace_loaded();

    let github = GitHubSettings {
        api_base: github_api,
        owner: raw.github.owner,
        repo: raw.github.repo,
        branch: raw.github.branch,
    };
    info!(
        owner = %github.owner,
        repo = %github.repo,
        api_base = %github.api_base,
        "Config loaded and merged successfully"
    );

    Ok(LoadedConfig {
        pipeline,
        github,
        kaggle_api,
        key_file: raw.secrets.key_file,
        token_file: raw.secrets.token_file,
        roles_file: raw.access.roles_file,
    })
}

fn env_or(var: &str, default: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            info!(var, value = %value, "Using API base from environment");
            value
        }
        _ => default.to_string(),
    }
}
