///
/// This module implements the CLI for dataset-pipeline: command parsing,
/// wiring of real clients from config, and user-visible output.
///
/// All pipeline logic (table handling, cleaning, encryption, orchestration)
/// lives in the [`dataset-pipeline-core`] crate. This module only builds the
/// concrete downloader and publisher and hands them over.
///
/// ## Commands
/// - `run`: execute the full download → encrypt → publish → clean → publish pipeline.
/// - `encrypt-token`: store a GitHub token encrypted with the pipeline key.
/// - `decrypt-column`: decrypt a protected column of a CSV snapshot.
///
/// [`dataset-pipeline-core`]: ../../dataset-pipeline-core/
use crate::load_config::{load_config, GitHubSettings, LoadedConfig};
use crate::upload::GitHubClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dataset_pipeline_core::access::RoleRegistry;
use dataset_pipeline_core::contract::{BoxError, Connection, Connector};
use dataset_pipeline_core::crypto::{self, KeyStore};
use dataset_pipeline_core::download::{KaggleCredentials, KaggleDownloader};
use dataset_pipeline_core::pipeline::run_pipeline;
use dataset_pipeline_core::table::Table;
use std::io::Write;
use std::path::PathBuf;

/// CLI for dataset-pipeline: prepare and publish intrusion-detection dataset snapshots.
#[derive(Parser)]
#[clap(
    name = "dataset-pipeline",
    version,
    about = "Download, protect, clean and publish an intrusion-detection dataset"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline using the given config file
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Role to check against the roles file (defaults to access.default_role)
        #[clap(long)]
        role: Option<String>,
    },
    /// Encrypt a GitHub token with the pipeline key and store it on disk
    EncryptToken {
        /// Fernet key file; generated when missing
        #[clap(long, default_value = "secret.key")]
        key_file: PathBuf,
        /// Where to write the encrypted token
        #[clap(long, default_value = "github_token.enc")]
        out: PathBuf,
        /// Token to encrypt
        #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Decrypt an encrypted column of a CSV file
    DecryptColumn {
        /// CSV file to read
        #[clap(long)]
        input: PathBuf,
        /// Column holding encrypted values
        #[clap(long, default_value = "session_id")]
        column: String,
        /// Fernet key file the column was encrypted with
        #[clap(long, default_value = "secret.key")]
        key_file: PathBuf,
        /// Output CSV; stdout when omitted
        #[clap(long)]
        output: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config, role } => run_command(config, role).await,
        Commands::EncryptToken {
            key_file,
            out,
            token,
        } => encrypt_token_command(key_file, out, &token),
        Commands::DecryptColumn {
            input,
            column,
            key_file,
            output,
        } => decrypt_column_command(input, &column, key_file, output),
    }
}

/// Builds the real clients from on-disk secrets. Only invoked by the
/// pipeline once the role check has passed.
pub struct SecretsConnector {
    pub key_file: PathBuf,
    pub token_file: PathBuf,
    pub kaggle_api: String,
    pub github: GitHubSettings,
}

impl SecretsConnector {
    pub fn from_config(config: &LoadedConfig) -> Self {
        Self {
            key_file: config.key_file.clone(),
            token_file: config.token_file.clone(),
            kaggle_api: config.kaggle_api.clone(),
            github: config.github.clone(),
        }
    }
}

impl Connector for SecretsConnector {
    fn connect(&self) -> Result<Connection, BoxError> {
        let cipher = KeyStore::load_or_generate(&self.key_file)?;
        let credentials = KaggleCredentials::discover()?;
        let downloader = KaggleDownloader::new(self.kaggle_api.clone(), credentials);

        let token = crypto::load_encrypted_token(&self.token_file, &cipher)?;
        let publisher = GitHubClient::new(self.github.clone(), &token)?;
        tracing::info!(
            key_file = %self.key_file.display(),
            token_file = %self.token_file.display(),
            "Credentials resolved and clients built"
        );

        Ok(Connection {
            cipher,
            downloader: Box::new(downloader),
            publisher: Box::new(publisher),
        })
    }
}

async fn run_command(config: PathBuf, role: Option<String>) -> Result<()> {
    let config = load_config(&config, role.as_deref())?;
    tracing::info!(command = "run", "Starting data pipeline");

    let roles = RoleRegistry::load(&config.roles_file)?;
    let connector = SecretsConnector::from_config(&config);

    let report = run_pipeline(&config.pipeline, &roles, &connector).await;
    println!("{}", report.log.render());

    if report.is_success() {
        tracing::info!(
            command = "run",
            rows_loaded = report.rows_loaded,
            rows_after_clean = report.rows_after_clean,
            uploads = report.uploads.len(),
            "Pipeline complete"
        );
        Ok(())
    } else {
        let reason = report
            .error
            .clone()
            .unwrap_or_else(|| "one or more uploads were rejected".to_string());
        tracing::error!(command = "run", error = %reason, "Pipeline failed");
        Err(anyhow::Error::msg(reason))
    }
}

fn encrypt_token_command(key_file: PathBuf, out: PathBuf, token: &str) -> Result<()> {
    if token.trim().is_empty() {
        anyhow::bail!("Refusing to encrypt an empty token");
    }
    let cipher = KeyStore::load_or_generate(&key_file)?;
    crypto::write_encrypted_token(&out, &cipher, token.trim())?;
    println!("GitHub token encrypted and saved to {}.", out.display());
    Ok(())
}

fn decrypt_column_command(
    input: PathBuf,
    column: &str,
    key_file: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let cipher = KeyStore::load(&key_file)?;
    let mut table = Table::read_csv(&input)?;
    if !table.has_column(column) {
        anyhow::bail!("Column '{column}' not found in {}", input.display());
    }
    let count = cipher
        .decrypt_column(&mut table, column)
        .with_context(|| format!("Failed to decrypt column '{column}'"))?;
    tracing::info!(column, count, "Decrypted column values");

    match output {
        Some(path) => table.write_csv(&path)?,
        None => {
            let bytes = table.to_csv_bytes()?;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}
