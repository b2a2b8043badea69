//! High-level pipeline: orchestrates download → encrypt → publish → clean → publish.
//!
//! The run is strictly sequential and fail-fast inside a single error
//! boundary: the first failing step stops the run, the failure is logged
//! and stored on the [`PipelineReport`], and the accumulated run log is
//! returned either way. Callers decide what a failed report means for them
//! (the CLI turns it into a non-zero exit).
//!
//! # Steps
//! 1. Access check against the [`RoleRegistry`]; a denied role ends the
//!    run before any secret is read or any network traffic happens.
//! 2. Resolve keys and credentials through a [`Connector`].
//! 3. Download the dataset archive through a [`Downloader`].
//! 4. Load every extracted CSV file into one [`Table`].
//! 5. Encrypt the sensitive column, if present.
//! 6. Publish the "original" snapshot through a [`Publisher`].
//! 7. Clean a copy (drop columns, drop incomplete rows, label-encode).
//! 8. Publish the "processed" snapshot.
//!
//! A write the remote rejects ([`PublishRejected`]) is recorded as a
//! failed upload and the run carries on; any other publisher error aborts.

use std::path::PathBuf;

use tracing::{debug, error, info, warn, Level};

use crate::access::RoleRegistry;
use crate::config::PipelineConfig;
use crate::contract::{
    BoxError, Connector, Downloader, PublishRejected, Publisher, PutFileRequest,
};
use crate::crypto::ColumnCipher;
use crate::preprocess::{self, CleanError};
use crate::table::{self, Table, TableError};

pub const ORIGINAL_SNAPSHOT_FILE: &str = "dataset_original.csv";
pub const PROCESSED_SNAPSHOT_FILE: &str = "dataset_processed.csv";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("access denied for role: {0}")]
    AccessDenied(String),
    #[error("could not prepare credentials: {0}")]
    Connect(#[source] BoxError),
    #[error("download failed: {0}")]
    Download(#[source] BoxError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("cleaning failed: {0}")]
    Clean(#[from] CleanError),
    #[error("upload of {path} failed: {source}")]
    Publish {
        path: String,
        #[source]
        source: BoxError,
    },
}

/// Ordered, human-readable record of a run. Each entry is also emitted as
/// a tracing event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    entries: Vec<String>,
}

impl RunLog {
    pub fn push(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        if level == Level::ERROR {
            error!(target: "pipeline", "{message}");
        } else if level == Level::WARN {
            warn!(target: "pipeline", "{message}");
        } else if level == Level::INFO {
            info!(target: "pipeline", "{message}");
        } else {
            debug!(target: "pipeline", "{message}");
        }
        self.entries.push(message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Level::INFO, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Level::ERROR, message);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn render(&self) -> String {
        self.entries.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub path: String,
    pub succeeded: bool,
    pub created: bool,
    pub bytes: usize,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub access_granted: bool,
    pub rows_loaded: usize,
    pub rows_after_clean: usize,
    pub uploads: Vec<UploadReport>,
    pub log: RunLog,
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.access_granted && self.error.is_none() && self.uploads.iter().all(|u| u.succeeded)
    }
}

/// Runs the whole pipeline. Never fails: problems end up in the report.
pub async fn run_pipeline<C>(
    config: &PipelineConfig,
    roles: &RoleRegistry,
    connector: &C,
) -> PipelineReport
where
    C: Connector + ?Sized,
{
    let mut report = PipelineReport::default();

    if !roles.is_allowed(&config.role) {
        report
            .log
            .error(format!("Access denied for role: {}", config.role));
        report.error = Some(PipelineError::AccessDenied(config.role.clone()).to_string());
        return report;
    }
    report.access_granted = true;
    report
        .log
        .info(format!("Access granted for role: {}", config.role));

    if let Err(e) = connect_and_execute(config, connector, &mut report).await {
        report.log.error(format!("An error occurred: {e}"));
        report.error = Some(e.to_string());
    }
    report
}

async fn connect_and_execute<C>(
    config: &PipelineConfig,
    connector: &C,
    report: &mut PipelineReport,
) -> Result<(), PipelineError>
where
    C: Connector + ?Sized,
{
    report.log.info("Loading credentials...");
    let connection = connector.connect().map_err(PipelineError::Connect)?;
    report.log.info("Credentials loaded.");

    execute(
        config,
        &connection.cipher,
        connection.downloader.as_ref(),
        connection.publisher.as_ref(),
        report,
    )
    .await
}

async fn execute<D, P>(
    config: &PipelineConfig,
    cipher: &ColumnCipher,
    downloader: &D,
    publisher: &P,
    report: &mut PipelineReport,
) -> Result<(), PipelineError>
where
    D: Downloader + ?Sized,
    P: Publisher + ?Sized,
{
    report
        .log
        .info(format!("Downloading dataset: {}...", config.dataset));
    let downloaded = downloader
        .download_dataset(&config.dataset, &config.work_dir)
        .await
        .map_err(PipelineError::Download)?;
    report.log.info("Download completed.");

    if downloaded.csv_files.is_empty() {
        report
            .log
            .error("No CSV files found in the downloaded dataset.");
        return Err(TableError::NoCsvFiles.into());
    }
    let names: Vec<String> = downloaded
        .csv_files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    report
        .log
        .info(format!("CSV files found: {}", names.join(", ")));

    let mut table = table::load_csv_files(&downloaded.csv_files)?;
    report.rows_loaded = table.len();

    if table.has_column(&config.sensitive_column) {
        let count = cipher.encrypt_column(&mut table, &config.sensitive_column);
        report.log.info(format!(
            "Column '{}' encrypted ({count} values).",
            config.sensitive_column
        ));
    }

    publish_snapshot(
        publisher,
        &table,
        &config.original_path,
        &config.branch,
        config.output_dir.as_ref().map(|d| d.join(ORIGINAL_SNAPSHOT_FILE)),
        report,
    )
    .await?;

    report.log.info("Starting data cleaning...");
    let clean_report = preprocess::clean(&mut table, &config.clean)?;
    for column in &clean_report.columns_dropped {
        report.log.info(format!("Column '{column}' dropped."));
    }
    report.log.info(format!(
        "Rows with missing values removed: {}.",
        clean_report.rows_dropped
    ));
    for column in clean_report.encoders.keys() {
        report.log.info(format!("Column '{column}' encoded."));
    }
    report.log.info("Data cleaning completed.");
    report.rows_after_clean = table.len();

    publish_snapshot(
        publisher,
        &table,
        &config.processed_path,
        &config.branch,
        config
            .output_dir
            .as_ref()
            .map(|d| d.join(PROCESSED_SNAPSHOT_FILE)),
        report,
    )
    .await?;

    Ok(())
}

/// Serialises `table` and writes it to `path` on the remote, replacing the
/// current version when one exists.
pub async fn publish_snapshot<P>(
    publisher: &P,
    table: &Table,
    path: &str,
    branch: &str,
    local_copy: Option<PathBuf>,
    report: &mut PipelineReport,
) -> Result<(), PipelineError>
where
    P: Publisher + ?Sized,
{
    if let Some(local) = local_copy {
        table.write_csv(&local)?;
        debug!(path = %local.display(), "Local snapshot written");
    }

    let content = table.to_csv_bytes()?;
    let bytes = content.len();
    let publish_err = |source| PipelineError::Publish {
        path: path.to_string(),
        source,
    };

    let existing = publisher.fetch_file(path).await.map_err(publish_err)?;
    debug!(path, exists = existing.is_some(), "Looked up remote file");

    let request = PutFileRequest {
        path: path.to_string(),
        message: format!("Upload {path}"),
        content,
        branch: branch.to_string(),
        sha: existing.map(|f| f.sha),
    };

    match publisher.put_file(request).await {
        Ok(resp) => {
            report
                .log
                .info(format!("File {path} uploaded to the repository."));
            report.uploads.push(UploadReport {
                path: path.to_string(),
                succeeded: true,
                created: resp.created,
                bytes,
            });
            Ok(())
        }
        Err(e) => match e.downcast::<PublishRejected>() {
            Ok(rejected) => {
                report
                    .log
                    .error(format!("Error uploading {path}: {rejected}"));
                report.uploads.push(UploadReport {
                    path: path.to_string(),
                    succeeded: false,
                    created: false,
                    bytes,
                });
                Ok(())
            }
            Err(other) => Err(publish_err(other)),
        },
    }
}
