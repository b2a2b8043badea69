use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::contract::{BoxError, DownloadedDataset, Downloader};

pub const DEFAULT_KAGGLE_API: &str = "https://www.kaggle.com/api/v1";

const DATASET_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]*/[A-Za-z0-9][A-Za-z0-9_.\-]*$";

static DATASET_NAME: LazyLock<Result<regex::Regex, regex::Error>> =
    LazyLock::new(|| regex::Regex::new(DATASET_NAME_PATTERN));

#[derive(Debug, thiserror::Error)]
pub enum DownloadFailure {
    #[error("Kaggle credentials not found: set KAGGLE_USERNAME and KAGGLE_KEY or provide {0}")]
    MissingCredentials(PathBuf),
    #[error("failed to read Kaggle credentials {path}: {reason}")]
    BadCredentialsFile { path: PathBuf, reason: String },
    #[error("dataset name '{0}' must look like 'owner/dataset'")]
    InvalidDatasetName(String),
    #[error("dataset name pattern failed to compile: {0}")]
    NamePattern(#[source] regex::Error),
    #[error("dataset download {url} failed with status {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },
    #[error("downloaded archive is not a valid zip file: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("I/O error while extracting to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// API credentials as stored in `kaggle.json`.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl std::fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleCredentials")
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl KaggleCredentials {
    /// Looks for credentials in `KAGGLE_USERNAME`/`KAGGLE_KEY`, then in
    /// `kaggle.json` under `KAGGLE_CONFIG_DIR` or `~/.kaggle`.
    pub fn discover() -> Result<Self, DownloadFailure> {
        let config_dir = std::env::var_os("KAGGLE_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".kaggle"))
            });
        Self::resolve(
            std::env::var("KAGGLE_USERNAME").ok(),
            std::env::var("KAGGLE_KEY").ok(),
            config_dir,
        )
    }

    pub fn resolve(
        username: Option<String>,
        key: Option<String>,
        config_dir: Option<PathBuf>,
    ) -> Result<Self, DownloadFailure> {
        if let (Some(username), Some(key)) = (username, key) {
            if !username.is_empty() && !key.is_empty() {
                info!(username = %username, "Using Kaggle credentials from environment");
                return Ok(Self { username, key });
            }
        }

        let file = config_dir
            .unwrap_or_else(|| PathBuf::from(".kaggle"))
            .join("kaggle.json");
        if !file.exists() {
            error!(path = %file.display(), "No Kaggle credentials available");
            return Err(DownloadFailure::MissingCredentials(file));
        }
        Self::from_file(&file)
    }

    pub fn from_file(path: &Path) -> Result<Self, DownloadFailure> {
        let bad = |reason: String| DownloadFailure::BadCredentialsFile {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| bad(e.to_string()))?;
        let creds: Self = serde_json::from_str(&text).map_err(|e| bad(e.to_string()))?;
        info!(path = %path.display(), username = %creds.username, "Loaded Kaggle credentials file");
        Ok(creds)
    }
}

/// Downloads dataset archives from the Kaggle REST API.
pub struct KaggleDownloader {
    client: reqwest::Client,
    api_base: String,
    credentials: KaggleCredentials,
}

impl KaggleDownloader {
    pub fn new(api_base: impl Into<String>, credentials: KaggleCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn download_url(&self, dataset: &str) -> String {
        format!("{}/datasets/download/{}", self.api_base, dataset)
    }
}

pub fn validate_dataset_name(dataset: &str) -> Result<(), DownloadFailure> {
    let pattern = DATASET_NAME
        .as_ref()
        .map_err(|e| DownloadFailure::NamePattern(e.clone()))?;
    if pattern.is_match(dataset) {
        Ok(())
    } else {
        Err(DownloadFailure::InvalidDatasetName(dataset.to_string()))
    }
}

#[async_trait::async_trait]
impl Downloader for KaggleDownloader {
    async fn download_dataset(
        &self,
        dataset: &str,
        dest: &Path,
    ) -> Result<DownloadedDataset, BoxError> {
        validate_dataset_name(dataset)?;
        let url = self.download_url(dataset);
        info!(url = %url, dataset, "Downloading dataset archive");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.key))
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, url = %url, "Failed to reach dataset host");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            error!(status = %status, url = %url, "Dataset host returned error");
            return Err(DownloadFailure::Http {
                url,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let bytes = response.bytes().await?;
        debug!(size = bytes.len(), "Archive received");

        let files = extract_archive(Cursor::new(bytes), dest)?;
        let csv_files = csv_files(&files);
        info!(
            dataset,
            files = files.len(),
            csv_files = csv_files.len(),
            dest = %dest.display(),
            "Dataset downloaded and extracted"
        );
        Ok(DownloadedDataset {
            dataset: dataset.to_string(),
            files,
            csv_files,
        })
    }
}

/// Unpacks a zip archive into `dest`, returning the extracted file paths.
/// Entries whose names would escape `dest` are skipped.
pub fn extract_archive<R: Read + Seek>(
    reader: R,
    dest: &Path,
) -> Result<Vec<PathBuf>, DownloadFailure> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DownloadFailure::Io { path, source }
    };

    let mut archive = zip::ZipArchive::new(reader)?;
    std::fs::create_dir_all(dest).map_err(io_err(dest))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(io_err(&out_path))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = std::fs::File::create(&out_path).map_err(io_err(&out_path))?;
        std::io::copy(&mut entry, &mut file).map_err(io_err(&out_path))?;
        debug!(path = %out_path.display(), "Extracted archive entry");
        extracted.push(out_path);
    }
    Ok(extracted)
}

/// CSV paths among `files`, sorted.
pub fn csv_files(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut csv: Vec<PathBuf> = files
        .iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .cloned()
        .collect();
    csv.sort();
    csv
}
