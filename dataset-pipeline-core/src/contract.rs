//! # contract: interfaces to the outside world
//!
//! The pipeline talks to exactly two remote systems: a dataset host it
//! downloads from and a code host it publishes CSV snapshots to. Both are
//! expressed as async traits so that real HTTP clients and `mockall` mocks
//! are interchangeable.
//!
//! Both clients and the column cipher depend on secrets. A [`Connector`]
//! builds them on demand, so a run resolves secrets only once the caller's
//! role has been accepted.
//!
//! Mocks (`MockDownloader`, `MockPublisher`, `MockConnector`) are exported
//! when the `test-export-mocks` feature is enabled so dependent crates can
//! use them in their own tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::crypto::ColumnCipher;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Error type at the trait seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a download produced on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedDataset {
    /// `owner/slug` name of the dataset.
    pub dataset: String,
    /// Every file extracted from the archive.
    pub files: Vec<PathBuf>,
    /// The subset of `files` that are CSV, sorted.
    pub csv_files: Vec<PathBuf>,
}

/// Downloads a named dataset and unpacks it into a directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download_dataset(
        &self,
        dataset: &str,
        dest: &Path,
    ) -> Result<DownloadedDataset, BoxError>;
}

/// A file that already exists on the remote branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    /// Blob sha required to overwrite the file.
    pub sha: String,
}

/// Create-or-replace request for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileRequest {
    pub path: String,
    pub message: String,
    /// Raw file bytes; the implementor handles transport encoding.
    pub content: Vec<u8>,
    pub branch: String,
    /// Present when replacing an existing file.
    pub sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileResponse {
    pub path: String,
    pub sha: String,
    /// True when the file did not exist before.
    pub created: bool,
}

/// Error returned by a [`Publisher`] when the remote refused a write.
///
/// The pipeline treats this as a failed upload and keeps going, whereas
/// any other error aborts the run.
#[derive(Debug, thiserror::Error)]
#[error("remote rejected write to {path} with status {status}: {body}")]
pub struct PublishRejected {
    pub path: String,
    pub status: u16,
    pub body: String,
}

/// Reads and overwrites files in a hosted repository.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Look up a file on the configured branch. `Ok(None)` when absent.
    async fn fetch_file(&self, path: &str) -> Result<Option<RemoteFile>, BoxError>;

    /// Create or overwrite a file.
    async fn put_file(&self, req: PutFileRequest) -> Result<PutFileResponse, BoxError>;
}

/// Cipher and clients for one run.
pub struct Connection {
    pub cipher: ColumnCipher,
    pub downloader: Box<dyn Downloader>,
    pub publisher: Box<dyn Publisher>,
}

/// Resolves keys and credentials and builds the clients that need them.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Connection, BoxError>;
}
