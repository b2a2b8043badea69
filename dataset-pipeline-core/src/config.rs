use std::path::PathBuf;

use tracing::{debug, info};

use crate::preprocess::CleanConfig;

/// Everything a single pipeline run needs, with secrets already resolved
/// elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// `owner/slug` of the dataset to download.
    pub dataset: String,
    /// Where the archive is extracted.
    pub work_dir: PathBuf,
    /// If set, both snapshots are also written here.
    pub output_dir: Option<PathBuf>,
    /// Remote path of the original snapshot.
    pub original_path: String,
    /// Remote path of the processed snapshot.
    pub processed_path: String,
    pub branch: String,
    pub sensitive_column: String,
    pub clean: CleanConfig,
    pub role: String,
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        info!(
            dataset = %self.dataset,
            work_dir = %self.work_dir.display(),
            branch = %self.branch,
            role = %self.role,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}
