#![doc = "dataset-pipeline-core: core logic library for dataset-pipeline."]

//! Downloads an intrusion-detection dataset, protects its sensitive column,
//! cleans it for model training and publishes both snapshots to a hosted
//! repository.
//!
//! HTTP clients for the publishing side live in the CLI crate; this crate
//! only defines the [`contract::Publisher`] seam and ships the Kaggle
//! [`download::KaggleDownloader`].

pub mod access;
pub mod config;
pub mod contract;
pub mod crypto;
pub mod download;
pub mod pipeline;
pub mod preprocess;
pub mod table;
#[cfg(any(test, feature = "test-export-mocks"))]
pub mod testing;
