use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dataset_pipeline_core::access::RoleRegistry;
use dataset_pipeline_core::config::PipelineConfig;
use dataset_pipeline_core::contract::{
    BoxError, Connection, DownloadedDataset, MockConnector, MockDownloader, MockPublisher,
    PublishRejected, PutFileRequest, PutFileResponse, RemoteFile,
};
use dataset_pipeline_core::crypto::ColumnCipher;
use dataset_pipeline_core::pipeline::run_pipeline;
use dataset_pipeline_core::preprocess::CleanConfig;
use dataset_pipeline_core::table::Table;
use tempfile::tempdir;

const SESSIONS_CSV: &str = "\
session_id,protocol_type,encryption_used,browser_type,attack_detected
SID_00001,TCP,DES,Edge,1
SID_00002,UDP,AES,Firefox,0
SID_00003,TCP,,Chrome,1
SID_00004,ICMP,AES,Chrome,0
";

const TEST_KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";

fn config(work_dir: PathBuf, output_dir: Option<PathBuf>) -> PipelineConfig {
    PipelineConfig {
        dataset: "dnkumars/cybersecurity-intrusion-detection-dataset".to_string(),
        work_dir,
        output_dir,
        original_path: "datos/dataset_original.csv".to_string(),
        processed_path: "datos/dataset_procesado.csv".to_string(),
        branch: "master".to_string(),
        sensitive_column: "session_id".to_string(),
        clean: CleanConfig::default(),
        role: "admin".to_string(),
    }
}

fn roles() -> RoleRegistry {
    RoleRegistry::from_roles([("admin", "full"), ("viewer", "read")])
}

fn cipher() -> ColumnCipher {
    ColumnCipher::from_key(TEST_KEY).expect("valid test key")
}

/// Connector handing out the given mocks exactly once.
fn connector(downloader: MockDownloader, publisher: MockPublisher) -> MockConnector {
    let mut connector = MockConnector::new();
    connector.expect_connect().times(1).return_once(move || {
        Ok(Connection {
            cipher: cipher(),
            downloader: Box::new(downloader),
            publisher: Box::new(publisher),
        })
    });
    connector
}

/// Downloader mock that drops the sample CSV into the destination directory.
fn downloader_writing_sample() -> MockDownloader {
    let mut downloader = MockDownloader::new();
    downloader
        .expect_download_dataset()
        .times(1)
        .returning(|dataset: &str, dest: &Path| {
            std::fs::create_dir_all(dest).unwrap();
            let csv = dest.join("cybersecurity_intrusion_data.csv");
            std::fs::write(&csv, SESSIONS_CSV).unwrap();
            Ok(DownloadedDataset {
                dataset: dataset.to_string(),
                files: vec![csv.clone()],
                csv_files: vec![csv],
            })
        });
    downloader
}

fn recording_publisher(puts: Arc<Mutex<Vec<PutFileRequest>>>) -> MockPublisher {
    let mut publisher = MockPublisher::new();
    publisher.expect_fetch_file().returning(|path: &str| {
        if path.ends_with("dataset_procesado.csv") {
            Ok(Some(RemoteFile {
                path: path.to_string(),
                sha: "abc123".to_string(),
            }))
        } else {
            Ok(None)
        }
    });
    publisher
        .expect_put_file()
        .times(2)
        .returning(move |req: PutFileRequest| {
            let created = req.sha.is_none();
            let path = req.path.clone();
            puts.lock().unwrap().push(req);
            Ok(PutFileResponse {
                path,
                sha: "new-sha".to_string(),
                created,
            })
        });
    publisher
}

#[tokio::test]
async fn pipeline_publishes_encrypted_original_and_cleaned_snapshot() {
    let work = tempdir().unwrap();
    let out = tempdir().unwrap();
    let puts = Arc::new(Mutex::new(Vec::new()));

    let downloader = downloader_writing_sample();
    let publisher = recording_publisher(puts.clone());
    let cfg = config(work.path().to_path_buf(), Some(out.path().to_path_buf()));

    let report = run_pipeline(&cfg, &roles(), &connector(downloader, publisher)).await;

    assert!(report.is_success(), "log:\n{}", report.log.render());
    assert_eq!(report.rows_loaded, 4);
    assert_eq!(report.rows_after_clean, 3);
    assert_eq!(report.uploads.len(), 2);
    assert!(report.uploads[0].created);
    assert!(!report.uploads[1].created);

    let puts = puts.lock().unwrap();
    assert_eq!(puts[0].path, "datos/dataset_original.csv");
    assert_eq!(puts[0].message, "Upload datos/dataset_original.csv");
    assert_eq!(puts[0].branch, "master");
    assert_eq!(puts[0].sha, None);
    assert_eq!(puts[1].sha.as_deref(), Some("abc123"));

    // Original snapshot keeps every row, with session ids encrypted.
    let mut original = Table::from_csv_reader(puts[0].content.as_slice()).unwrap();
    assert_eq!(original.len(), 4);
    let encrypted = original.column_values("session_id").unwrap();
    assert!(encrypted.iter().all(|v| v.is_some_and(|s| !s.starts_with("SID_"))));
    cipher()
        .decrypt_column(&mut original, "session_id")
        .unwrap();
    assert_eq!(
        original.column_values("session_id").unwrap(),
        vec![
            Some("SID_00001"),
            Some("SID_00002"),
            Some("SID_00003"),
            Some("SID_00004")
        ]
    );

    // Processed snapshot: id dropped, incomplete row gone, categories encoded.
    let processed = Table::from_csv_reader(puts[1].content.as_slice()).unwrap();
    assert!(!processed.has_column("session_id"));
    assert_eq!(processed.len(), 3);
    assert!(processed.rows.iter().flatten().all(Option::is_some));
    assert_eq!(
        processed.column_values("protocol_type").unwrap(),
        vec![Some("1"), Some("2"), Some("0")]
    );
    assert_eq!(
        processed.column_values("encryption_used").unwrap(),
        vec![Some("1"), Some("0"), Some("0")]
    );

    // Local copies mirror what was uploaded.
    let local = std::fs::read(out.path().join("dataset_processed.csv")).unwrap();
    assert_eq!(local, puts[1].content);
    assert!(out.path().join("dataset_original.csv").exists());

    let log = report.log.render();
    assert!(log.contains("Access granted for role: admin"));
    assert!(log.contains("Column 'session_id' encrypted (4 values)."));
    assert!(log.contains("Rows with missing values removed: 1."));
    assert!(log.contains("File datos/dataset_procesado.csv uploaded to the repository."));
}

#[tokio::test]
async fn denied_role_stops_before_secrets_or_network() {
    let work = tempdir().unwrap();
    // No expectations: connecting would fail the test.
    let connector = MockConnector::new();
    let mut cfg = config(work.path().to_path_buf(), None);
    cfg.role = "viewer".to_string();

    let report = run_pipeline(&cfg, &roles(), &connector).await;

    assert!(!report.access_granted);
    assert!(!report.is_success());
    assert_eq!(report.log.render(), "Access denied for role: viewer");
}

#[tokio::test]
async fn download_failure_is_logged_and_log_is_still_returned() {
    let work = tempdir().unwrap();
    let mut downloader = MockDownloader::new();
    downloader
        .expect_download_dataset()
        .returning(|_: &str, _: &Path| Err::<DownloadedDataset, BoxError>("403 Forbidden".into()));
    let publisher = MockPublisher::new();
    let cfg = config(work.path().to_path_buf(), None);

    let report = run_pipeline(&cfg, &roles(), &connector(downloader, publisher)).await;

    assert!(report.access_granted);
    assert!(report.error.as_deref().unwrap().contains("403 Forbidden"));
    let entries = report.log.entries();
    assert!(entries[3].starts_with("Downloading dataset:"));
    assert_eq!(
        entries.last().unwrap(),
        "An error occurred: download failed: 403 Forbidden"
    );
    assert!(report.uploads.is_empty());
}

#[tokio::test]
async fn archive_without_csv_files_fails_the_run() {
    let work = tempdir().unwrap();
    let mut downloader = MockDownloader::new();
    downloader
        .expect_download_dataset()
        .returning(|dataset: &str, dest: &Path| {
            Ok(DownloadedDataset {
                dataset: dataset.to_string(),
                files: vec![dest.join("README.md")],
                csv_files: vec![],
            })
        });
    let publisher = MockPublisher::new();
    let cfg = config(work.path().to_path_buf(), None);

    let report = run_pipeline(&cfg, &roles(), &connector(downloader, publisher)).await;

    assert!(report
        .error
        .as_deref()
        .unwrap()
        .contains("no CSV files found"));
    assert!(report
        .log
        .render()
        .contains("No CSV files found in the downloaded dataset."));
}

#[tokio::test]
async fn rejected_upload_is_recorded_and_run_continues() {
    let work = tempdir().unwrap();
    let downloader = downloader_writing_sample();

    let mut publisher = MockPublisher::new();
    publisher.expect_fetch_file().returning(|_: &str| Ok(None));
    publisher
        .expect_put_file()
        .times(2)
        .returning(|req: PutFileRequest| {
            if req.path.ends_with("dataset_original.csv") {
                Err(Box::new(PublishRejected {
                    path: req.path,
                    status: 422,
                    body: "{\"message\":\"Invalid request\"}".to_string(),
                }) as BoxError)
            } else {
                Ok(PutFileResponse {
                    path: req.path,
                    sha: "s".to_string(),
                    created: true,
                })
            }
        });
    let cfg = config(work.path().to_path_buf(), None);

    let report = run_pipeline(&cfg, &roles(), &connector(downloader, publisher)).await;

    assert!(report.error.is_none());
    assert!(!report.is_success());
    assert_eq!(report.uploads.len(), 2);
    assert!(!report.uploads[0].succeeded);
    assert!(report.uploads[1].succeeded);
    assert!(report
        .log
        .render()
        .contains("Error uploading datos/dataset_original.csv: remote rejected write"));
}

#[tokio::test]
async fn transport_error_while_publishing_aborts_the_run() {
    let work = tempdir().unwrap();
    let downloader = downloader_writing_sample();

    let mut publisher = MockPublisher::new();
    publisher
        .expect_fetch_file()
        .times(1)
        .returning(|_: &str| Err::<Option<RemoteFile>, BoxError>("connection reset".into()));
    let cfg = config(work.path().to_path_buf(), None);

    let report = run_pipeline(&cfg, &roles(), &connector(downloader, publisher)).await;

    let error = report.error.expect("run should fail");
    assert!(error.contains("upload of datos/dataset_original.csv failed"));
    assert!(error.contains("connection reset"));
    assert!(report.uploads.is_empty());
    assert_eq!(report.rows_after_clean, 0);
}

#[tokio::test]
async fn missing_credentials_after_access_check_are_logged() {
    let work = tempdir().unwrap();
    let mut connector = MockConnector::new();
    connector.expect_connect().times(1).returning(|| {
        Err::<Connection, BoxError>("Kaggle credentials not found".into())
    });
    let cfg = config(work.path().to_path_buf(), None);

    let report = run_pipeline(&cfg, &roles(), &connector).await;

    assert!(report.access_granted);
    assert!(!report.is_success());
    assert_eq!(
        report.log.entries(),
        &[
            "Access granted for role: admin".to_string(),
            "Loading credentials...".to_string(),
            "An error occurred: could not prepare credentials: Kaggle credentials not found"
                .to_string(),
        ]
    );
    assert!(report.uploads.is_empty());
}
