use assert_cmd::Command;
use dataset_pipeline_core::crypto::{self, ColumnCipher, KeyStore};
use dataset_pipeline_core::table::Table;
use predicates::prelude::*;
use std::fs::write;
use tempfile::tempdir;

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("dataset-pipeline").expect("Binary exists");
    // Keep log files out of the source tree.
    cmd.env("PIPELINE_LOG_DIR", std::env::temp_dir());
    cmd
}

#[test]
fn help_lists_every_subcommand() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("encrypt-token"))
                .and(predicate::str::contains("decrypt-column")),
        );
}

#[test]
fn encrypt_token_writes_a_file_the_pipeline_can_read_back() {
    let dir = tempdir().unwrap();
    let key_file = dir.path().join("secret.key");
    let token_file = dir.path().join("github_token.enc");

    bin()
        .arg("encrypt-token")
        .arg("--key-file")
        .arg(&key_file)
        .arg("--out")
        .arg(&token_file)
        .env("GITHUB_TOKEN", "ghp_from_env\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("GitHub token encrypted and saved"));

    let cipher = KeyStore::load(&key_file).unwrap();
    let stored = std::fs::read_to_string(&token_file).unwrap();
    assert!(!stored.contains("ghp_from_env"));
    assert_eq!(
        crypto::load_encrypted_token(&token_file, &cipher).unwrap(),
        "ghp_from_env"
    );
}

#[test]
fn encrypt_token_refuses_blank_token() {
    let dir = tempdir().unwrap();
    bin()
        .arg("encrypt-token")
        .arg("--key-file")
        .arg(dir.path().join("secret.key"))
        .arg("--out")
        .arg(dir.path().join("github_token.enc"))
        .arg("--token")
        .arg("   ")
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty token"));
}

#[test]
fn decrypt_column_restores_session_ids() {
    let dir = tempdir().unwrap();
    let key_file = dir.path().join("secret.key");
    let cipher = KeyStore::load_or_generate(&key_file).unwrap();

    let mut table =
        Table::from_csv_reader("session_id,protocol_type\nSID_1,TCP\nSID_2,UDP\n".as_bytes())
            .unwrap();
    cipher.encrypt_column(&mut table, "session_id");
    let input = dir.path().join("dataset_original.csv");
    table.write_csv(&input).unwrap();
    let output = dir.path().join("decrypted.csv");

    bin()
        .arg("decrypt-column")
        .arg("--input")
        .arg(&input)
        .arg("--key-file")
        .arg(&key_file)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let restored = Table::read_csv(&output).unwrap();
    assert_eq!(
        restored.column_values("session_id").unwrap(),
        vec![Some("SID_1"), Some("SID_2")]
    );

    // Without --output the CSV goes to stdout.
    bin()
        .arg("decrypt-column")
        .arg("--input")
        .arg(&input)
        .arg("--key-file")
        .arg(&key_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("SID_2,UDP"));
}

#[test]
fn decrypt_column_with_wrong_key_fails() {
    let dir = tempdir().unwrap();
    let other = ColumnCipher::from_key("cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=").unwrap();
    let mut table = Table::from_csv_reader("session_id\nSID_1\n".as_bytes()).unwrap();
    other.encrypt_column(&mut table, "session_id");
    let input = dir.path().join("in.csv");
    table.write_csv(&input).unwrap();

    let key_file = dir.path().join("secret.key");
    KeyStore::load_or_generate(&key_file).unwrap();

    bin()
        .arg("decrypt-column")
        .arg("--input")
        .arg(&input)
        .arg("--key-file")
        .arg(&key_file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decrypt column 'session_id'"));
}

#[test]
fn decrypt_column_needs_an_existing_key() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write(&input, "session_id\nabc\n").unwrap();

    bin()
        .arg("decrypt-column")
        .arg("--input")
        .arg(&input)
        .arg("--key-file")
        .arg(dir.path().join("missing.key"))
        .assert()
        .failure();
    assert!(!dir.path().join("missing.key").exists());
}

#[test]
fn run_with_missing_config_fails() {
    let dir = tempdir().unwrap();
    bin()
        .arg("run")
        .arg("--config")
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

/// Writes a config whose secrets and roles all live under `dir`.
fn write_run_config(dir: &std::path::Path) -> std::path::PathBuf {
    let config = dir.join("pipeline.yaml");
    let roles = dir.join("roles.json");
    write(
        &roles,
        r#"{"admin": {"access_level": "full"}, "viewer": {"access_level": "read"}}"#,
    )
    .unwrap();
    write(
        &config,
        format!(
            "dataset:\n  work_dir: {}\ngithub:\n  owner: someone\n  repo: somewhere\nsecrets:\n  key_file: {}\n  token_file: {}\naccess:\n  roles_file: {}\n",
            dir.join("data").display(),
            dir.join("secret.key").display(),
            dir.join("github_token.enc").display(),
            roles.display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn run_without_stored_token_logs_error_before_downloading() {
    let dir = tempdir().unwrap();
    let config = write_run_config(dir.path());

    bin()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .env("KAGGLE_USERNAME", "user")
        .env("KAGGLE_KEY", "key")
        .assert()
        .failure()
        .stdout(
            predicate::str::contains("Access granted for role: admin")
                .and(predicate::str::contains(
                    "An error occurred: could not prepare credentials: encrypted token not found",
                ))
                .and(predicate::str::contains("Downloading dataset").not()),
        );
}

#[test]
fn denied_role_is_reported_before_secrets_are_touched() {
    let dir = tempdir().unwrap();
    let config = write_run_config(dir.path());
    let empty_kaggle_dir = tempdir().unwrap();

    bin()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--role")
        .arg("viewer")
        .env_remove("KAGGLE_USERNAME")
        .env_remove("KAGGLE_KEY")
        .env("KAGGLE_CONFIG_DIR", empty_kaggle_dir.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("Access denied for role: viewer"))
        .stderr(predicate::str::contains("Kaggle credentials").not());

    assert!(!dir.path().join("secret.key").exists());
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_then_loads_config() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use dataset_pipeline::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Run {
            config: std::path::PathBuf::from("dummy.yaml"),
            role: None,
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    let initialised = event_msgs
        .iter()
        .position(|msg| msg.contains("trace_initialised"));
    let loading = event_msgs
        .iter()
        .position(|msg| msg.contains("Loading configuration from file"));
    let failed = event_msgs
        .iter()
        .any(|msg| msg.contains("Failed to read config file"));
    assert!(
        matches!((initialised, loading), (Some(i), Some(l)) if i < l),
        "Expected 'trace_initialised' before config loading, got: {:?}",
        event_msgs
    );
    assert!(failed, "Expected the missing config to be reported, got: {:?}", event_msgs);
}
