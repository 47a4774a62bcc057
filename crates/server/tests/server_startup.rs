use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

/// Write a config that keeps every path inside `dir`
fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = format!(
        r#"
[database]
path = "{db}"

[upload]
root_dir = "{uploads}"

[delivery]
outbox_dir = "{outbox}"

[processor]
poll_interval_ms = 50
"#,
        db = dir.join("data").join("submitter.db").display(),
        uploads = dir.join("uploads").display(),
        outbox = dir.join("outbox").display(),
    );
    let path = dir.join("config.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn spawn_daemon(config_path: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_submitter"))
        .env("SUBMITTER_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn daemon")
}

#[tokio::test]
async fn test_missing_config_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let mut daemon = spawn_daemon(&dir.path().join("nope.toml"));

    let status = timeout(Duration::from_secs(10), daemon.wait())
        .await
        .expect("daemon did not exit")
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_invalid_config_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[processor.retry]\nmax_attempts = 0\n").unwrap();

    let mut daemon = spawn_daemon(&path);

    let status = timeout(Duration::from_secs(10), daemon.wait())
        .await
        .expect("daemon did not exit")
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_valid_config_keeps_running_and_creates_database() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(dir.path());
    let db_path = dir.path().join("data").join("submitter.db");

    let mut daemon = spawn_daemon(&config_path);

    let mut opened = false;
    for _ in 0..100 {
        if db_path.exists() {
            opened = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(opened, "database was never created");

    sleep(Duration::from_millis(200)).await;
    assert!(
        daemon.try_wait().unwrap().is_none(),
        "daemon exited unexpectedly"
    );

    daemon.kill().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_shuts_down_cleanly() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(dir.path());
    let db_path = dir.path().join("data").join("submitter.db");

    let mut daemon = spawn_daemon(&config_path);

    for _ in 0..100 {
        if db_path.exists() {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    // Give the processor time to install its signal handler.
    sleep(Duration::from_millis(300)).await;

    let pid = daemon.id().expect("daemon already exited");
    let sent = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    let status = timeout(Duration::from_secs(10), daemon.wait())
        .await
        .expect("daemon did not stop after SIGTERM")
        .unwrap();
    assert!(status.success());
}
