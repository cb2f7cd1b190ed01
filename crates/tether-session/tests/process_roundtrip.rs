//! End-to-end tests against real child processes.
//!
//! The scripted server is a shell one-liner: it prints a canned initialize
//! response for the channel's first request id and then drains stdin so the
//! process stays alive until killed.

#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use tether_session::types::parent_dir_resolver;
use tether_session::{ServerSpec, SessionError, SessionManager, SessionOptions, SessionState};

const SCRIPTED_SERVER: &str = r#"
B='{"jsonrpc":"2.0","id":1,"result":{"capabilities":{"hoverProvider":true}}}'
printf "Content-Length: ${#B}\r\n\r\n%s" "$B"
exec cat >/dev/null
"#;

const NOISY_SERVER: &str = r#"
echo "warming up" >&2
B='{"jsonrpc":"2.0","id":1,"result":{"capabilities":{"hoverProvider":true}}}'
printf "Content-Length: ${#B}\r\n\r\n%s" "$B"
exec cat >/dev/null
"#;

fn test_options() -> SessionOptions {
    SessionOptions::new("tether-test")
        .with_working_dir(parent_dir_resolver())
        .with_root_path(parent_dir_resolver())
        .with_handshake_timeout(Duration::from_secs(5))
}

fn file_in(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"").unwrap();
    path
}

#[tokio::test]
async fn real_process_handshake_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let file = file_in(&dir, "main.ts");

    let spec = ServerSpec::command("sh").with_args(["-c", SCRIPTED_SERVER]);
    let manager = SessionManager::new(spec, test_options());

    manager.ensure_active(&file).await.unwrap();
    assert_eq!(manager.state().await, SessionState::Active);
    assert!(manager.capabilities().await.supports("hoverProvider"));

    manager.end().await;
    assert_eq!(manager.state().await, SessionState::Idle);
    assert!(manager.capabilities().await.is_empty());
}

#[tokio::test]
async fn module_spec_runs_through_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("server.sh");
    std::fs::write(&script, SCRIPTED_SERVER).unwrap();
    let file = file_in(&dir, "main.ts");

    let spec = ServerSpec::module(&script).with_runtime("sh");
    let manager = SessionManager::new(spec, test_options());

    manager.ensure_active(&file).await.unwrap();
    assert_eq!(manager.state().await, SessionState::Active);
    assert!(manager.capabilities().await.supports("hoverProvider"));

    manager.end().await;
}

#[tokio::test]
async fn stderr_chatter_does_not_disturb_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let file = file_in(&dir, "main.ts");

    let spec = ServerSpec::command("sh").with_args(["-c", NOISY_SERVER]);
    let manager = SessionManager::new(spec, test_options());

    manager.ensure_active(&file).await.unwrap();
    assert!(manager.capabilities().await.supports("hoverProvider"));

    manager.end().await;
}

#[tokio::test]
async fn missing_binary_is_launch_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = file_in(&dir, "main.ts");

    let spec = ServerSpec::command("tether-definitely-missing-binary");
    let manager = SessionManager::new(spec, test_options());

    let err = manager.ensure_active(&file).await.unwrap_err();
    assert!(matches!(err, SessionError::Launch(_)));
    assert_eq!(manager.state().await, SessionState::Idle);
}

#[tokio::test]
async fn moving_directories_restarts_real_server() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let first_file = file_in(&first_dir, "one.ts");
    let second_file = file_in(&second_dir, "two.ts");

    let spec = ServerSpec::command("sh").with_args(["-c", SCRIPTED_SERVER]);
    let manager = SessionManager::new(spec, test_options());

    let first = manager.ensure_active(&first_file).await.unwrap();
    let second = manager.ensure_active(&second_file).await.unwrap();

    assert!(!std::sync::Arc::ptr_eq(&first, &second));
    assert!(first.is_closed());
    assert_eq!(manager.state().await, SessionState::Active);
    assert!(manager.capabilities().await.supports("hoverProvider"));

    manager.end().await;
}
