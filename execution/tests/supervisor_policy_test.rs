//! Supervisor lifetime policy tests
//!
//! These tests verify the persistent/transient contract end to end:
//! - A persistent supervisor boots exactly one worker across sends
//! - A transient supervisor boots and stops one worker per send
//! - `persistent = true` with file mode is rejected before anything spawns
//! - A framed worker answering with a stale id fails the send

#![cfg(unix)]

use execution::{ExecError, IoMode, StartSpec, Supervisor, SupervisorConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn echo_worker(persistent: bool) -> SupervisorConfig {
    SupervisorConfig::new(IoMode::Stdio, StartSpec::new("cat")).persistent(persistent)
}

#[tokio::test]
async fn test_persistent_supervisor_boots_once() {
    let supervisor = Supervisor::new(echo_worker(true)).unwrap();
    let cancel = CancellationToken::new();

    for n in 0..2 {
        let result = supervisor.send(&json!({"n": n}), &cancel).await.unwrap();
        assert_eq!(result.data, json!({"n": n}));
        let release = result.release.expect("persistent sends still hand back a release");
        assert!(release.is_ready());
    }

    let stats = supervisor.stats().clone();
    assert_eq!(stats.boots(), 1);
    assert_eq!(stats.stops(), 0);
    assert!(supervisor.is_active().await);

    supervisor.shutdown().await.unwrap().wait().await.unwrap();
    assert_eq!(stats.stops(), 1);
}

#[tokio::test]
async fn test_transient_supervisor_boots_per_send() {
    let supervisor = Supervisor::new(echo_worker(false)).unwrap();
    let cancel = CancellationToken::new();

    for n in 0..2 {
        let result = supervisor.send(&json!([n]), &cancel).await.unwrap();
        assert_eq!(result.data, json!([n]));
        assert!(!supervisor.is_active().await);
        result.release.unwrap().wait().await.unwrap();
    }

    let stats = supervisor.stats();
    assert_eq!(stats.boots(), 2);
    assert_eq!(stats.stops(), 2);
}

#[tokio::test]
async fn test_persistent_file_mode_rejected_before_spawn() {
    // The command does not exist: rejection must not depend on spawning it.
    let config = SupervisorConfig::new(IoMode::File, StartSpec::new("/nonexistent/eval"))
        .persistent(true);

    let err = Supervisor::new(config).unwrap_err();
    assert!(matches!(err, ExecError::InvalidPersistentFileIo));
    assert_eq!(err.kind(), execution::ErrorKind::Config);
}

#[tokio::test]
async fn test_stale_reply_id_fails_send() {
    let script = r#"while read -r line; do echo '{"id":0,"data":"stale"}'; done"#;
    let config = SupervisorConfig::new(
        IoMode::Stdio,
        StartSpec::new("sh").arg("-c").arg(script),
    );
    let supervisor = Supervisor::new(config).unwrap();

    let err = supervisor
        .send(&json!("fresh"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.root(),
        ExecError::IdMismatch {
            expected: 1,
            actual: 0
        }
    ));
    assert_eq!(err.kind(), execution::ErrorKind::Protocol);

    supervisor.shutdown().await.unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_spawn_error_leaves_supervisor_idle() {
    let config = SupervisorConfig::new(IoMode::Stdio, StartSpec::new("/nonexistent/eval"));
    let supervisor = Supervisor::new(config).unwrap();

    let err = supervisor
        .send(&json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), execution::ErrorKind::Spawn);
    assert!(!supervisor.is_active().await);
}
