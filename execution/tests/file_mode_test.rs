//! File-mode exchange tests
//!
//! The worker reads the request file and writes the response file, located
//! through either the trailing arguments or the REQUEST_FILE_NAME /
//! RESPONSE_FILE_NAME environment variables.

#![cfg(unix)]

use execution::{ExecError, IoMode, StartSpec, Supervisor, SupervisorConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn file_worker(script: &str, dir: &std::path::Path) -> SupervisorConfig {
    let mut config =
        SupervisorConfig::new(IoMode::File, StartSpec::new("sh").arg("-c").arg(script));
    config.file.dir = Some(dir.to_path_buf());
    config
}

#[tokio::test]
async fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(file_worker(
        r#"cat "$REQUEST_FILE_NAME" > "$RESPONSE_FILE_NAME""#,
        dir.path(),
    ))
    .unwrap();

    let input = json!({"foo": "bar"});
    let result = supervisor
        .send(&input, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.data, input);
    result.release.unwrap().wait().await.unwrap();

    assert_eq!(supervisor.stats().boots(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_worker_transforms_payload() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"printf '{"score": 1, "input": %s}' "$(cat "$REQUEST_FILE_NAME")" > "$RESPONSE_FILE_NAME""#;
    let supervisor = Supervisor::new(file_worker(script, dir.path())).unwrap();

    let result = supervisor
        .send(&json!([1, 2]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.data, json!({"score": 1, "input": [1, 2]}));
}

#[tokio::test]
async fn test_crashing_worker_surfaces_exit_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor =
        Supervisor::new(file_worker("echo 'model exploded' >&2; exit 7", dir.path())).unwrap();

    let err = supervisor
        .send(&json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    let ExecError::WorkerExited(event) = err.root() else {
        panic!("expected WorkerExited, got {err:?}");
    };
    assert_eq!(event.code, Some(7));
    assert!(event.stderr.contains("model exploded"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
