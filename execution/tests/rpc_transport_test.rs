//! RPC transport tests
//!
//! Each transport is driven through a persistent supervisor. For the network
//! transports an in-test server plays the worker's endpoint while a `sleep`
//! process stands in for the worker itself.

#![cfg(unix)]

use axum::{routing::post, Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use execution::{ExecError, IoMode, RpcConfig, StartSpec, Supervisor, SupervisorConfig};

fn rpc_worker(transport: &str, address: Option<String>, start: StartSpec) -> SupervisorConfig {
    SupervisorConfig::new(IoMode::Rpc, start)
        .persistent(true)
        .with_rpc(RpcConfig {
            transport: Some(transport.to_string()),
            address,
            method: "evaluate".to_string(),
            dial_timeout_ms: 2_000,
        })
}

fn standin() -> StartSpec {
    StartSpec::new("sleep").arg("30")
}

#[tokio::test]
async fn test_http_transport() {
    let app = Router::new().route(
        "/rpc",
        post(|Json(request): Json<Value>| async move {
            assert_eq!(request["method"], "evaluate");
            Json(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"got": request["params"][0]}}))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let supervisor =
        Supervisor::new(rpc_worker("http", Some(format!("http://{addr}/rpc")), standin()))
            .unwrap();
    let cancel = CancellationToken::new();
    supervisor.start(&cancel).await.unwrap();

    for n in 0..2 {
        let result = supervisor.send(&json!({"n": n}), &cancel).await.unwrap();
        assert_eq!(result.data, json!({"got": {"n": n}}));
    }
    assert_eq!(supervisor.stats().boots(), 1);
    supervisor.shutdown().await.unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_ws_transport_reports_worker_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(Message::Text(text))) = socket.next().await {
            let request: Value = serde_json::from_str(&text).unwrap();
            let reply = if request["params"][0] == json!("bad") {
                json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": -32602, "message": "invalid params"}})
            } else {
                json!({"jsonrpc": "2.0", "id": request["id"], "result": "ok"})
            };
            socket.send(Message::Text(reply.to_string())).await.unwrap();
        }
    });

    let supervisor =
        Supervisor::new(rpc_worker("ws", Some(format!("ws://{addr}/")), standin())).unwrap();
    let cancel = CancellationToken::new();

    let result = supervisor.send(&json!("good"), &cancel).await.unwrap();
    assert_eq!(result.data, json!("ok"));

    let err = supervisor.send(&json!("bad"), &cancel).await.unwrap_err();
    assert!(matches!(err.root(), ExecError::WorkerReported(msg) if msg.contains("invalid params")));
    // A reported error is a failed call, not a dead worker.
    assert!(supervisor.is_active().await);

    supervisor.shutdown().await.unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_stdio_transport_rejects_stale_id() {
    // Answers any request with id 9 using Content-Length framing.
    let script = r#"printf 'Content-Length: 38\r\n\r\n{"jsonrpc":"2.0","id":9,"result":null}'; sleep 30"#;
    let supervisor = Supervisor::new(rpc_worker(
        "stdio",
        None,
        StartSpec::new("sh").arg("-c").arg(script),
    ))
    .unwrap();

    let err = supervisor
        .send(&json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.root(),
        ExecError::IdMismatch {
            expected: 1,
            actual: 9
        }
    ));
    supervisor.shutdown().await.unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_boot() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = rpc_worker("http", Some(format!("http://{addr}/")), standin());
    if let Some(rpc) = config.rpc.as_mut() {
        rpc.dial_timeout_ms = 200;
    }
    let supervisor = Supervisor::new(config).unwrap();

    let err = supervisor
        .start(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.root(), ExecError::Transport(_)));
    assert!(!supervisor.is_active().await);
    assert_eq!(supervisor.stats().boots(), 0);
}
