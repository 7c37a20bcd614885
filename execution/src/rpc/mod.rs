//! JSON-RPC 2.0 clients for rpc-mode workers.
//!
//! One request is in flight per client. The call shape is fixed: a method
//! name plus a single positional argument.

mod http;
mod stream;
mod ws;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use shared_types::RpcConfig;

use crate::codec::FrameCodec;
use crate::error::{ExecError, Result};
use crate::process::{ExitEvent, Pipes};

pub use http::HttpClient;
pub use stream::StreamClient;
pub use ws::WsClient;

/// Delay between dial attempts while a worker is coming up.
const DIAL_INTERVAL: Duration = Duration::from_millis(50);

/// Where an rpc worker listens, validated from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `Content-Length` framed JSON over the worker's own stdin/stdout.
    Stdio,
    /// Unix socket path, or named pipe name on Windows.
    Ipc(PathBuf),
    Http(Url),
    Ws(Url),
}

impl Endpoint {
    pub fn from_config(config: &RpcConfig) -> Result<Self> {
        let address = || {
            config.address.as_deref().ok_or_else(|| {
                ExecError::Config(format!(
                    "rpc transport `{}` requires an address",
                    config.transport.as_deref().unwrap_or_default()
                ))
            })
        };
        let url = |address: &str| {
            Url::parse(address)
                .map_err(|e| ExecError::Config(format!("invalid rpc address {address:?}: {e}")))
        };

        match config.transport.as_deref() {
            Some("stdio") => Ok(Endpoint::Stdio),
            Some("ipc") => Ok(Endpoint::Ipc(PathBuf::from(address()?))),
            Some("http") => Ok(Endpoint::Http(url(address()?)?)),
            Some("ws") => Ok(Endpoint::Ws(url(address()?)?)),
            other => Err(ExecError::UnsupportedIoTransport(other.map(str::to_string))),
        }
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Endpoint::Stdio => "stdio",
            Endpoint::Ipc(_) => "ipc",
            Endpoint::Http(_) => "http",
            Endpoint::Ws(_) => "ws",
        }
    }

    /// Connects to a freshly started worker.
    ///
    /// `pipes` is required for [`Endpoint::Stdio`]. Network endpoints are
    /// retried until `dial_timeout` elapses; `exited` resolving first aborts
    /// the dial with [`ExecError::WorkerExited`].
    pub async fn connect<E>(
        &self,
        pipes: Option<Pipes>,
        dial_timeout: Duration,
        cancel: &CancellationToken,
        exited: E,
    ) -> Result<RpcClient>
    where
        E: Future<Output = ExitEvent>,
    {
        match self {
            Endpoint::Stdio => {
                let pipes = pipes.ok_or_else(|| {
                    ExecError::Protocol("worker pipes are not available".to_string())
                })?;
                Ok(RpcClient::Stream(StreamClient::new(
                    pipes,
                    FrameCodec::content_length(),
                )))
            }
            Endpoint::Ipc(path) => {
                let client = retry_dial(dial_timeout, cancel, exited, || {
                    stream::connect_ipc(path)
                })
                .await?;
                Ok(RpcClient::Stream(client))
            }
            Endpoint::Http(url) => {
                retry_dial(dial_timeout, cancel, exited, || http::check_ready(url)).await?;
                Ok(RpcClient::Http(HttpClient::new(url.clone())))
            }
            Endpoint::Ws(url) => {
                let client = retry_dial(dial_timeout, cancel, exited, || WsClient::connect(url))
                    .await?;
                Ok(RpcClient::Ws(client))
            }
        }
    }
}

#[derive(Debug)]
pub enum RpcClient {
    Stream(StreamClient),
    Http(HttpClient),
    Ws(WsClient),
}

impl RpcClient {
    pub async fn call(&mut self, method: &str, param: &Value) -> Result<Value> {
        match self {
            RpcClient::Stream(client) => client.call(method, param).await,
            RpcClient::Http(client) => client.call(method, param).await,
            RpcClient::Ws(client) => client.call(method, param).await,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: [&'a Value; 1],
}

impl<'a> Request<'a> {
    pub(crate) fn new(id: u64, method: &'a str, param: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params: [param],
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// What a received message means for the call waiting on `expected`.
pub(crate) enum Reply {
    Done(Result<Value>),
    /// A notification; keep reading.
    Skip,
}

impl Response {
    pub(crate) fn settle(self, expected: u64) -> Reply {
        let Some(id) = self.id else {
            // id-less errors answer requests the peer could not parse
            return match self.error {
                Some(error) => Reply::Done(Err(error.into())),
                None => Reply::Skip,
            };
        };
        if id != expected {
            return Reply::Done(Err(ExecError::IdMismatch {
                expected,
                actual: id,
            }));
        }
        match self.error {
            Some(error) => Reply::Done(Err(error.into())),
            None => Reply::Done(Ok(self.result.unwrap_or(Value::Null))),
        }
    }
}

impl From<RpcError> for ExecError {
    fn from(error: RpcError) -> Self {
        let mut text = format!("{} (code {})", error.message, error.code);
        if let Some(data) = error.data {
            text.push_str(&format!(": {data}"));
        }
        ExecError::WorkerReported(text)
    }
}

/// Repeats `attempt` every [`DIAL_INTERVAL`] until it succeeds or `limit` elapses.
async fn retry_dial<T, F, Fut, E>(
    limit: Duration,
    cancel: &CancellationToken,
    exited: E,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    E: Future<Output = ExitEvent>,
{
    let dialing = async {
        let deadline = tokio::time::Instant::now() + limit;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(client) => {
                    debug!(attempts, "rpc endpoint reachable");
                    return Ok(client);
                }
                Err(e) if tokio::time::Instant::now() + DIAL_INTERVAL >= deadline => {
                    return Err(ExecError::Transport(format!(
                        "endpoint unreachable after {attempts} attempts in {limit:?}: {e}"
                    )));
                }
                Err(_) => tokio::time::sleep(DIAL_INTERVAL).await,
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        result = dialing => result,
        event = exited => Err(ExecError::WorkerExited(event)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rpc(transport: Option<&str>, address: Option<&str>) -> RpcConfig {
        RpcConfig {
            transport: transport.map(str::to_string),
            address: address.map(str::to_string),
            method: "eval".to_string(),
            dial_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_endpoint_validation() {
        assert_eq!(
            Endpoint::from_config(&rpc(Some("stdio"), None)).unwrap(),
            Endpoint::Stdio
        );
        assert_eq!(
            Endpoint::from_config(&rpc(Some("ipc"), Some("/tmp/w.sock"))).unwrap(),
            Endpoint::Ipc(PathBuf::from("/tmp/w.sock"))
        );
        assert_eq!(
            Endpoint::from_config(&rpc(Some("ws"), Some("ws://127.0.0.1:9000/rpc")))
                .unwrap()
                .transport(),
            "ws"
        );

        assert!(matches!(
            Endpoint::from_config(&rpc(None, None)),
            Err(ExecError::UnsupportedIoTransport(None))
        ));
        assert!(matches!(
            Endpoint::from_config(&rpc(Some("grpc"), Some("x"))),
            Err(ExecError::UnsupportedIoTransport(Some(ref t))) if t == "grpc"
        ));
        assert!(matches!(
            Endpoint::from_config(&rpc(Some("http"), None)),
            Err(ExecError::Config(_))
        ));
        assert!(matches!(
            Endpoint::from_config(&rpc(Some("http"), Some("not a url"))),
            Err(ExecError::Config(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let param = json!({"foo": "bar"});
        let text = serde_json::to_string(&Request::new(3, "eval", &param)).unwrap();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":3,"method":"eval","params":[{"foo":"bar"}]}"#
        );
    }

    fn settle(text: &str, expected: u64) -> Option<Result<Value>> {
        match serde_json::from_str::<Response>(text).unwrap().settle(expected) {
            Reply::Done(result) => Some(result),
            Reply::Skip => None,
        }
    }

    #[test]
    fn test_response_settlement() {
        assert_eq!(
            settle(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#, 1)
                .unwrap()
                .unwrap(),
            json!({"ok": true})
        );
        assert!(settle(r#"{"jsonrpc":"2.0","method":"log","params":["hi"]}"#, 1).is_none());
        assert!(matches!(
            settle(r#"{"jsonrpc":"2.0","id":7,"result":1}"#, 1),
            Some(Err(ExecError::IdMismatch {
                expected: 1,
                actual: 7
            }))
        ));

        let err = settle(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom","data":"trace"}}"#,
            1,
        )
        .unwrap()
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker reported error: boom (code -32000): \"trace\""
        );
    }

    #[tokio::test]
    async fn test_retry_dial_gives_up_after_limit() {
        let cancel = CancellationToken::new();
        let result: Result<()> = retry_dial(
            Duration::from_millis(200),
            &cancel,
            std::future::pending(),
            || async { Err(ExecError::Transport("refused".into())) },
        )
        .await;
        assert!(matches!(result, Err(ExecError::Transport(_))));
    }

    #[tokio::test]
    async fn test_retry_dial_stops_when_worker_exits() {
        let cancel = CancellationToken::new();
        let exited = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ExitEvent::classify(crate::process::WaitOutcome::Exited(2), "no port".into())
        };
        let result: Result<()> = retry_dial(Duration::from_secs(30), &cancel, exited, || async {
            Err(ExecError::Transport("refused".into()))
        })
        .await;
        assert!(matches!(result, Err(ExecError::WorkerExited(ref e)) if e.code == Some(2)));
    }

    #[tokio::test]
    async fn test_retry_dial_eventually_succeeds() {
        let cancel = CancellationToken::new();
        let mut tries = 0;
        let value = retry_dial(
            Duration::from_secs(5),
            &cancel,
            std::future::pending(),
            || {
                tries += 1;
                let attempt = tries;
                async move {
                    if attempt >= 3 {
                        Ok(attempt)
                    } else {
                        Err(ExecError::Transport("not yet".into()))
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
    }
}
