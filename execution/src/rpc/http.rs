use serde_json::Value;
use tokio::net::TcpStream;
use url::Url;

use super::{Reply, Request, Response};
use crate::error::{ExecError, Result};

/// JSON-RPC over HTTP POST, one request per call.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    url: Url,
    next_id: u64,
}

impl HttpClient {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            next_id: 1,
        }
    }

    pub async fn call(&mut self, method: &str, param: &Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let response = self
            .client
            .post(self.url.clone())
            .json(&Request::new(id, method, param))
            .send()
            .await
            .map_err(|e| ExecError::Transport(format!("POST {}: {e}", self.url)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ExecError::Transport(format!("reading response body: {e}")))?;

        let response: Response = match serde_json::from_slice(&body) {
            Ok(response) => response,
            Err(_) if !status.is_success() => {
                return Err(ExecError::Transport(format!(
                    "worker answered HTTP {status}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        match response.settle(id) {
            Reply::Done(result) => result,
            Reply::Skip => Err(ExecError::Protocol(
                "http response carried no id".to_string(),
            )),
        }
    }
}

/// Succeeds once something accepts TCP connections on the URL's host and port.
pub(super) async fn check_ready(url: &Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| ExecError::Config(format!("rpc url {url} has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ExecError::Config(format!("rpc url {url} has no port")))?;
    TcpStream::connect((host, port))
        .await
        .map(drop)
        .map_err(|e| ExecError::Transport(format!("connect {host}:{port}: {e}")))
}
