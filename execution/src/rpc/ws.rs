use std::fmt;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Reply, Request, Response};
use crate::error::{ExecError, Result};

/// JSON-RPC over a websocket, one text frame per message.
pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl WsClient {
    /// Opens the websocket without an `Origin` header.
    pub async fn connect(url: &Url) -> Result<Self> {
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ExecError::Transport(format!("websocket connect {url}: {e}")))?;
        Ok(Self { socket, next_id: 1 })
    }

    pub async fn call(&mut self, method: &str, param: &Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let text = serde_json::to_string(&Request::new(id, method, param))?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| ExecError::Transport(format!("websocket send: {e}")))?;

        while let Some(message) = self.socket.next().await {
            let message =
                message.map_err(|e| ExecError::Transport(format!("websocket receive: {e}")))?;
            let response: Response = match message {
                Message::Text(text) => serde_json::from_str(&text)?,
                Message::Binary(bytes) => serde_json::from_slice(&bytes)?,
                Message::Close(_) => break,
                _ => continue,
            };
            match response.settle(id) {
                Reply::Done(result) => return result,
                Reply::Skip => continue,
            }
        }
        Err(ExecError::Transport(
            "websocket closed before the response arrived".to_string(),
        ))
    }
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
