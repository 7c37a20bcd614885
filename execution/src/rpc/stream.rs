use std::fmt;
use std::path::Path;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use super::{Reply, Request, Response};
use crate::codec::FrameCodec;
use crate::error::{ExecError, Result};

pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// JSON-RPC over any framed byte stream: worker pipes or an ipc socket.
pub struct StreamClient {
    framed: Framed<Box<dyn Duplex>, FrameCodec>,
    next_id: u64,
}

impl StreamClient {
    pub fn new<S>(stream: S, codec: FrameCodec) -> Self
    where
        S: Duplex + 'static,
    {
        Self {
            framed: Framed::new(Box::new(stream), codec),
            next_id: 1,
        }
    }

    pub async fn call(&mut self, method: &str, param: &Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let body = serde_json::to_vec(&Request::new(id, method, param))?;
        self.framed.send(Bytes::from(body)).await?;

        while let Some(frame) = self.framed.next().await {
            let response: Response = serde_json::from_slice(&frame?)?;
            match response.settle(id) {
                Reply::Done(result) => return result,
                Reply::Skip => continue,
            }
        }
        Err(ExecError::Protocol(
            "rpc stream closed before the response arrived".to_string(),
        ))
    }
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("codec", self.framed.codec())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(unix)]
pub(super) async fn connect_ipc(path: &Path) -> Result<StreamClient> {
    let socket = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| ExecError::Transport(format!("connect {}: {e}", path.display())))?;
    Ok(StreamClient::new(socket, FrameCodec::lines()))
}

#[cfg(windows)]
pub(super) async fn connect_ipc(path: &Path) -> Result<StreamClient> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe = ClientOptions::new()
        .open(path)
        .map_err(|e| ExecError::Transport(format!("open {}: {e}", path.display())))?;
    Ok(StreamClient::new(pipe, FrameCodec::lines()))
}
