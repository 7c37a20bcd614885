//! Adapters: one per IO mode, each knowing how to start a worker, push one
//! unit of work through it and stop it.

mod file;
mod rpc;
mod stdio;

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use shared_types::{IoMode, SupervisorConfig};

use crate::error::Result;
use crate::release::Release;

pub use file::FileAdapter;
pub use rpc::RpcAdapter;
pub use stdio::StdioAdapter;

#[derive(Debug)]
pub enum Adapter {
    Stdio(StdioAdapter),
    File(FileAdapter),
    Rpc(RpcAdapter),
}

impl Adapter {
    /// Builds the adapter for `config.mode`, rejecting incomplete rpc settings.
    pub fn new(config: &Arc<SupervisorConfig>) -> Result<Self> {
        Ok(match config.mode {
            IoMode::Stdio => Adapter::Stdio(StdioAdapter::new(config.clone())),
            IoMode::File => Adapter::File(FileAdapter::new(config.clone())),
            IoMode::Rpc => Adapter::Rpc(RpcAdapter::new(config.clone())?),
        })
    }

    pub fn mode(&self) -> IoMode {
        match self {
            Adapter::Stdio(_) => IoMode::Stdio,
            Adapter::File(_) => IoMode::File,
            Adapter::Rpc(_) => IoMode::Rpc,
        }
    }

    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self {
            Adapter::Stdio(adapter) => adapter.start(cancel).await,
            Adapter::File(adapter) => adapter.start(cancel).await,
            Adapter::Rpc(adapter) => adapter.start(cancel).await,
        }
    }

    pub async fn send(&mut self, data: &Value, cancel: &CancellationToken) -> Result<Value> {
        match self {
            Adapter::Stdio(adapter) => adapter.send(data, cancel).await,
            Adapter::File(adapter) => adapter.send(data, cancel).await,
            Adapter::Rpc(adapter) => adapter.send(data, cancel).await,
        }
    }

    /// Signals the worker and returns the wait for its exit.
    pub async fn stop(&mut self) -> Result<Release> {
        match self {
            Adapter::Stdio(adapter) => adapter.stop().await,
            Adapter::File(adapter) => adapter.stop().await,
            Adapter::Rpc(adapter) => adapter.stop().await,
        }
    }
}
