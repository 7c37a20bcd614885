use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use shared_types::SupervisorConfig;

use crate::error::{ExecError, Result};
use crate::release::Release;
use crate::worker::Worker;

/// Starts the worker eagerly and exchanges line-framed messages over its pipes.
#[derive(Debug)]
pub struct StdioAdapter {
    config: Arc<SupervisorConfig>,
    worker: Worker,
}

impl StdioAdapter {
    pub fn new(config: Arc<SupervisorConfig>) -> Self {
        Self {
            config,
            worker: Worker::new(),
        }
    }

    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        self.worker.start(&self.config.start)
    }

    pub async fn send(&mut self, data: &Value, cancel: &CancellationToken) -> Result<Value> {
        self.worker.send(data, &self.config.send, cancel).await
    }

    pub async fn stop(&mut self) -> Result<Release> {
        self.worker.stop(&self.config.stop).await
    }
}
