use std::sync::Arc;

use serde_json::Value;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shared_types::{SupervisorConfig, REQUEST_FILE_ENV, RESPONSE_FILE_ENV};

use crate::deadline::limit_from_millis;
use crate::error::{ExecError, Result, ResultExt};
use crate::release::Release;
use crate::worker::Worker;

/// Launches one worker per send, exchanging data through a pair of temp files.
///
/// The worker gets the request and response paths both as two trailing
/// arguments and in `REQUEST_FILE_NAME` / `RESPONSE_FILE_NAME`, and must
/// write its JSON answer to the response file before exiting with status 0.
#[derive(Debug)]
pub struct FileAdapter {
    config: Arc<SupervisorConfig>,
    worker: Worker,
}

impl FileAdapter {
    pub fn new(config: Arc<SupervisorConfig>) -> Self {
        Self {
            config,
            worker: Worker::new(),
        }
    }

    /// Nothing to do until the request is known.
    pub async fn start(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    pub async fn send(&mut self, data: &Value, cancel: &CancellationToken) -> Result<Value> {
        // Both files are removed when these handles drop, whatever the outcome.
        let request = self.scratch_file("request-")?;
        let response = self.scratch_file("response-")?;

        let body = serde_json::to_vec(data)?;
        tokio::fs::write(request.path(), body)
            .await
            .map_err(ExecError::Io)
            .stage("write request file")?;

        let request_path = request.path().to_string_lossy().into_owned();
        let response_path = response.path().to_string_lossy().into_owned();
        let spec = self
            .config
            .start
            .clone()
            .arg(request_path.clone())
            .arg(response_path.clone())
            .env(REQUEST_FILE_ENV, request_path)
            .env(RESPONSE_FILE_ENV, response_path);

        self.worker.start(&spec)?;
        let limit = limit_from_millis(self.config.send.timeout_ms);
        let waited = self.worker.wait_for(cancel, limit).await;
        // Clears the slot for the next send. A worker still running after a
        // timeout is killed when the unawaited release drops.
        drop(self.worker.stop(&self.config.stop).await?);
        let event = waited?;

        if !event.is_success() {
            return Err(ExecError::WorkerExited(event));
        }

        let output = tokio::fs::read(response.path())
            .await
            .map_err(ExecError::Io)
            .stage("read response file")?;
        debug!(bytes = output.len(), "response file read");
        if output.iter().all(u8::is_ascii_whitespace) {
            return Err(ExecError::Protocol(
                "worker left the response file empty".to_string(),
            ));
        }
        Ok(serde_json::from_slice(&output)?)
    }

    pub async fn stop(&mut self) -> Result<Release> {
        self.worker.stop(&self.config.stop).await
    }

    fn scratch_file(&self, prefix: &str) -> Result<NamedTempFile> {
        let dir = self
            .config
            .file
            .dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".json")
            .tempfile_in(&dir)
            .map_err(ExecError::Io)
            .stage("create temp file")
    }
}
