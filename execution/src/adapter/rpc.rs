use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shared_types::{RpcConfig, SupervisorConfig};

use crate::deadline::{bounded, limit_from_millis};
use crate::error::{ExecError, Result, ResultExt};
use crate::release::Release;
use crate::rpc::{Endpoint, RpcClient};
use crate::worker::Worker;

/// Starts the worker, dials its rpc endpoint and keeps the client until stop.
#[derive(Debug)]
pub struct RpcAdapter {
    config: Arc<SupervisorConfig>,
    endpoint: Endpoint,
    worker: Worker,
    client: Option<RpcClient>,
}

impl RpcAdapter {
    pub fn new(config: Arc<SupervisorConfig>) -> Result<Self> {
        let endpoint = Endpoint::from_config(rpc_config(&config)?)?;
        Ok(Self {
            config,
            endpoint,
            worker: Worker::new(),
            client: None,
        })
    }

    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        let rpc = rpc_config(&self.config)?;
        self.worker.start(&self.config.start)?;

        let pipes = match self.endpoint {
            Endpoint::Stdio => self.worker.take_pipes(),
            _ => None,
        };
        let dialed = match self.worker.process() {
            Some(process) => {
                let dial_timeout = Duration::from_millis(rpc.dial_timeout_ms);
                self.endpoint
                    .connect(pipes, dial_timeout, cancel, process.wait())
                    .await
            }
            None => Err(ExecError::NotStarted),
        };

        match dialed {
            Ok(client) => {
                debug!(transport = self.endpoint.transport(), "rpc client connected");
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                // Do not leave an unreachable worker running.
                match self.worker.stop(&self.config.stop).await {
                    Ok(release) => {
                        if let Err(stop_err) = release.wait().await {
                            warn!(error = %stop_err, "stopping undialable rpc worker failed");
                        }
                    }
                    Err(stop_err) => {
                        warn!(error = %stop_err, "stopping undialable rpc worker failed")
                    }
                }
                Err(e).stage("dial")
            }
        }
    }

    pub async fn send(&mut self, data: &Value, cancel: &CancellationToken) -> Result<Value> {
        let method = rpc_config(&self.config)?.method.as_str();
        let client = self.client.as_mut().ok_or(ExecError::NotStarted)?;
        let limit = limit_from_millis(self.config.send.timeout_ms);
        bounded(cancel, limit, client.call(method, data)).await
    }

    pub async fn stop(&mut self) -> Result<Release> {
        self.client = None;
        self.worker.stop(&self.config.stop).await
    }
}

fn rpc_config(config: &SupervisorConfig) -> Result<&RpcConfig> {
    config
        .rpc
        .as_ref()
        .ok_or(ExecError::UnsupportedIoTransport(None))
}
