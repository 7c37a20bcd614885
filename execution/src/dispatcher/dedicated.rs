use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use shared_types::{StatusSnapshot, Strategy, SupervisorConfig};

use super::Dispatch;
use crate::error::{ExecError, Result, ResultExt};
use crate::supervisor::{SendResult, Supervisor};

/// One supervisor serializing all traffic.
pub struct DedicatedDispatcher {
    supervisor: Supervisor,
    closed: CancellationToken,
}

impl DedicatedDispatcher {
    pub fn new(worker: SupervisorConfig) -> Result<Self> {
        if !worker.persistent {
            warn!("dedicated dispatcher over a transient worker boots one worker per send");
        }
        Ok(Self {
            supervisor: Supervisor::new(worker)?,
            closed: CancellationToken::new(),
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ExecError::ShutDown);
        }
        Ok(())
    }

    /// Drops a worker that failed mid-exchange so the next send boots a fresh one.
    async fn reset(&self) {
        let result = match self.supervisor.shutdown().await {
            Ok(release) => release.wait().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(supervisor = self.supervisor.id(), error = %e, "worker teardown after failed send failed");
        }
    }
}

#[async_trait]
impl Dispatch for DedicatedDispatcher {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        self.supervisor.start(cancel).await?;
        info!(supervisor = self.supervisor.id(), "dedicated dispatcher started");
        Ok(())
    }

    async fn send(&self, data: &Value, cancel: &CancellationToken) -> Result<Value> {
        self.ensure_open()?;
        match self.supervisor.send(data, cancel).await {
            Ok(SendResult { data, release }) => {
                if let Some(release) = release {
                    release.wait().await.stage("release")?;
                }
                Ok(data)
            }
            Err(e) => {
                self.reset().await;
                Err(e)
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.cancel();
        self.supervisor.shutdown().await?.wait().await?;
        info!(supervisor = self.supervisor.id(), "dedicated dispatcher shut down");
        Ok(())
    }

    fn status(&self) -> StatusSnapshot {
        let (in_use, idle) = match self.supervisor.try_is_active() {
            None => (1, 0),
            Some(true) => (0, 1),
            Some(false) => (0, 0),
        };
        let stats = self.supervisor.stats();
        StatusSnapshot {
            strategy: Strategy::Dedicated,
            max_workers: 1,
            in_use,
            idle,
            boots: stats.boots(),
            stops: stats.stops(),
            sends: stats.sends(),
            failures: stats.failures(),
        }
    }
}
