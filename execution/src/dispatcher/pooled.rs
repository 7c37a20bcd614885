use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared_types::{DispatcherConfig, StatusSnapshot, Strategy, SupervisorConfig};

use super::pool::{Lease, Manage, Pool};
use super::Dispatch;
use crate::error::{ExecError, Result, ResultExt};
use crate::release::Release;
use crate::supervisor::{SendResult, Supervisor, SupervisorStats};

struct SupervisorFactory {
    config: Arc<SupervisorConfig>,
    stats: Arc<SupervisorStats>,
}

#[async_trait]
impl Manage<Supervisor> for SupervisorFactory {
    async fn construct(&self, cancel: &CancellationToken) -> Result<Supervisor> {
        let supervisor = Supervisor::with_stats(self.config.clone(), self.stats.clone())?;
        supervisor.start(cancel).await?;
        debug!(supervisor = supervisor.id(), "pooled supervisor constructed");
        Ok(supervisor)
    }

    async fn destroy(&self, supervisor: Supervisor) {
        let id = supervisor.id();
        let result = match supervisor.shutdown().await {
            Ok(release) => release.wait().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(supervisor = id, "pooled supervisor destroyed"),
            Err(e) => warn!(supervisor = id, error = %e, "pooled supervisor teardown failed"),
        }
    }
}

/// Up to `max_workers` supervisors, each checked out to one caller at a time.
pub struct PooledDispatcher {
    pool: Pool<Supervisor>,
    stats: Arc<SupervisorStats>,
    warm_workers: usize,
}

impl PooledDispatcher {
    pub fn new(worker: SupervisorConfig, config: &DispatcherConfig) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(ExecError::InvalidMaxWorkers(config.max_workers));
        }
        let worker = Arc::new(worker);
        Supervisor::validate(&worker)?;

        let stats = Arc::new(SupervisorStats::default());
        let factory = SupervisorFactory {
            config: worker,
            stats: stats.clone(),
        };
        Ok(Self {
            pool: Pool::new(factory, config.max_workers)?,
            stats,
            warm_workers: config.warm_workers.min(config.max_workers),
        })
    }

    pub fn stats(&self) -> &Arc<SupervisorStats> {
        &self.stats
    }
}

#[async_trait]
impl Dispatch for PooledDispatcher {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let mut warmed = Vec::with_capacity(self.warm_workers);
        for _ in 0..self.warm_workers {
            warmed.push(self.pool.acquire(cancel).await.stage("warm")?);
        }
        warmed.into_iter().for_each(Lease::release);
        info!(
            max_workers = self.pool.max_size(),
            warm = self.warm_workers,
            "pooled dispatcher started"
        );
        Ok(())
    }

    async fn send(&self, data: &Value, cancel: &CancellationToken) -> Result<Value> {
        let lease = self.pool.acquire(cancel).await.stage("acquire")?;
        match lease.send(data, cancel).await {
            Ok(SendResult { data, release }) => {
                self.pool.spawn(dispose(lease, release));
                Ok(data)
            }
            Err(e) => {
                lease.destroy();
                Err(e)
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.pool.close().await;
        info!("pooled dispatcher shut down");
        Ok(())
    }

    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            strategy: Strategy::Pooled,
            max_workers: self.pool.max_size(),
            in_use: self.pool.in_use(),
            idle: self.pool.idle(),
            boots: self.stats.boots(),
            stops: self.stats.stops(),
            sends: self.stats.sends(),
            failures: self.stats.failures(),
        }
    }
}

/// Waits out a send's teardown, then recycles the supervisor or discards it.
async fn dispose(lease: Lease<Supervisor>, release: Option<Release>) {
    let Some(release) = release else {
        lease.destroy();
        return;
    };
    match release.wait().await {
        Ok(()) => lease.release(),
        Err(e) => {
            warn!(supervisor = lease.id(), error = %e, "worker release failed, discarding supervisor");
            lease.destroy();
        }
    }
}
