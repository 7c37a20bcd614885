//! Supervisor: owns one worker's lifetime and applies the persistent or
//! transient reuse policy.
//!
//! States are `Idle` (no adapter) and `Active` (adapter with a running
//! worker). The adapter slot sits behind an async mutex, so sends through one
//! supervisor are serialized even when it is shared outside a pool.
//!
//! A send that is dropped, times out or is cancelled mid-exchange leaves its
//! reply unread. The worker is then out of step with its callers, so the next
//! send replaces it before going on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared_types::{IoMode, SupervisorConfig};

use crate::adapter::Adapter;
use crate::error::{ExecError, Result, ResultExt};
use crate::release::Release;

/// Counters shared by every supervisor a dispatcher creates.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    next_id: AtomicU64,
    boots: AtomicU64,
    stops: AtomicU64,
    sends: AtomicU64,
    failures: AtomicU64,
}

impl SupervisorStats {
    pub fn boots(&self) -> u64 {
        self.boots.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }

    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A response plus the deferred wait for any teardown it triggered.
#[derive(Debug)]
pub struct SendResult {
    pub data: Value,
    pub release: Option<Release>,
}

#[derive(Debug)]
pub struct Supervisor {
    id: u64,
    config: Arc<SupervisorConfig>,
    adapter: Mutex<Option<Adapter>>,
    /// Set while an exchange is in flight; only touched under the adapter lock.
    exchanging: AtomicBool,
    stats: Arc<SupervisorStats>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        Self::with_stats(Arc::new(config), Arc::default())
    }

    /// Validates `config` up front; nothing is spawned until first use.
    pub fn with_stats(config: Arc<SupervisorConfig>, stats: Arc<SupervisorStats>) -> Result<Self> {
        Self::validate(&config)?;
        let id = stats.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Self {
            id,
            config,
            adapter: Mutex::new(None),
            exchanging: AtomicBool::new(false),
            stats,
        })
    }

    /// Rejects static misconfiguration.
    pub fn validate(config: &Arc<SupervisorConfig>) -> Result<()> {
        if config.persistent && config.mode == IoMode::File {
            return Err(ExecError::InvalidPersistentFileIo);
        }
        Adapter::new(config).map(drop)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_persistent(&self) -> bool {
        self.config.persistent
    }

    pub fn stats(&self) -> &Arc<SupervisorStats> {
        &self.stats
    }

    pub async fn is_active(&self) -> bool {
        self.adapter.lock().await.is_some()
    }

    /// `None` while a send holds the worker.
    pub fn try_is_active(&self) -> Option<bool> {
        self.adapter.try_lock().ok().map(|slot| slot.is_some())
    }

    /// Boots the worker ahead of the first send. A no-op for transient supervisors.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.config.persistent {
            return Ok(());
        }
        let mut slot = self.adapter.lock().await;
        self.boot(&mut slot, cancel).await.map(drop)
    }

    pub async fn send(&self, data: &Value, cancel: &CancellationToken) -> Result<SendResult> {
        let mut slot = self.adapter.lock().await;
        SupervisorStats::bump(&self.stats.sends);

        let result = match self.boot(&mut slot, cancel).await {
            Ok(adapter) => {
                self.exchanging.store(true, Ordering::Relaxed);
                let result = adapter.send(data, cancel).await.stage("send");
                // A timed-out or cancelled exchange may still be answered later.
                if !matches!(&result, Err(e) if e.is_timeout()) {
                    self.exchanging.store(false, Ordering::Relaxed);
                }
                result
            }
            Err(e) => Err(e),
        };
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                SupervisorStats::bump(&self.stats.failures);
                debug!(supervisor = self.id, error = %e, "send failed");
                return Err(e);
            }
        };

        let release = if self.config.persistent {
            Release::ready()
        } else {
            match self.teardown(&mut slot).await {
                Ok(release) => release,
                Err(e) => {
                    warn!(supervisor = self.id, error = %e, "transient worker teardown failed");
                    Release::new(async move { Err(e.teardown()) })
                }
            }
        };
        Ok(SendResult {
            data,
            release: Some(release),
        })
    }

    /// Tears a transient worker down now; persistent workers stay warm.
    pub async fn suspend(&self) -> Result<Release> {
        if self.config.persistent {
            return Ok(Release::ready());
        }
        let mut slot = self.adapter.lock().await;
        self.teardown(&mut slot).await
    }

    /// Tears the worker down regardless of policy.
    pub async fn shutdown(&self) -> Result<Release> {
        let mut slot = self.adapter.lock().await;
        self.teardown(&mut slot).await
    }

    async fn boot<'a>(
        &self,
        slot: &'a mut Option<Adapter>,
        cancel: &CancellationToken,
    ) -> Result<&'a mut Adapter> {
        if self.exchanging.swap(false, Ordering::Relaxed) {
            self.discard_interrupted(slot).await;
        }
        if slot.is_none() {
            let mut adapter = Adapter::new(&self.config)?;
            adapter.start(cancel).await.stage("boot")?;
            SupervisorStats::bump(&self.stats.boots);
            info!(
                supervisor = self.id,
                mode = %self.config.mode,
                persistent = self.config.persistent,
                cmd = %self.config.start.cmd,
                "worker booted"
            );
            *slot = Some(adapter);
        }
        slot.as_mut().ok_or(ExecError::NotStarted)
    }

    /// Drops a worker whose last exchange was abandoned before the reply was read.
    async fn discard_interrupted(&self, slot: &mut Option<Adapter>) {
        if slot.is_none() {
            return;
        }
        warn!(supervisor = self.id, "previous send was abandoned mid-exchange, replacing worker");
        match self.teardown(slot).await {
            // Unawaited: a worker still running when the release drops is killed.
            Ok(release) => drop(release),
            Err(e) => warn!(supervisor = self.id, error = %e, "abandoned worker teardown failed"),
        }
    }

    async fn teardown(&self, slot: &mut Option<Adapter>) -> Result<Release> {
        let Some(mut adapter) = slot.take() else {
            return Ok(Release::ready());
        };
        SupervisorStats::bump(&self.stats.stops);
        info!(supervisor = self.id, mode = %adapter.mode(), "worker stopping");
        adapter.stop().await.stage("stop")
    }
}
