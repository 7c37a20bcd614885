//! Bounded resource pool with tracked background disposal.

use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{ExecError, Result};

/// Builds and disposes of pooled resources.
#[async_trait]
pub trait Manage<T>: Send + Sync + 'static {
    async fn construct(&self, cancel: &CancellationToken) -> Result<T>;

    async fn destroy(&self, resource: T);
}

pub struct Pool<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    manager: Arc<dyn Manage<T>>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<T>>,
    tracker: TaskTracker,
    closing: CancellationToken,
    max_size: usize,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new<M>(manager: M, max_size: usize) -> Result<Self>
    where
        M: Manage<T>,
    {
        if max_size == 0 {
            return Err(ExecError::InvalidMaxWorkers(max_size));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                manager: Arc::new(manager),
                permits: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(Vec::new()),
                tracker: TaskTracker::new(),
                closing: CancellationToken::new(),
                max_size,
            }),
        })
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Leases currently checked out, including ones still being disposed of.
    pub fn in_use(&self) -> usize {
        self.inner
            .max_size
            .saturating_sub(self.inner.permits.available_permits())
    }

    pub fn idle(&self) -> usize {
        self.inner.idle().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Waits for a free slot, then reuses an idle resource or constructs one.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Lease<T>> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            _ = self.inner.closing.cancelled() => return Err(ExecError::ShutDown),
            permit = self.inner.permits.clone().acquire_owned() => {
                permit.map_err(|_| ExecError::ShutDown)?
            }
        };

        let reused = self.inner.idle().pop();
        let resource = match reused {
            Some(resource) => resource,
            None => self.inner.manager.construct(cancel).await?,
        };
        Ok(Lease {
            resource: Some(resource),
            permit: Some(permit),
            pool: self.inner.clone(),
        })
    }

    /// Runs `fut` on the pool's tracker so [`Pool::close`] waits for it.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(fut);
    }

    /// Rejects new acquisitions, waits for every lease to come back, destroys
    /// idle resources and waits for outstanding disposals.
    pub async fn close(&self) {
        self.inner.closing.cancel();

        let max = u32::try_from(self.inner.max_size).unwrap_or(u32::MAX);
        let drained = self.inner.permits.clone().acquire_many_owned(max).await;

        let idle = std::mem::take(&mut *self.inner.idle());
        debug!(count = idle.len(), "destroying idle pool resources");
        for resource in idle {
            self.inner.manager.destroy(resource).await;
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.permits.close();
        drop(drained);
    }
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Inner<T> {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive use of one pooled resource.
///
/// Must end in [`Lease::release`] or [`Lease::destroy`]; a lease dropped
/// without either is destroyed, since it may have been abandoned mid-exchange.
pub struct Lease<T: Send + 'static> {
    resource: Option<T>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<Inner<T>>,
}

impl<T: Send + 'static> Lease<T> {
    /// Returns the resource to the idle list.
    pub fn release(mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        if self.pool.closing.is_cancelled() {
            self.resource = Some(resource);
            self.discard();
            return;
        }
        self.pool.idle().push(resource);
        self.permit.take();
    }

    pub fn destroy(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let permit = self.permit.take();
        let manager = self.pool.manager.clone();
        self.pool.tracker.spawn(async move {
            manager.destroy(resource).await;
            drop(permit);
        });
    }
}

impl<T: Send + 'static> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("lease resource is only taken when the lease is consumed"),
        }
    }
}

impl<T: Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if self.resource.is_some() {
            warn!("pool lease dropped without release, destroying its resource");
            self.discard();
        }
    }
}
