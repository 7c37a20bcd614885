//! Deferred cleanup handed back to callers.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;

/// A pending wait for a worker's teardown.
///
/// Stopping a worker signals it right away; the returned `Release` is what
/// blocks until the process is confirmed gone. Callers decide when (and on
/// which task) to await it. Dropping it unawaited skips the wait; a worker
/// that is still running at that point is killed outright.
#[must_use = "a Release should be awaited to confirm the worker exited"]
pub struct Release {
    pending: Option<BoxFuture<'static, Result<()>>>,
}

impl Release {
    /// A release with nothing left to wait for.
    pub fn ready() -> Self {
        Self { pending: None }
    }

    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            pending: Some(fut.boxed()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.pending.is_none()
    }

    pub async fn wait(self) -> Result<()> {
        match self.pending {
            Some(pending) => pending.await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("ready", &self.is_ready())
            .finish()
    }
}
