//! Cancellation and timeout plumbing shared by every blocking operation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, Result};

/// Converts signed milliseconds into an optional bound; `<= 0` is unbounded.
pub fn limit_from_millis(timeout_ms: i64) -> Option<Duration> {
    u64::try_from(timeout_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Runs `fut` until it finishes, `limit` elapses or `cancel` fires.
pub async fn bounded<T, F>(cancel: &CancellationToken, limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let limited = async {
        match limit {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| ExecError::Timeout(limit))?,
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        result = limited => result,
    }
}
