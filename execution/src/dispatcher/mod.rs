//! Dispatchers fan concurrent callers out across supervisors.

mod dedicated;
pub mod pool;
mod pooled;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use shared_types::{ExecutionConfig, StatusSnapshot, Strategy};

use crate::error::Result;

pub use dedicated::DedicatedDispatcher;
pub use pooled::PooledDispatcher;

#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Brings workers up ahead of traffic where the strategy allows it.
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;

    async fn send(&self, data: &Value, cancel: &CancellationToken) -> Result<Value>;

    /// Stops accepting work and waits until every worker and pending cleanup
    /// is gone.
    async fn shutdown(&self) -> Result<()>;

    fn status(&self) -> StatusSnapshot;
}

/// Builds the dispatcher selected by `config.dispatcher.strategy`.
pub fn build_dispatcher(config: &ExecutionConfig) -> Result<Arc<dyn Dispatch>> {
    let dispatcher: Arc<dyn Dispatch> = match config.dispatcher.strategy {
        Strategy::Pooled => Arc::new(PooledDispatcher::new(
            config.worker.clone(),
            &config.dispatcher,
        )?),
        Strategy::Dedicated => Arc::new(DedicatedDispatcher::new(config.worker.clone())?),
    };
    Ok(dispatcher)
}
