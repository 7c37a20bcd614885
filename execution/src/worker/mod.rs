//! Worker: a [`Process`] plus the message exchange spoken over its pipes.

mod message;

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared_types::{SendSpec, StartSpec, StopSpec};

use crate::codec::FrameCodec;
use crate::deadline::{bounded, limit_from_millis};
use crate::error::{ExecError, Result};
use crate::process::{ExitEvent, Pipes, Process, Termination, WaitPolicy};
use crate::release::Release;

pub use message::Message;

/// How long `send` waits for an exit event after the worker closes stdout.
const EXIT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Worker {
    process: Option<Process>,
    transport: Option<Framed<Pipes, FrameCodec>>,
    next_id: u64,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    pub fn new() -> Self {
        Self {
            process: None,
            transport: None,
            next_id: 1,
        }
    }

    pub fn start(&mut self, spec: &StartSpec) -> Result<()> {
        if self.process.is_some() {
            return Err(ExecError::AlreadyStarted);
        }
        let process = Process::start(spec)?;
        info!(pid = process.pid(), cmd = %spec.cmd, "worker started");
        self.process = Some(process);
        self.transport = None;
        self.next_id = 1;
        Ok(())
    }

    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.process.is_some()
    }

    /// Hands the raw pipes to a caller that speaks its own protocol.
    pub fn take_pipes(&mut self) -> Option<Pipes> {
        self.process.as_mut()?.take_pipes()
    }

    pub async fn wait(&self) -> Result<ExitEvent> {
        let process = self.process.as_ref().ok_or(ExecError::NotStarted)?;
        Ok(process.wait().await)
    }

    /// Waits for exit, bounded by `limit` (if any) and by `cancel`.
    pub async fn wait_for(
        &self,
        cancel: &CancellationToken,
        limit: Option<Duration>,
    ) -> Result<ExitEvent> {
        let process = self.process.as_ref().ok_or(ExecError::NotStarted)?;
        bounded(cancel, limit, async { Ok(process.wait().await) }).await
    }

    /// Sends `data` and returns the payload of the matching reply.
    pub async fn send(
        &mut self,
        data: &Value,
        spec: &SendSpec,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let process = self.process.as_mut().ok_or(ExecError::NotStarted)?;
        if self.transport.is_none() {
            let pipes = process.take_pipes().ok_or_else(|| {
                ExecError::Protocol("worker pipes are owned by another client".to_string())
            })?;
            self.transport = Some(Framed::new(pipes, FrameCodec::lines()));
        }
        let (Some(process), Some(transport)) = (self.process.as_ref(), self.transport.as_mut())
        else {
            return Err(ExecError::NotStarted);
        };

        let id = self.next_id;
        self.next_id += 1;
        let line = serde_json::to_vec(&Message::request(id, data.clone()))?;
        let pid = process.pid();

        let exchange = async {
            if let Err(e) = transport.send(Bytes::from(line)).await {
                return Err(exited_or(process, e).await);
            }
            debug!(pid, id, "request written");

            while let Some(frame) = transport.next().await {
                let frame = frame?;
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let reply: Message = serde_json::from_slice(&frame)?;
                if reply.id != id {
                    return Err(ExecError::IdMismatch {
                        expected: id,
                        actual: reply.id,
                    });
                }
                if let Some(error) = reply.error {
                    return Err(ExecError::WorkerReported(error));
                }
                debug!(pid, id, "reply received");
                return Ok(reply.data.unwrap_or(Value::Null));
            }

            Err(exited_or(
                process,
                ExecError::Protocol("worker closed stdout before replying".to_string()),
            )
            .await)
        };

        bounded(cancel, limit_from_millis(spec.timeout_ms), exchange).await
    }

    /// Signals the worker now and returns the wait for its exit.
    ///
    /// With a bounded stop timeout the release escalates to SIGKILL when the
    /// worker outlives it, and still reports [`ExecError::KillTimeout`].
    pub async fn stop(&mut self, spec: &StopSpec) -> Result<Release> {
        self.transport = None;
        let Some(mut process) = self.process.take() else {
            return Ok(Release::ready());
        };

        let policy = WaitPolicy::from(spec);
        let pid = process.pid();
        if process.terminate(WaitPolicy::Detached).await? == Termination::AlreadyExited {
            debug!(pid, "worker already exited");
            return Ok(Release::ready());
        }
        info!(pid, ?policy, "worker stopping");

        match policy {
            WaitPolicy::Detached => {
                process.detach();
                Ok(Release::ready())
            }
            WaitPolicy::Unbounded => Ok(Release::new(async move {
                process.wait().await;
                Ok(())
            })),
            WaitPolicy::Bounded(limit) => Ok(Release::new(confirm_exit(process, limit))),
        }
    }
}

async fn confirm_exit(mut process: Process, limit: Duration) -> Result<()> {
    if tokio::time::timeout(limit, process.wait()).await.is_ok() {
        return Ok(());
    }
    warn!(pid = process.pid(), ?limit, "worker ignored SIGTERM, sending SIGKILL");
    if let Err(e) = process.kill(WaitPolicy::Bounded(limit)).await {
        warn!(pid = process.pid(), error = %e, "worker exit still unconfirmed after SIGKILL");
    }
    Err(ExecError::KillTimeout(limit))
}

/// Prefers the worker's exit over a pipe error when the pipe broke because it died.
async fn exited_or(process: &Process, error: ExecError) -> ExecError {
    match tokio::time::timeout(EXIT_GRACE, process.wait()).await {
        Ok(event) => ExecError::WorkerExited(event),
        Err(_) => error,
    }
}
