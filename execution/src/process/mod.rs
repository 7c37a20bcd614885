//! Process handle for worker subprocesses.
//!
//! A [`Process`] owns one OS child: it is spawned in its own process group
//! with stdin/stdout/stderr piped, a background waiter reaps it and publishes
//! the classified [`ExitEvent`], and stderr is drained concurrently so a
//! chatty worker can never block on a full pipe.
//!
//! The waiter reports in two steps. The process counts as exited the moment
//! it is reaped; the [`ExitEvent`] follows once stderr reaches EOF, or after
//! a short grace when a leftover descendant still holds the pipe open.

mod exit;
pub mod platform;

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use shared_types::{StartSpec, StopSpec};

use crate::error::{ExecError, Result};

pub use exit::{ExitEvent, WaitOutcome};

/// Bytes of stderr kept for diagnostics; older output is discarded first.
const STDERR_CAPACITY: usize = 64 * 1024;

/// How long the waiter lingers for stderr EOF after the process exits.
/// Grandchildren can hold the pipe open indefinitely.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// How long a termination call waits for the process to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Signal and return immediately.
    Detached,
    /// Wait until the process exits, however long it takes.
    Unbounded,
    /// Wait at most this long, then report [`ExecError::KillTimeout`].
    Bounded(Duration),
}

impl WaitPolicy {
    /// Negative is fire-and-forget, zero waits forever, positive bounds the wait.
    pub fn from_millis(timeout_ms: i64) -> Self {
        match u64::try_from(timeout_ms) {
            Err(_) => WaitPolicy::Detached,
            Ok(0) => WaitPolicy::Unbounded,
            Ok(ms) => WaitPolicy::Bounded(Duration::from_millis(ms)),
        }
    }
}

impl From<&StopSpec> for WaitPolicy {
    fn from(spec: &StopSpec) -> Self {
        WaitPolicy::from_millis(spec.timeout_ms)
    }
}

#[derive(Debug, Clone)]
enum ExitState {
    Running,
    /// Reaped; stderr is still being collected.
    Reaped,
    Done(ExitEvent),
}

impl ExitState {
    fn event(&self) -> Option<&ExitEvent> {
        match self {
            ExitState::Done(event) => Some(event),
            _ => None,
        }
    }
}

/// What a termination call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited; no signal was sent.
    AlreadyExited,
    /// The signal was sent and the caller chose not to wait.
    Signalled,
    /// The signal was sent and the exit was confirmed.
    Exited,
}

pub struct Process {
    pid: u32,
    cmd: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    exit: watch::Receiver<ExitState>,
    kill_on_drop: bool,
}

impl Process {
    /// Spawn the program described by `spec`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(spec: &StartSpec) -> Result<Self> {
        let mut command = Command::new(&spec.cmd);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);

        let spawn_error = |source: io::Error| ExecError::Spawn {
            cmd: spec.cmd.clone(),
            source,
        };
        let mut child = command.spawn().map_err(spawn_error)?;
        let pid = child.id().ok_or_else(|| {
            spawn_error(io::Error::new(
                io::ErrorKind::Other,
                "process exited before its pid was read",
            ))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let buffer = StderrBuffer::new(STDERR_CAPACITY);
        let drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(buffer.clone().drain(stderr)));

        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => WaitOutcome::from(status),
                Err(e) => {
                    warn!(pid, error = %e, "waiting on worker process failed");
                    WaitOutcome::Unknown
                }
            };
            exit_tx.send_replace(ExitState::Reaped);
            if let Some(drain) = drain {
                if tokio::time::timeout(STDERR_DRAIN_GRACE, drain).await.is_err() {
                    debug!(pid, "stderr still open after exit, keeping what was captured");
                }
            }
            let event = ExitEvent::classify(outcome, buffer.text());
            debug!(pid, %event, "worker process exited");
            exit_tx.send_replace(ExitState::Done(event));
        });

        debug!(pid, cmd = %spec.cmd, "worker process spawned");
        Ok(Self {
            pid,
            cmd: spec.cmd.clone(),
            stdin,
            stdout,
            exit: exit_rx,
            kill_on_drop: true,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// The exit event, once the process has been reaped and its stderr collected.
    pub fn exit_event(&self) -> Option<ExitEvent> {
        self.exit.borrow().event().cloned()
    }

    /// True as soon as the process has been reaped.
    pub fn has_exited(&self) -> bool {
        !matches!(*self.exit.borrow(), ExitState::Running)
    }

    /// Takes stdout and stdin as one duplex stream.
    pub fn take_pipes(&mut self) -> Option<Pipes> {
        match (self.stdout.take(), self.stdin.take()) {
            (Some(stdout), Some(stdin)) => Some(Pipes { stdout, stdin }),
            (stdout, stdin) => {
                self.stdout = stdout;
                self.stdin = stdin;
                None
            }
        }
    }

    /// Blocks until the background waiter reports the exit.
    pub async fn wait(&self) -> ExitEvent {
        let mut exit = self.exit.clone();
        let event = match exit.wait_for(|state| state.event().is_some()).await {
            Ok(state) => state.event().cloned(),
            Err(_) => None,
        };
        event.unwrap_or_else(ExitEvent::indeterminate)
    }

    /// Graceful stop: SIGTERM to the process group.
    pub async fn terminate(&mut self, wait: WaitPolicy) -> Result<Termination> {
        self.signal(false, wait).await
    }

    /// Forceful stop: SIGKILL to the process group.
    pub async fn kill(&mut self, wait: WaitPolicy) -> Result<Termination> {
        self.signal(true, wait).await
    }

    /// Lets the process outlive this handle instead of killing it on drop.
    pub fn detach(mut self) {
        self.kill_on_drop = false;
    }

    async fn signal(&mut self, forceful: bool, wait: WaitPolicy) -> Result<Termination> {
        if self.has_exited() {
            return Ok(Termination::AlreadyExited);
        }

        // Close stdin first so a child blocked reading it can make progress.
        self.stdin.take();
        platform::kill_process_group(self.pid, forceful)?;
        debug!(pid = self.pid, forceful, "signalled worker process group");

        match wait {
            WaitPolicy::Detached => Ok(Termination::Signalled),
            WaitPolicy::Unbounded => {
                self.wait().await;
                Ok(Termination::Exited)
            }
            WaitPolicy::Bounded(limit) => match tokio::time::timeout(limit, self.wait()).await {
                Ok(_) => Ok(Termination::Exited),
                Err(_) => Err(ExecError::KillTimeout(limit)),
            },
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("cmd", &self.cmd)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if !self.kill_on_drop {
            return;
        }
        let result = if self.has_exited() {
            // Descendants left behind in the group; the group id cannot be
            // reused while any of them is alive.
            platform::kill_orphaned_group(self.pid)
        } else {
            platform::kill_process_group(self.pid, true)
        };
        if let Err(e) = result {
            warn!(pid = self.pid, error = %e, "failed to kill abandoned worker process");
        }
    }
}

/// A child's stdout and stdin joined into one duplex stream.
#[derive(Debug)]
pub struct Pipes {
    stdout: ChildStdout,
    stdin: ChildStdin,
}

impl AsyncRead for Pipes {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for Pipes {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdin).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_shutdown(cx)
    }
}

/// Ring buffer holding the tail of a worker's stderr.
#[derive(Clone)]
struct StderrBuffer {
    bytes: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
}

impl StderrBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    fn push(&self, chunk: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.extend(chunk);
        let overflow = bytes.len().saturating_sub(self.capacity);
        bytes.drain(..overflow);
    }

    fn text(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        let (head, tail) = bytes.as_slices();
        let mut joined = Vec::with_capacity(bytes.len());
        joined.extend_from_slice(head);
        joined.extend_from_slice(tail);
        String::from_utf8_lossy(&joined).into_owned()
    }

    async fn drain(self, mut stderr: ChildStderr) {
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => self.push(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "stderr drain stopped");
                    break;
                }
            }
        }
    }
}
