//! Error types for the execution core.
//!
//! Every failure in the dispatcher → supervisor → adapter → worker → process
//! stack is an [`ExecError`]. Errors bubble up unchanged, optionally wrapped
//! with the stage that failed ([`ResultExt::stage`]). [`ExecError::kind`] sorts
//! them into the classes callers act on (retry on timeout, fix configuration,
//! discard a worker on protocol errors).

use std::time::Duration;

use thiserror::Error;

use crate::process::ExitEvent;

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `persistent = true` combined with `mode = "file"`.
    #[error("file IO mode cannot be used with a persistent worker")]
    InvalidPersistentFileIo,

    #[error("unsupported rpc transport: {0:?}")]
    UnsupportedIoTransport(Option<String>),

    #[error("max workers must be positive, got {0}")]
    InvalidMaxWorkers(usize),

    #[error("failed to spawn `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker already started")]
    AlreadyStarted,

    #[error("worker not started")]
    NotStarted,

    #[error("message id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: u64, actual: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame exceeds limit of {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The worker answered, but with an error instead of a result.
    #[error("worker reported error: {0}")]
    WorkerReported(String),

    #[error("worker exited before responding ({0})")]
    WorkerExited(ExitEvent),

    /// The signal was delivered but exit was not confirmed in time.
    #[error("process exit not confirmed within {0:?}")]
    KillTimeout(Duration),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("dispatcher is shut down")]
    ShutDown,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("teardown failed: {source}")]
    Teardown {
        #[source]
        source: Box<ExecError>,
    },

    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<ExecError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Static misconfiguration, reported at construction time.
    Config,
    /// The worker program could not be launched.
    Spawn,
    /// Start/stop called in the wrong state.
    Lifecycle,
    /// The worker violated the exchange protocol or reported a failure.
    Protocol,
    /// A deadline elapsed or the caller cancelled.
    Timeout,
    /// Terminating a worker failed after the result was produced.
    Teardown,
    /// The dispatcher no longer accepts work.
    ShutDown,
    /// IO or transport failure talking to the worker.
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Spawn => "spawn",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Teardown => "teardown",
            ErrorKind::ShutDown => "shut_down",
            ErrorKind::Transport => "transport",
        }
    }
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Config(_)
            | ExecError::InvalidPersistentFileIo
            | ExecError::UnsupportedIoTransport(_)
            | ExecError::InvalidMaxWorkers(_) => ErrorKind::Config,
            ExecError::Spawn { .. } => ErrorKind::Spawn,
            ExecError::AlreadyStarted | ExecError::NotStarted => ErrorKind::Lifecycle,
            ExecError::IdMismatch { .. }
            | ExecError::Protocol(_)
            | ExecError::FrameTooLarge { .. }
            | ExecError::WorkerReported(_)
            | ExecError::WorkerExited(_)
            | ExecError::Json(_) => ErrorKind::Protocol,
            ExecError::KillTimeout(_) | ExecError::Timeout(_) | ExecError::Cancelled => {
                ErrorKind::Timeout
            }
            ExecError::Teardown { .. } => ErrorKind::Teardown,
            ExecError::ShutDown => ErrorKind::ShutDown,
            ExecError::Transport(_) | ExecError::Io(_) => ErrorKind::Transport,
            ExecError::Stage { source, .. } => source.kind(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::Config(_) => "config_invalid",
            ExecError::InvalidPersistentFileIo => "config_persistent_file_io",
            ExecError::UnsupportedIoTransport(_) => "config_unsupported_transport",
            ExecError::InvalidMaxWorkers(_) => "config_max_workers",
            ExecError::Spawn { .. } => "spawn_failed",
            ExecError::AlreadyStarted => "worker_already_started",
            ExecError::NotStarted => "worker_not_started",
            ExecError::IdMismatch { .. } => "protocol_id_mismatch",
            ExecError::Protocol(_) => "protocol_invalid",
            ExecError::FrameTooLarge { .. } => "protocol_frame_too_large",
            ExecError::WorkerReported(_) => "worker_reported",
            ExecError::WorkerExited(_) => "worker_exited",
            ExecError::KillTimeout(_) => "kill_timeout",
            ExecError::Timeout(_) => "timeout",
            ExecError::Cancelled => "cancelled",
            ExecError::ShutDown => "shut_down",
            ExecError::Transport(_) => "transport",
            ExecError::Teardown { .. } => "teardown",
            ExecError::Stage { source, .. } => source.as_label(),
            ExecError::Io(_) => "io",
            ExecError::Json(_) => "json",
        }
    }

    /// True for deadline and cancellation errors, which a caller may retry.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Strips [`ExecError::Stage`] wrappers.
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn teardown(self) -> Self {
        ExecError::Teardown {
            source: Box::new(self),
        }
    }
}

pub trait ResultExt<T> {
    /// Wraps the error with the name of the stage that produced it.
    fn stage(self, stage: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn stage(self, stage: &'static str) -> Result<T> {
        self.map_err(|source| ExecError::Stage {
            stage,
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_preserves_kind_and_label() {
        let err: Result<()> = Err(ExecError::IdMismatch {
            expected: 3,
            actual: 2,
        });
        let err = err.stage("send").stage("dispatch").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.as_label(), "protocol_id_mismatch");
        assert!(matches!(err.root(), ExecError::IdMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "dispatch: send: message id mismatch: expected 3, got 2"
        );
    }

    #[test]
    fn test_timeout_class() {
        assert!(ExecError::Cancelled.is_timeout());
        assert!(ExecError::KillTimeout(Duration::from_secs(1)).is_timeout());
        assert!(ExecError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!ExecError::Protocol("bad header".into()).is_timeout());
    }

    #[test]
    fn test_teardown_kind_wins_over_source() {
        let err = ExecError::KillTimeout(Duration::from_millis(10)).teardown();
        assert_eq!(err.kind(), ErrorKind::Teardown);
        assert_eq!(err.as_label(), "teardown");
    }

    #[test]
    fn test_config_errors() {
        for err in [
            ExecError::InvalidPersistentFileIo,
            ExecError::UnsupportedIoTransport(Some("smoke".into())),
            ExecError::InvalidMaxWorkers(0),
        ] {
            assert_eq!(err.kind(), ErrorKind::Config);
        }
    }
}
