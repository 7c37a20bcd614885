//! Exit classification for worker processes.

use std::fmt;

/// Raw outcome of waiting on an OS process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(i32),
    /// Neither a code nor a signal could be determined (wait failed,
    /// waiter vanished).
    Unknown,
}

impl From<std::process::ExitStatus> for WaitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return WaitOutcome::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return WaitOutcome::Signaled(signal);
            }
        }
        WaitOutcome::Unknown
    }
}

/// Why a worker process ended, plus whatever it wrote to stderr.
///
/// Exactly one of `code` / `signal` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub stderr: String,
}

impl ExitEvent {
    /// Exit code synthesized when the wait outcome is indeterminate.
    pub const INDETERMINATE_CODE: i32 = 1;

    pub fn classify(outcome: WaitOutcome, stderr: String) -> Self {
        let (code, signal) = match outcome {
            WaitOutcome::Signaled(signal) => (None, Some(signal)),
            WaitOutcome::Exited(code) => (Some(code), None),
            WaitOutcome::Unknown => (Some(Self::INDETERMINATE_CODE), None),
        };
        Self {
            code,
            signal,
            stderr,
        }
    }

    pub(crate) fn indeterminate() -> Self {
        Self::classify(WaitOutcome::Unknown, String::new())
    }

    /// Success means a zero exit code; any signal is a failure.
    pub fn is_success(&self) -> bool {
        self.signal.is_none() && self.code == Some(0)
    }
}

impl fmt::Display for ExitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (_, Some(signal)) => write!(f, "killed by signal {signal}")?,
            (Some(code), None) => write!(f, "exited with code {code}")?,
            (None, None) => write!(f, "exited for an unknown reason")?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}
