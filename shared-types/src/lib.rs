//! Shared types between the execution core and its front-ends
//!
//! These types are used by both:
//! - the `execution` crate (supervisors, adapters, dispatchers)
//! - the `gateway` binary (configuration loading, HTTP responses)
//!
//! Serializable with serde so they can be read from TOML and sent as JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable carrying the request file path in file IO mode.
pub const REQUEST_FILE_ENV: &str = "REQUEST_FILE_NAME";

/// Environment variable carrying the response file path in file IO mode.
pub const RESPONSE_FILE_ENV: &str = "RESPONSE_FILE_NAME";

// ============================================================================
// Process parameters
// ============================================================================

/// How to launch the external worker program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSpec {
    /// Binary path or name resolved through `PATH`
    pub cmd: String,

    /// Working directory; inherits the runtime's when unset
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Overlay merged on top of the inherited environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl StartSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Per-call limits for one request/response exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSpec {
    /// Zero (or negative) means unbounded.
    #[serde(default)]
    pub timeout_ms: i64,
}

/// Per-call limits for graceful termination.
///
/// `timeout_ms < 0` signals and returns without waiting, `0` waits until the
/// process exits, `> 0` waits at most that long before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSpec {
    #[serde(default = "default_stop_timeout_ms")]
    pub timeout_ms: i64,
}

impl Default for StopSpec {
    fn default() -> Self {
        Self {
            timeout_ms: default_stop_timeout_ms(),
        }
    }
}

fn default_stop_timeout_ms() -> i64 {
    5_000
}

// ============================================================================
// Supervisor configuration
// ============================================================================

/// How the runtime talks to a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// Id-correlated JSON lines over stdin/stdout
    #[default]
    Stdio,
    /// One process per call exchanging request/response temp files
    File,
    /// JSON-RPC over one of the [`RpcConfig`] transports
    Rpc,
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMode::Stdio => write!(f, "stdio"),
            IoMode::File => write!(f, "file"),
            IoMode::Rpc => write!(f, "rpc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// One of `stdio`, `ipc`, `http`, `ws`. Kept as text so an unknown value
    /// is reported as an unsupported transport rather than a parse failure.
    #[serde(default)]
    pub transport: Option<String>,

    /// Socket path / pipe name for `ipc`, URL for `http` and `ws`
    #[serde(default)]
    pub address: Option<String>,

    /// Method invoked for every send
    pub method: String,

    /// How long to keep dialing a freshly started worker
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

fn default_dial_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    /// Directory for request/response files; the system temp dir when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Everything one supervisor needs to manage its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Keep one worker alive across sends instead of one per send
    #[serde(default)]
    pub persistent: bool,

    #[serde(default)]
    pub mode: IoMode,

    #[serde(default)]
    pub rpc: Option<RpcConfig>,

    #[serde(default)]
    pub file: FileConfig,

    pub start: StartSpec,

    #[serde(default)]
    pub send: SendSpec,

    #[serde(default)]
    pub stop: StopSpec,
}

impl SupervisorConfig {
    pub fn new(mode: IoMode, start: StartSpec) -> Self {
        Self {
            persistent: false,
            mode,
            rpc: None,
            file: FileConfig::default(),
            start,
            send: SendSpec::default(),
            stop: StopSpec::default(),
        }
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_rpc(mut self, rpc: RpcConfig) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn with_send_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.send.timeout_ms = timeout_ms;
        self
    }

    pub fn with_stop_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.stop.timeout_ms = timeout_ms;
        self
    }
}

// ============================================================================
// Dispatcher configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Bounded pool of supervisors, up to `max_workers` live at once
    #[default]
    Pooled,
    /// Exactly one long-lived supervisor serializing all traffic
    Dedicated,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Pooled => write!(f, "pooled"),
            Strategy::Dedicated => write!(f, "dedicated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Supervisors constructed eagerly when a pooled dispatcher starts
    #[serde(default)]
    pub warm_workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_workers: default_max_workers(),
            warm_workers: 0,
        }
    }
}

fn default_max_workers() -> usize {
    4
}

/// Top-level configuration document (`execution.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub worker: SupervisorConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

// ============================================================================
// Gateway payloads
// ============================================================================

/// JSON body returned by the gateway when an invocation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Stable snake_case error class
    pub kind: String,
}

/// Point-in-time view of a dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub strategy: Strategy,
    pub max_workers: usize,
    /// Supervisors currently checked out to callers
    pub in_use: usize,
    /// Supervisors parked in the pool
    pub idle: usize,
    pub boots: u64,
    pub stops: u64,
    pub sends: u64,
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: ExecutionConfig = toml::from_str(
            r#"
            [worker.start]
            cmd = "./evaluate"
            "#,
        )
        .unwrap();

        assert!(!config.worker.persistent);
        assert_eq!(config.worker.mode, IoMode::Stdio);
        assert_eq!(config.worker.send.timeout_ms, 0);
        assert_eq!(config.worker.stop.timeout_ms, 5_000);
        assert_eq!(config.dispatcher.strategy, Strategy::Pooled);
        assert_eq!(config.dispatcher.max_workers, 4);
        assert_eq!(config.dispatcher.warm_workers, 0);
    }

    #[test]
    fn test_full_rpc_config() {
        let config: ExecutionConfig = toml::from_str(
            r#"
            [worker]
            persistent = true
            mode = "rpc"

            [worker.rpc]
            transport = "ipc"
            address = "/tmp/worker.sock"
            method = "eval_run"

            [worker.start]
            cmd = "node"
            args = ["worker.js"]
            env = { NODE_ENV = "production" }

            [worker.send]
            timeout_ms = 30000

            [worker.stop]
            timeout_ms = -1

            [dispatcher]
            strategy = "dedicated"
            max_workers = 1
            "#,
        )
        .unwrap();

        let rpc = config.worker.rpc.as_ref().unwrap();
        assert_eq!(rpc.transport.as_deref(), Some("ipc"));
        assert_eq!(rpc.dial_timeout_ms, 5_000);
        assert_eq!(config.worker.start.args, vec!["worker.js"]);
        assert_eq!(
            config.worker.start.env.get("NODE_ENV").map(String::as_str),
            Some("production")
        );
        assert_eq!(config.worker.stop.timeout_ms, -1);
        assert_eq!(config.dispatcher.strategy, Strategy::Dedicated);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let result: Result<ExecutionConfig, _> = toml::from_str(
            r#"
            [worker]
            mode = "carrier-pigeon"

            [worker.start]
            cmd = "true"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_status_snapshot_serialization() {
        let snapshot = StatusSnapshot {
            strategy: Strategy::Dedicated,
            max_workers: 1,
            boots: 2,
            ..StatusSnapshot::default()
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["strategy"], "dedicated");
        assert_eq!(json["boots"], 2);
    }
}
