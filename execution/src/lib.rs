//! Execution core - runs an external evaluation program behind a
//! dispatcher → supervisor → adapter/worker stack.
//!
//! ```text
//!  caller ──► Dispatch::send
//!               │  (lease from the pool | the one dedicated supervisor)
//!               ▼
//!            Supervisor::send ── persistent: keep worker warm
//!               │                transient:  boot, use, discard
//!               ▼
//!            Adapter::send  ── stdio | file | rpc(stdio|ipc|http|ws)
//!               ▼
//!            Worker ──► Process ──► external program
//! ```
//!
//! Teardown after a pooled send runs on the pool's task tracker, so the
//! caller gets its result before the worker is confirmed gone, and
//! `Dispatch::shutdown` still waits for every outstanding cleanup.

pub mod adapter;
pub mod codec;
pub mod deadline;
pub mod dispatcher;
pub mod error;
pub mod process;
pub mod release;
pub mod rpc;
pub mod supervisor;
pub mod worker;

pub use adapter::Adapter;
pub use dispatcher::{build_dispatcher, DedicatedDispatcher, Dispatch, PooledDispatcher};
pub use error::{ErrorKind, ExecError, Result, ResultExt};
pub use process::{ExitEvent, Process, Termination, WaitOutcome, WaitPolicy};
pub use release::Release;
pub use supervisor::{SendResult, Supervisor, SupervisorStats};
pub use worker::Worker;

pub use shared_types::{
    DispatcherConfig, ExecutionConfig, IoMode, RpcConfig, SendSpec, StartSpec, StatusSnapshot,
    StopSpec, Strategy, SupervisorConfig,
};
