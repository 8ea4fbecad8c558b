//! Error types for the sandbox infrastructure.
//!
//! These cover failures of the isolation machinery itself. Failures of the
//! sandboxed code are never errors: they come back as an unsuccessful
//! [`ExecutionResult`](crate::ExecutionResult).

use thiserror::Error;

use crate::types::SandboxViolationKind;

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised by the sandbox machinery.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Configuration is malformed.
    #[error("invalid sandbox configuration: {0}")]
    Config(String),

    /// A deny-list pattern failed to compile.
    #[error("invalid scan pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The worker pool no longer accepts tasks.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// An OS thread could not be started.
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        /// What was being spawned
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The worker binary could not be located.
    #[error("sandbox worker binary not found: {0}")]
    WorkerBinary(String),

    /// The worker process was stopped by one of its kernel limits.
    #[error("worker process hit a kernel limit: {detail}")]
    WorkerLimit {
        kind: SandboxViolationKind,
        detail: String,
    },

    /// The worker process exited unsuccessfully.
    #[error("worker process exited with {0}")]
    WorkerExit(String),

    /// I/O with a child process failed.
    #[error("worker process i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A job or result could not be (de)serialized.
    #[error("worker protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}
