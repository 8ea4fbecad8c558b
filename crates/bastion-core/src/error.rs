//! Error types for Bastion Core.
//!
//! The first six variants are the failure taxonomy callers see. Validation
//! never produces them for a policy decision: the request pipeline always
//! answers with a [`Decision`](crate::Decision). They surface from startup
//! (`Config`) and from turning an execution outcome into a value
//! ([`CodeExecution::into_result`](crate::CodeExecution::into_result)).

use thiserror::Error;

/// Core error type for Bastion operations.
#[derive(Debug, Error)]
pub enum BastionError {
    /// Request rejected by schema, size, injection or threat checks.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Request rejected by rate limits, sessions, permissions or origin lists.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The sandboxed code itself failed.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// The sandboxed code hit the wall-clock ceiling.
    #[error("execution timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    ExecutionTimeout { elapsed_ms: u64, limit_ms: u64 },

    /// A memory, CPU, file or network ceiling was breached mid-run.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The policy is malformed. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Detector construction error passthrough.
    #[error("detector error: {0}")]
    Detect(#[from] bastion_detect::DetectError),

    /// Access manager error passthrough.
    #[error("access error: {0}")]
    Access(#[from] bastion_access::AccessError),

    /// Sandbox machinery error passthrough.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] bastion_sandbox::SandboxError),
}

impl BastionError {
    /// Returns true for errors that reject one request and leave the
    /// system serving.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
