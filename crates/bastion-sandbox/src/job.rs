//! The unit of work handed to an isolation strategy.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::{ResourceLimits, Restrictions, SandboxConfig};
use crate::context::{ExecutionContext, NetworkBridge};
use crate::script;
use crate::types::{ExecutionRequest, ExecutionResult, IsolationStrategy};

/// Stack reserved for every evaluator thread.
pub const EVAL_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Everything an isolate needs to run one request, with the effective
/// limits already resolved. Crosses the process boundary as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub strategy: IsolationStrategy,
    pub code: String,
    pub code_digest: String,
    pub bindings: Map<String, Value>,
    pub limits: ResourceLimits,
    pub restrictions: Restrictions,
    pub allowed_dirs: Vec<PathBuf>,
    pub allowed_extensions: Vec<String>,
    pub allowed_hosts: Vec<String>,
    pub max_output_lines: usize,
}

impl Job {
    /// Resolves `request` against `config`. Request limits can only
    /// tighten the configured ones.
    pub fn new(id: String, request: ExecutionRequest, config: &SandboxConfig) -> Self {
        let limits = match &request.limits {
            Some(asked) => config.limits.tightened_by(asked),
            None => config.limits,
        };
        Self {
            id,
            strategy: request.strategy.unwrap_or(config.default_strategy),
            code_digest: digest(&request.code),
            code: request.code,
            bindings: request.bindings,
            limits,
            restrictions: config.restrictions,
            allowed_dirs: config.allowed_dirs.clone(),
            allowed_extensions: config.allowed_extensions.clone(),
            allowed_hosts: config.allowed_hosts.clone(),
            max_output_lines: config.max_output_lines,
        }
    }
}

/// Hex SHA-256 of `code`.
pub fn digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Evaluates `job` on the current thread with a fresh context.
pub fn run_job(job: &Job, cancel: Arc<AtomicBool>, network: Option<Arc<dyn NetworkBridge>>) -> ExecutionResult {
    let ctx = Rc::new(RefCell::new(ExecutionContext::new(job, cancel, network)));
    let outcome = script::evaluate(&job.code, &job.bindings, &ctx);
    let result = ctx.borrow_mut().finish(outcome);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let d = digest("2 + 2");
        assert_eq!(d.len(), 64);
        assert_eq!(d, digest("2 + 2"));
        assert_ne!(d, digest("2 + 3"));
    }

    #[test]
    fn test_job_resolves_strategy_and_limits() {
        let config = SandboxConfig::new().with_default_strategy(IsolationStrategy::WorkerPool);
        let request = ExecutionRequest::new("1").with_limits(ResourceLimits {
            execution_time_ms: 10,
            ..ResourceLimits::default()
        });
        let job = Job::new("id".into(), request, &config);
        assert_eq!(job.strategy, IsolationStrategy::WorkerPool);
        assert_eq!(job.limits.execution_time_ms, 10);
        assert_eq!(job.limits.memory_mb, config.limits.memory_mb);
    }
}
