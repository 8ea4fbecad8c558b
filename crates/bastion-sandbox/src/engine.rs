//! Sandbox facade: scan, dispatch, report.

use std::sync::Arc;
use std::time::Instant;

use bastion_audit::{Audit, SecurityEvent, Severity, Violation, ViolationKind};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::context::NetworkBridge;
use crate::error::Result;
use crate::job::Job;
use crate::pool::{PoolStats, WorkerPool};
use crate::scan::CodeScanner;
use crate::types::{ExecutionRequest, ExecutionResult, IsolationStrategy};
use crate::{process, restricted};

/// Runs untrusted scripts under the configured isolation strategy.
///
/// # Example
///
/// ```rust,no_run
/// use bastion_sandbox::{ExecutionRequest, SandboxConfig, SandboxEngine};
///
/// # async fn demo() -> bastion_sandbox::Result<()> {
/// let engine = SandboxEngine::new(SandboxConfig::default())?;
/// let result = engine.execute(ExecutionRequest::new("2 + 2")).await;
/// assert!(result.success);
/// assert_eq!(result.value, Some(serde_json::json!(4)));
/// # Ok(())
/// # }
/// ```
pub struct SandboxEngine {
    config: SandboxConfig,
    scanner: CodeScanner,
    audit: Audit,
    network: Option<Arc<dyn NetworkBridge>>,
    /// Started on first pooled request.
    pool: Mutex<Option<Arc<WorkerPool>>>,
}

impl SandboxEngine {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        Self::with_audit(config, Audit::new())
    }

    pub fn with_audit(config: SandboxConfig, audit: Audit) -> Result<Self> {
        config.validate()?;
        let scanner = CodeScanner::new(&config.restrictions)?;
        Ok(Self {
            config,
            scanner,
            audit,
            network: None,
            pool: Mutex::new(None),
        })
    }

    /// Installs the host-side implementation of permitted `fetch` calls.
    #[must_use]
    pub fn with_network(mut self, bridge: Arc<dyn NetworkBridge>) -> Self {
        self.network = Some(bridge);
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    /// Runs one request. Never returns an error: every failure, including
    /// a failure of the isolation machinery, is an unsuccessful result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let job = Job::new(Uuid::new_v4().to_string(), request, &self.config);

        let denied = self.scanner.scan(&job.code);
        if !denied.is_empty() {
            let result = ExecutionResult::rejected(
                &job.id,
                job.strategy,
                &job.code_digest,
                "code rejected by static scan",
                denied,
                started.elapsed().as_millis() as u64,
            );
            self.report(&result);
            return result;
        }

        debug!(execution_id = %job.id, strategy = %job.strategy, "dispatching execution");
        let result = match job.strategy {
            IsolationStrategy::Restricted => restricted::run(job, self.network.clone()).await,
            IsolationStrategy::WorkerPool => match self.pool() {
                Ok(pool) => pool.execute(job).await,
                Err(e) => self.unavailable(&job, e.to_string(), started),
            },
            IsolationStrategy::Process => match process::resolve_worker_binary(&self.config) {
                Ok(binary) => process::run(job, &binary).await,
                Err(e) => self.unavailable(&job, e.to_string(), started),
            },
        };
        self.report(&result);
        result
    }

    fn pool(&self) -> Result<Arc<WorkerPool>> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(WorkerPool::new(
            self.config.pool_size(),
            self.network.clone(),
            self.audit.clone(),
        )?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    fn unavailable(&self, job: &Job, error: String, started: Instant) -> ExecutionResult {
        warn!(execution_id = %job.id, strategy = %job.strategy, %error, "isolation strategy unavailable");
        ExecutionResult::rejected(
            &job.id,
            job.strategy,
            &job.code_digest,
            error,
            Vec::new(),
            started.elapsed().as_millis() as u64,
        )
    }

    /// Emits the outcome event and audits failures that carry violations.
    fn report(&self, result: &ExecutionResult) {
        let strategy = result.strategy.to_string();
        if result.success {
            debug!(
                execution_id = %result.id,
                %strategy,
                elapsed_ms = result.metrics.elapsed_ms,
                "execution completed"
            );
            self.audit.emit(SecurityEvent::ExecutionCompleted {
                execution_id: result.id.clone(),
                strategy,
                elapsed_ms: result.metrics.elapsed_ms,
                code_digest: result.code_digest.clone(),
            });
            return;
        }

        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| "execution failed".to_string());
        info!(
            execution_id = %result.id,
            %strategy,
            elapsed_ms = result.metrics.elapsed_ms,
            violations = result.violations.len(),
            %reason,
            "execution failed"
        );
        self.audit.emit(SecurityEvent::ExecutionFailed {
            execution_id: result.id.clone(),
            strategy: strategy.clone(),
            elapsed_ms: result.metrics.elapsed_ms,
            reason: reason.clone(),
        });

        if result.violations.is_empty() {
            return;
        }
        let kinds: Vec<&str> = result.violations.iter().map(|v| v.kind.as_str()).collect();
        let violation = Violation::new(
            ViolationKind::Sandbox,
            Severity::High,
            reason,
            "sandbox",
            self.audit.now_ms(),
        )
        .with_meta("execution_id", result.id.clone())
        .with_meta("strategy", strategy)
        .with_meta("violations", kinds)
        .with_meta("code_digest", result.code_digest.clone());
        self.audit.log().record(violation);
    }

    /// Stats of the worker pool, if it has been started.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.lock().as_ref().map(|pool| pool.stats())
    }

    /// Shuts the worker pool down. Later pooled requests start a new one.
    pub fn shutdown(&self) {
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
    }
}

impl std::fmt::Debug for SandboxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEngine")
            .field("default_strategy", &self.config.default_strategy)
            .field("pool", &self.pool_stats())
            .finish()
    }
}
