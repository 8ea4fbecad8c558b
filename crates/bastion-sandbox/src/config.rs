//! Sandbox configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};
use crate::types::IsolationStrategy;

/// Hard cap on pool size regardless of configuration.
pub const MAX_POOL_SIZE: usize = 4;

/// Resource ceilings for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// Approximate allocation ceiling.
    pub memory_mb: u64,
    /// Evaluator busy time, excluding host calls.
    pub cpu_time_ms: u64,
    /// Wall-clock ceiling. Always wins.
    pub execution_time_ms: u64,
    /// `readFile` calls allowed.
    pub max_file_reads: u32,
    /// `fetch` calls allowed.
    pub max_network_requests: u32,
}

impl ResourceLimits {
    /// Field-wise minimum, so a request can tighten but never loosen.
    #[must_use]
    pub fn tightened_by(&self, other: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            memory_mb: self.memory_mb.min(other.memory_mb),
            cpu_time_ms: self.cpu_time_ms.min(other.cpu_time_ms),
            execution_time_ms: self.execution_time_ms.min(other.execution_time_ms),
            max_file_reads: self.max_file_reads.min(other.max_file_reads),
            max_network_requests: self.max_network_requests.min(other.max_network_requests),
        }
    }

    /// Memory ceiling in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 64,
            cpu_time_ms: 5_000,
            execution_time_ms: 5_000,
            max_file_reads: 10,
            max_network_requests: 5,
        }
    }
}

/// Capability toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Restrictions {
    /// Reject `eval(` and string timers before running.
    pub eval_disabled: bool,
    /// Reject `Function(` / `new Function` before running.
    pub dynamic_construction_disabled: bool,
    /// Allow `fetch`.
    pub network_access_enabled: bool,
    /// Allow `readFile`.
    pub file_access_enabled: bool,
}

impl Default for Restrictions {
    fn default() -> Self {
        Self {
            eval_disabled: true,
            dynamic_construction_disabled: true,
            network_access_enabled: false,
            file_access_enabled: false,
        }
    }
}

/// Configuration for [`SandboxEngine`](crate::SandboxEngine).
///
/// # Example
///
/// ```rust
/// use bastion_sandbox::{IsolationStrategy, SandboxConfig};
///
/// let config = SandboxConfig::new()
///     .with_execution_time_ms(250)
///     .with_file_access(["/srv/docs"], ["md", "txt"])
///     .with_default_strategy(IsolationStrategy::WorkerPool);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub limits: ResourceLimits,
    pub restrictions: Restrictions,
    /// Directories `readFile` may read beneath.
    pub allowed_dirs: Vec<PathBuf>,
    /// Extensions `readFile` may read, without the dot.
    pub allowed_extensions: Vec<String>,
    /// Hosts `fetch` may contact (subdomains included).
    pub allowed_hosts: Vec<String>,
    /// Strategy used when a request names none.
    pub default_strategy: IsolationStrategy,
    /// Upper bound on pool workers; further capped by hardware and [`MAX_POOL_SIZE`].
    pub max_workers: usize,
    /// Path to `bastion-sandbox-worker`. Defaults to a sibling of the
    /// current executable.
    pub worker_binary: Option<PathBuf>,
    /// Captured `console.log` lines kept per execution.
    pub max_output_lines: usize,
}

impl SandboxConfig {
    /// Creates a config with default values.
    ///
    /// Defaults:
    /// - 64 MB memory, 5 s CPU budget, 5 s wall clock
    /// - 10 file reads, 5 network calls, both capabilities disabled
    /// - eval and dynamic construction rejected
    /// - Restricted strategy, up to 4 pool workers
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: ResourceLimits::default(),
            restrictions: Restrictions::default(),
            allowed_dirs: Vec::new(),
            allowed_extensions: vec!["txt".into(), "md".into(), "json".into()],
            allowed_hosts: Vec::new(),
            default_strategy: IsolationStrategy::Restricted,
            max_workers: MAX_POOL_SIZE,
            worker_binary: None,
            max_output_lines: 1000,
        }
    }

    /// Sets the resource ceilings.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the wall-clock ceiling.
    #[must_use]
    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.limits.execution_time_ms = ms;
        self
    }

    /// Sets the capability toggles.
    #[must_use]
    pub fn with_restrictions(mut self, restrictions: Restrictions) -> Self {
        self.restrictions = restrictions;
        self
    }

    /// Enables `readFile` beneath `dirs` for the given extensions.
    #[must_use]
    pub fn with_file_access<D, E>(mut self, dirs: D, extensions: E) -> Self
    where
        D: IntoIterator,
        D::Item: Into<PathBuf>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        self.restrictions.file_access_enabled = true;
        self.allowed_dirs = dirs.into_iter().map(Into::into).collect();
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Enables `fetch` for the given hosts.
    #[must_use]
    pub fn with_network_access<H>(mut self, hosts: H) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
    {
        self.restrictions.network_access_enabled = true;
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the strategy used when a request names none.
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: IsolationStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the pool size ceiling.
    #[must_use]
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    /// Sets the worker binary path.
    #[must_use]
    pub fn with_worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(path.into());
        self
    }

    /// Effective pool ceiling: configuration, hardware parallelism and
    /// [`MAX_POOL_SIZE`], never below 1.
    pub fn pool_size(&self) -> usize {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers.min(hardware).min(MAX_POOL_SIZE).max(1)
    }

    /// Rejects zero ceilings and file access without extensions.
    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        if l.memory_mb == 0 || l.cpu_time_ms == 0 || l.execution_time_ms == 0 {
            return Err(SandboxError::Config(
                "memory, cpu and execution time ceilings must be positive".into(),
            ));
        }
        if self.restrictions.file_access_enabled && self.allowed_extensions.is_empty() {
            return Err(SandboxError::Config(
                "file access is enabled but no extension is allowed".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SandboxConfig::default().validate().is_ok());
    }

    #[test]
    fn test_pool_size_bounds() {
        assert_eq!(SandboxConfig::new().with_max_workers(0).pool_size(), 1);
        assert!(SandboxConfig::new().with_max_workers(64).pool_size() <= MAX_POOL_SIZE);
    }

    #[test]
    fn test_request_limits_only_tighten() {
        let base = ResourceLimits::default();
        let asked = ResourceLimits {
            execution_time_ms: 100,
            max_file_reads: 1_000,
            ..ResourceLimits::default()
        };
        let eff = base.tightened_by(&asked);
        assert_eq!(eff.execution_time_ms, 100);
        assert_eq!(eff.max_file_reads, base.max_file_reads);
    }

    #[test]
    fn test_file_access_without_extensions_rejected() {
        let config = SandboxConfig::new().with_file_access(["/tmp"], Vec::<String>::new());
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));
    }
}
