//! Per-execution bookkeeping.
//!
//! An [`ExecutionContext`] lives exactly as long as one evaluation. The
//! host functions the engine exposes (`console.log`, `readFile`, `fetch`)
//! consult its counters, and its [`Meter`] backs the engine's interrupt
//! handler, so no two executions ever share a counter.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::job::Job;
use crate::script::ScriptError;
use crate::types::{ExecutionMetrics, ExecutionResult, SandboxViolation, SandboxViolationKind};

/// Slack on the in-context deadline. The caller-side timer owned by each
/// strategy fires first; the context deadline is the backstop.
pub const DEADLINE_GRACE_MS: u64 = 25;

/// Largest file `readFile` will return.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Host-side implementation of a permitted `fetch`.
///
/// The sandbox decides whether a call is allowed; the bridge only
/// performs it. Implementations must be safe to call from any thread.
pub trait NetworkBridge: Send + Sync {
    /// Fetches `url` and returns the response body.
    fn fetch(&self, url: &str) -> Result<String, String>;
}

/// Time and cancellation ceilings polled by the engine's interrupt
/// handler.
///
/// CPU time is the evaluator's busy time: wall time since [`Meter::arm`]
/// minus the time spent inside host calls.
pub struct Meter {
    cancel: Arc<AtomicBool>,
    execution_time_ms: u64,
    /// `None` when the ceiling is too large to represent.
    deadline: Option<Instant>,
    cpu_budget: Duration,
    armed: Mutex<Option<Instant>>,
    host_nanos: AtomicU64,
    polls: AtomicU64,
    tripped: Mutex<Option<SandboxViolation>>,
}

impl Meter {
    fn new(job: &Job, cancel: Arc<AtomicBool>, started: Instant) -> Self {
        Self {
            cancel,
            execution_time_ms: job.limits.execution_time_ms,
            deadline: started.checked_add(Duration::from_millis(
                job.limits.execution_time_ms.saturating_add(DEADLINE_GRACE_MS),
            )),
            cpu_budget: Duration::from_millis(job.limits.cpu_time_ms),
            armed: Mutex::new(None),
            host_nanos: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            tripped: Mutex::new(None),
        }
    }

    /// Starts the CPU clock. Called right before user code runs.
    pub fn arm(&self) {
        *self.armed.lock() = Some(Instant::now());
    }

    /// Interrupt handler body. Returns true to halt evaluation; the first
    /// breach is kept for [`Meter::take_trip`].
    pub fn poll(&self) -> bool {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if self.tripped.lock().is_some() {
            return true;
        }
        let breach = if self.cancel.load(Ordering::Relaxed) {
            Some(SandboxViolation::new(
                SandboxViolationKind::Timeout,
                "timeout: execution cancelled by the caller",
            ))
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(SandboxViolation::new(
                SandboxViolationKind::Timeout,
                format!("timeout: wall-clock ceiling of {}ms reached", self.execution_time_ms),
            ))
        } else if self.busy() > self.cpu_budget {
            Some(SandboxViolation::new(
                SandboxViolationKind::CpuLimit,
                format!("cpu budget of {}ms exhausted", self.cpu_budget.as_millis()),
            ))
        } else {
            None
        };
        match breach {
            Some(violation) => {
                *self.tripped.lock() = Some(violation);
                true
            }
            None => false,
        }
    }

    /// Evaluator busy time since [`Meter::arm`].
    pub fn busy(&self) -> Duration {
        let Some(armed) = *self.armed.lock() else {
            return Duration::ZERO;
        };
        armed
            .elapsed()
            .saturating_sub(Duration::from_nanos(self.host_nanos.load(Ordering::Relaxed)))
    }

    fn charge_host(&self, spent: Duration) {
        let nanos = u64::try_from(spent.as_nanos()).unwrap_or(u64::MAX);
        self.host_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Number of times the engine polled the handler.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// The breach that halted evaluation, if any.
    pub fn take_trip(&self) -> Option<SandboxViolation> {
        self.tripped.lock().take()
    }
}

/// Live state of one execution.
pub struct ExecutionContext {
    job: Job,
    network: Option<Arc<dyn NetworkBridge>>,
    meter: Arc<Meter>,
    started: Instant,
    memory_delta: u64,
    file_reads: u32,
    network_calls: u32,
    violations: Vec<SandboxViolation>,
    output: Vec<String>,
}

impl ExecutionContext {
    pub fn new(job: &Job, cancel: Arc<AtomicBool>, network: Option<Arc<dyn NetworkBridge>>) -> Self {
        let started = Instant::now();
        let mut job = job.clone();
        // The engine gets the source separately.
        job.code = String::new();
        Self {
            meter: Arc::new(Meter::new(&job, cancel, started)),
            job,
            network,
            started,
            memory_delta: 0,
            file_reads: 0,
            network_calls: 0,
            violations: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn meter(&self) -> Arc<Meter> {
        Arc::clone(&self.meter)
    }

    /// Heap ceiling for the script, in bytes.
    pub fn memory_limit(&self) -> u64 {
        self.job.limits.memory_bytes()
    }

    pub fn eval_disabled(&self) -> bool {
        self.job.restrictions.eval_disabled
    }

    pub fn dynamic_construction_disabled(&self) -> bool {
        self.job.restrictions.dynamic_construction_disabled
    }

    /// Records the engine heap growth observed over the run.
    pub fn record_memory(&mut self, bytes: u64) {
        self.memory_delta = self.memory_delta.max(bytes);
    }

    /// Captures one `console.log` line.
    pub fn log(&mut self, line: String) {
        if self.output.len() < self.job.max_output_lines {
            self.output.push(line);
        }
    }

    /// Reads a file under the allow-list.
    pub fn read_file(&mut self, raw: &str) -> Result<String, String> {
        let started = Instant::now();
        let outcome = self.read_file_inner(raw);
        self.meter.charge_host(started.elapsed());
        outcome
    }

    fn read_file_inner(&mut self, raw: &str) -> Result<String, String> {
        if !self.job.restrictions.file_access_enabled {
            return Err(self.violate(SandboxViolationKind::FileDenied, "file access is disabled"));
        }
        self.file_reads += 1;
        let max = self.job.limits.max_file_reads;
        if self.file_reads > max {
            return Err(self.violate(
                SandboxViolationKind::FileLimit,
                format!("file read ceiling of {} exceeded", max),
            ));
        }

        let requested = self.resolve(raw);
        let path = requested
            .canonicalize()
            .map_err(|e| format!("readFile: cannot resolve '{}': {}", raw, e))?;

        let inside = self
            .job
            .allowed_dirs
            .iter()
            .filter_map(|d| d.canonicalize().ok())
            .any(|d| path.starts_with(d));
        if !inside {
            return Err(self.violate(
                SandboxViolationKind::FileDenied,
                format!("'{}' is outside the allowed directories", raw),
            ));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let allowed = self
            .job
            .allowed_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&extension));
        if !allowed {
            return Err(self.violate(
                SandboxViolationKind::FileDenied,
                format!("extension '{}' is not allowed", extension),
            ));
        }

        let len = std::fs::metadata(&path)
            .map_err(|e| format!("readFile: {}", e))?
            .len();
        if len > MAX_READ_BYTES {
            return Err(format!("readFile: '{}' is larger than {} bytes", raw, MAX_READ_BYTES));
        }
        std::fs::read_to_string(&path).map_err(|e| format!("readFile: {}", e))
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        match self.job.allowed_dirs.first() {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Performs a permitted network call through the bridge.
    pub fn fetch(&mut self, url: &str) -> Result<String, String> {
        let started = Instant::now();
        let outcome = self.fetch_inner(url);
        self.meter.charge_host(started.elapsed());
        outcome
    }

    fn fetch_inner(&mut self, url: &str) -> Result<String, String> {
        if !self.job.restrictions.network_access_enabled {
            return Err(self.violate(SandboxViolationKind::NetworkDenied, "network access is disabled"));
        }
        self.network_calls += 1;
        let max = self.job.limits.max_network_requests;
        if self.network_calls > max {
            return Err(self.violate(
                SandboxViolationKind::NetworkLimit,
                format!("network call ceiling of {} exceeded", max),
            ));
        }

        let Some(host) = host_of(url) else {
            return Err(self.violate(
                SandboxViolationKind::NetworkDenied,
                format!("'{}' is not an http(s) url", url),
            ));
        };
        let allowed = self
            .job
            .allowed_hosts
            .iter()
            .any(|a| host == a.to_ascii_lowercase() || host.ends_with(&format!(".{}", a.to_ascii_lowercase())));
        if !allowed {
            return Err(self.violate(
                SandboxViolationKind::NetworkDenied,
                format!("host '{}' is not allowed", host),
            ));
        }

        match &self.network {
            Some(bridge) => bridge.fetch(url).map_err(|e| format!("fetch failed: {}", e)),
            None => Err("fetch: no network bridge is available in this isolation strategy".to_string()),
        }
    }

    /// Records a violation and returns its message.
    pub fn violate(&mut self, kind: SandboxViolationKind, message: impl Into<String>) -> String {
        self.push_violation(SandboxViolation::new(kind, message))
    }

    pub fn push_violation(&mut self, violation: SandboxViolation) -> String {
        let text = violation.message.clone();
        self.violations.push(violation);
        text
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Drains the context into a result.
    pub fn finish(&mut self, outcome: Result<Value, ScriptError>) -> ExecutionResult {
        let metrics = ExecutionMetrics {
            elapsed_ms: self.elapsed_ms(),
            memory_delta_bytes: self.memory_delta,
            file_reads: self.file_reads,
            network_calls: self.network_calls,
            cpu_time_ms: self.meter.busy().as_millis() as u64,
        };
        let (value, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        };
        ExecutionResult {
            id: self.job.id.clone(),
            strategy: self.job.strategy,
            success: error.is_none() && self.violations.is_empty(),
            value,
            error,
            metrics,
            violations: std::mem::take(&mut self.violations),
            output: std::mem::take(&mut self.output),
            code_digest: self.job.code_digest.clone(),
        }
    }
}

/// Lowercased host of an `http`/`https` url.
pub fn host_of(url: &str) -> Option<String> {
    let lower = url.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(""),
        None => host_port.split(':').next().unwrap_or(""),
    };
    (!host.is_empty()).then(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceLimits, SandboxConfig};
    use crate::types::ExecutionRequest;

    fn context(request: ExecutionRequest, cancel: Arc<AtomicBool>) -> ExecutionContext {
        let job = Job::new("ctx".into(), request, &SandboxConfig::default());
        ExecutionContext::new(&job, cancel, None)
    }

    #[test]
    fn test_meter_trips_on_cancel() {
        let cancel = Arc::new(AtomicBool::new(false));
        let meter = context(ExecutionRequest::new("1"), Arc::clone(&cancel)).meter();

        assert!(!meter.poll());
        cancel.store(true, Ordering::Relaxed);
        assert!(meter.poll());
        assert_eq!(meter.polls(), 2);
        let trip = meter.take_trip().unwrap();
        assert_eq!(trip.kind, SandboxViolationKind::Timeout);
        assert!(trip.message.contains("cancelled"));
    }

    #[test]
    fn test_cpu_clock_starts_when_armed() {
        let request = ExecutionRequest::new("1").with_limits(ResourceLimits {
            cpu_time_ms: 1,
            ..ResourceLimits::default()
        });
        let meter = context(request, Arc::new(AtomicBool::new(false))).meter();

        std::thread::sleep(Duration::from_millis(5));
        assert!(!meter.poll());
        assert_eq!(meter.busy(), Duration::ZERO);

        meter.arm();
        std::thread::sleep(Duration::from_millis(5));
        assert!(meter.poll());
        assert_eq!(meter.take_trip().unwrap().kind, SandboxViolationKind::CpuLimit);
    }

    #[test]
    fn test_output_is_capped() {
        let mut ctx = context(ExecutionRequest::new("1"), Arc::new(AtomicBool::new(false)));
        for i in 0..1500 {
            ctx.log(format!("line {}", i));
        }
        let result = ctx.finish(Ok(Value::Null));
        assert_eq!(result.output.len(), SandboxConfig::default().max_output_lines);
        assert!(result.success);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://API.example.com:8443/x?y").as_deref(), Some("api.example.com"));
        assert_eq!(host_of("http://user@host/").as_deref(), Some("host"));
        assert_eq!(host_of("http://[::1]:80/").as_deref(), Some("::1"));
        assert!(host_of("ftp://example.com").is_none());
        assert!(host_of("https:///nohost").is_none());
    }
}
