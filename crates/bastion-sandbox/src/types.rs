//! Request and result types shared by every isolation strategy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ResourceLimits;

/// How a request is isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// In-process evaluation on a dedicated thread.
    #[default]
    Restricted,
    /// A pooled worker thread, replaced on timeout or crash.
    WorkerPool,
    /// A fresh `bastion-sandbox-worker` process per call.
    Process,
}

impl IsolationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::WorkerPool => "worker_pool",
            Self::Process => "process",
        }
    }
}

impl std::fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IsolationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(Self::Restricted),
            "pool" | "worker_pool" => Ok(Self::WorkerPool),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown isolation strategy: {}", other)),
        }
    }
}

/// One sandbox invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Script source.
    pub code: String,
    /// Read-only globals visible to the script.
    #[serde(default)]
    pub bindings: Map<String, Value>,
    /// Tighter ceilings than the engine defaults, if any.
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
    /// Strategy override.
    #[serde(default)]
    pub strategy: Option<IsolationStrategy>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: IsolationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Class of a sandbox violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxViolationKind {
    /// Static scan matched a deny-listed call shape.
    DeniedPattern,
    /// Wall-clock ceiling reached.
    Timeout,
    /// CPU budget exhausted.
    CpuLimit,
    /// Heap ceiling exceeded.
    MemoryLimit,
    /// Call stack ceiling exceeded.
    StackLimit,
    /// `readFile` ceiling exceeded.
    FileLimit,
    /// `readFile` outside the allow-list or disabled.
    FileDenied,
    /// `fetch` ceiling exceeded.
    NetworkLimit,
    /// `fetch` disabled or host not allowed.
    NetworkDenied,
    /// The isolate crashed.
    Crashed,
}

impl SandboxViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeniedPattern => "denied_pattern",
            Self::Timeout => "timeout",
            Self::CpuLimit => "cpu_limit",
            Self::MemoryLimit => "memory_limit",
            Self::StackLimit => "stack_limit",
            Self::FileLimit => "file_limit",
            Self::FileDenied => "file_denied",
            Self::NetworkLimit => "network_limit",
            Self::NetworkDenied => "network_denied",
            Self::Crashed => "crashed",
        }
    }

    /// True for ceilings breached mid-run.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::CpuLimit
                | Self::MemoryLimit
                | Self::StackLimit
                | Self::FileLimit
                | Self::NetworkLimit
        )
    }
}

/// A boundary the sandboxed code hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxViolation {
    pub kind: SandboxViolationKind,
    pub message: String,
}

impl SandboxViolation {
    pub fn new(kind: SandboxViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SandboxViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Resource usage of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub elapsed_ms: u64,
    /// Engine heap growth over the run.
    pub memory_delta_bytes: u64,
    pub file_reads: u32,
    pub network_calls: u32,
    /// Evaluator busy time, excluding host calls.
    pub cpu_time_ms: u64,
}

/// Outcome of a sandbox invocation.
///
/// Metrics are always present, including on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Execution id (UUID v4).
    pub id: String,
    pub strategy: IsolationStrategy,
    pub success: bool,
    /// Completion value of the script.
    pub value: Option<Value>,
    pub error: Option<String>,
    pub metrics: ExecutionMetrics,
    /// Empty on a clean run.
    pub violations: Vec<SandboxViolation>,
    /// Captured `console.log` lines.
    pub output: Vec<String>,
    /// SHA-256 of the source, hex encoded.
    pub code_digest: String,
}

impl ExecutionResult {
    /// Failure carrying no evaluation state.
    pub fn rejected(
        id: &str,
        strategy: IsolationStrategy,
        code_digest: &str,
        error: impl Into<String>,
        violations: Vec<SandboxViolation>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            strategy,
            success: false,
            value: None,
            error: Some(error.into()),
            metrics: ExecutionMetrics {
                elapsed_ms,
                ..ExecutionMetrics::default()
            },
            violations,
            output: Vec::new(),
            code_digest: code_digest.to_string(),
        }
    }

    /// Caller-side timeout.
    pub fn timed_out(
        id: &str,
        strategy: IsolationStrategy,
        code_digest: &str,
        limit_ms: u64,
        elapsed_ms: u64,
    ) -> Self {
        Self::rejected(
            id,
            strategy,
            code_digest,
            format!("execution timed out after {}ms", limit_ms),
            vec![SandboxViolation::new(
                SandboxViolationKind::Timeout,
                format!("timeout: wall-clock ceiling of {}ms reached", limit_ms),
            )],
            elapsed_ms,
        )
    }

    /// The isolate died before producing a result.
    pub fn crashed(
        id: &str,
        strategy: IsolationStrategy,
        code_digest: &str,
        detail: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        let detail = detail.into();
        Self::rejected(
            id,
            strategy,
            code_digest,
            format!("isolate crashed: {}", detail),
            vec![SandboxViolation::new(SandboxViolationKind::Crashed, detail)],
            elapsed_ms,
        )
    }

    /// Returns true if any violation is of `kind`.
    pub fn has_violation(&self, kind: SandboxViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}
