//! # Bastion Sandbox - Sandboxed Execution Engine
//!
//! Runs caller-supplied scripts inside isolation boundaries that bound
//! their time, memory, file access and network access.
//!
//! ## Isolation Strategies
//!
//! | Strategy | Isolate | Timeout path | Reuse |
//! |----------|---------|--------------|-------|
//! | `restricted` | Dedicated evaluator thread | Cancel flag | Never |
//! | `worker_pool` | Pooled thread (≤4, lazy growth) | Cancel flag + worker replaced | Per task, fresh context |
//! | `process` | `bastion-sandbox-worker` child | Process killed | Never |
//!
//! ## Architecture
//!
//! ```text
//! ExecutionRequest
//!        │
//!        ▼
//! ┌──────────────┐ deny-listed ┌───────────────────────────┐
//! │ CodeScanner  │────────────▶│ ExecutionResult           │
//! └──────┬───────┘             │ success=false, violations │
//!        │ clean               └───────────────────────────┘
//!        ▼                                 ▲
//! ┌──────────────┐  Job   ┌──────────────┐ │
//! │ SandboxEngine│───────▶│  strategy    │─┘ raced against the
//! └──────────────┘        │  isolate     │   caller-owned timer
//!                         └──────┬───────┘
//!                                ▼
//!                 ExecutionContext + QuickJS evaluator
//! ```
//!
//! ## Security Notes
//!
//! - The script namespace has no filesystem, process or module
//!   bindings; `readFile` and `fetch` are gated and counted
//! - Heap and stack ceilings are enforced by the engine itself
//! - Request limits can only tighten the configured ceilings
//! - The wall-clock ceiling always wins; timeouts report elapsed ≥ limit
//! - Every result carries metrics, including failures

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod job;
pub mod pool;
pub mod process;
pub mod restricted;
pub mod scan;
pub mod script;
pub mod types;
mod worker;

pub use config::{ResourceLimits, Restrictions, SandboxConfig, MAX_POOL_SIZE};
pub use context::{host_of, ExecutionContext, Meter, NetworkBridge};
pub use engine::SandboxEngine;
pub use error::{Result, SandboxError};
pub use job::{digest, run_job, Job, EVAL_STACK_BYTES};
pub use pool::{PoolStats, WorkerPool};
pub use scan::CodeScanner;
pub use script::{ScriptError, MAX_STACK_BYTES};
pub use types::{
    ExecutionMetrics, ExecutionRequest, ExecutionResult, IsolationStrategy, SandboxViolation,
    SandboxViolationKind,
};
