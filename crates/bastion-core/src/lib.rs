//! # Bastion Core
//!
//! Security orchestrator for request-serving workloads.
//! Composes the Threat Detection Engine, the Access Control Manager and
//! the Sandboxed Execution Engine behind one facade.
//!
//! ## Threat Coverage
//!
//! | Layer | Component | Threats Blocked |
//! |-------|-----------|-----------------|
//! | Access | Access Control Manager | Quota abuse, blocked origins, idle sessions, missing roles |
//! | Content | Threat Detection Engine | Prompt injection, XSS, path traversal, DoS payloads, hostile locators |
//! | Execution | Sandboxed Execution Engine | Runaway code, module loading, file and network escapes |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         BASTION CORE                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   ToolCall / ResourceRead / PromptRequest    ExecutionRequest   │
//! │                    │                                │           │
//! │                    ▼                                ▼           │
//! │            ┌─────────────────────────────────────────────┐      │
//! │            │          SecurityOrchestrator               │      │
//! │            │  hard: origin → rate → session → permission │      │
//! │            │  soft: shape, size, path, host, injection,  │      │
//! │            │        format, detection                    │      │
//! │            └──────┬──────────────┬──────────────┬────────┘      │
//! │                   ▼              ▼              ▼               │
//! │           ┌────────────┐ ┌─────────────┐ ┌─────────────┐        │
//! │           │   Access   │ │   Threat    │ │   Sandbox   │        │
//! │           │  Manager   │ │  Detector   │ │   Engine    │        │
//! │           └─────┬──────┘ └──────┬──────┘ └──────┬──────┘        │
//! │                 └───────────────┼───────────────┘               │
//! │                                 ▼                               │
//! │                   Audit (violation log + event bus)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bastion_core::{CallerContext, ResourceRead, SecurityOrchestrator, SecurityPolicy};
//!
//! let policy = SecurityPolicy::load("config/bastion.toml")?;
//! let bastion = SecurityOrchestrator::new(policy)?;
//! bastion.start_maintenance();
//!
//! let ctx = CallerContext::new(session_id, peer_addr);
//! let decision = bastion.check_resource_read(&ctx, &ResourceRead::new(uri));
//! if decision.is_allowed() {
//!     serve(uri)
//! } else {
//!     reject(decision.reasons)
//! }
//! ```
//!
//! ## Security Notes
//!
//! - Hard checks short-circuit; soft checks always all run
//! - A denial carries every reason, never just the first
//! - A blocked detection finding denies the request
//! - The orchestrator refuses to start with a malformed policy
//! - Validation never returns `Err` for a policy decision

mod config;
mod decision;
mod error;
mod inspect;
mod orchestrator;
mod requests;

pub use config::{
    AccessPolicy, DetectionPolicy, LimitsPolicy, NetworkPolicy, RatePolicy, SandboxPolicy, SecurityPolicy,
};
pub use decision::{Decision, Reason, Stage};
pub use error::BastionError;
pub use orchestrator::{capability, CodeExecution, SecurityOrchestrator};
pub use requests::{CallerContext, PromptRequest, ResourceRead, ToolCall};

// Re-export component types for convenience
pub use bastion_access::{AccessConfig, AccessManager, SessionSnapshot};
pub use bastion_audit::{Audit, ManualClock, SecurityEvent, Severity, SystemClock, Violation, ViolationKind};
pub use bastion_detect::{ContextTag, Detection, DetectorConfig, ThreatDetector, ThreatFinding, ThreatKind};
pub use bastion_sandbox::{
    ExecutionRequest, ExecutionResult, IsolationStrategy, NetworkBridge, ResourceLimits, SandboxConfig,
    SandboxEngine,
};

/// Core result type for Bastion operations.
pub type Result<T> = std::result::Result<T, BastionError>;
