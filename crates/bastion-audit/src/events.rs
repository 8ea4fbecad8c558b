//! Typed security event stream.
//!
//! Subsystems publish [`SecurityEvent`]s on an [`EventBus`]; external
//! observability collaborators subscribe and drain at their own pace.
//! The bus is a `tokio::sync::broadcast` channel, so publishing never
//! waits on a subscriber. A subscriber that falls more than the channel
//! capacity behind receives `RecvError::Lagged` and skips ahead.

use crate::violation::{Severity, Violation};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A structured state change emitted by the security core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// A violation was appended to the log.
    ViolationLogged { violation: Violation },
    /// A critical-severity violation was appended to the log.
    CriticalViolation { violation: Violation },
    /// A session or origin exhausted its hourly quota.
    RateLimitExceeded {
        session_id: String,
        origin: String,
        count: u64,
        limit: u64,
    },
    /// An origin was added to the blocklist.
    OriginBlocked { origin: String },
    /// An origin was removed from the blocklist.
    OriginUnblocked { origin: String },
    /// A session was administratively blocked.
    SessionBlocked { session_id: String },
    /// A session was administratively unblocked.
    SessionUnblocked { session_id: String },
    /// A session idled past its timeout and was evicted.
    SessionExpired { session_id: String, idle_ms: u64 },
    /// A role was granted to a session.
    RoleGranted { session_id: String, role: String },
    /// A role was revoked from a session.
    RoleRevoked { session_id: String, role: String },
    /// A capability check failed.
    PermissionDenied { session_id: String, capability: String },
    /// A sandboxed execution finished cleanly.
    ExecutionCompleted {
        execution_id: String,
        strategy: String,
        elapsed_ms: u64,
        code_digest: String,
    },
    /// A sandboxed execution failed, timed out or was rejected.
    ExecutionFailed {
        execution_id: String,
        strategy: String,
        elapsed_ms: u64,
        reason: String,
    },
    /// The worker pool started.
    PoolInitialized { size: usize, max_size: usize },
    /// The worker pool shut down.
    PoolDestroyed { replaced: u64 },
}

impl SecurityEvent {
    /// Returns the snake_case event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ViolationLogged { .. } => "violation_logged",
            Self::CriticalViolation { .. } => "critical_violation",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::OriginBlocked { .. } => "origin_blocked",
            Self::OriginUnblocked { .. } => "origin_unblocked",
            Self::SessionBlocked { .. } => "session_blocked",
            Self::SessionUnblocked { .. } => "session_unblocked",
            Self::SessionExpired { .. } => "session_expired",
            Self::RoleGranted { .. } => "role_granted",
            Self::RoleRevoked { .. } => "role_revoked",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::PoolInitialized { .. } => "pool_initialized",
            Self::PoolDestroyed { .. } => "pool_destroyed",
        }
    }

    fn trace(&self) {
        match self {
            Self::CriticalViolation { violation } => {
                warn!(kind = %violation.kind, source = %violation.source, "critical violation: {}", violation.message);
            }
            Self::ViolationLogged { violation } if violation.severity >= Severity::High => {
                warn!(kind = %violation.kind, severity = %violation.severity, "violation: {}", violation.message);
            }
            Self::RateLimitExceeded { .. }
            | Self::PermissionDenied { .. }
            | Self::ExecutionFailed { .. }
            | Self::OriginBlocked { .. }
            | Self::SessionBlocked { .. } => {
                info!(event = self.name(), "{:?}", self);
            }
            _ => debug!(event = self.name(), "{:?}", self),
        }
    }
}

/// Non-blocking fan-out of [`SecurityEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SecurityEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Never blocks; an event with no subscribers is
    /// only traced.
    pub fn emit(&self, event: SecurityEvent) {
        event.trace();
        let _ = self.sender.send(event);
    }

    /// Registers a new subscriber. It only sees events emitted afterwards.
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
