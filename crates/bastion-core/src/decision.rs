//! Decision types for pipeline results.

use bastion_audit::{Severity, ViolationKind};
use serde::{Deserialize, Serialize};

/// Pipeline step that produced a [`Reason`].
///
/// Steps 1-4 are hard: the first failure ends the pipeline. Steps 5-11
/// are soft: every failure is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 1. Origin blocklist.
    OriginBlocklist,
    /// 2. Session and origin quotas.
    RateLimit,
    /// 3. Session idle timeout.
    SessionTimeout,
    /// 4. Role permissions.
    Permission,
    /// 5. Request shape.
    Schema,
    /// 6. Payload and locator size.
    PayloadSize,
    /// 7. File-like targets.
    FilePath,
    /// 8. Remote host allow-list.
    HostAllowList,
    /// 9. Code-injection shapes in the serialized payload.
    CodeInjection,
    /// 10. Domain formats such as version strings and locator schemes.
    Format,
    /// 11. Full threat detection.
    ThreatDetection,
}

impl Stage {
    /// Returns true for steps that short-circuit the pipeline.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::OriginBlocklist | Self::RateLimit | Self::SessionTimeout | Self::Permission
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OriginBlocklist => "origin_blocklist",
            Self::RateLimit => "rate_limit",
            Self::SessionTimeout => "session_timeout",
            Self::Permission => "permission",
            Self::Schema => "schema",
            Self::PayloadSize => "payload_size",
            Self::FilePath => "file_path",
            Self::HostAllowList => "host_allow_list",
            Self::CodeInjection => "code_injection",
            Self::Format => "format",
            Self::ThreatDetection => "threat_detection",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub stage: Stage,
    /// Whether this failure ended the pipeline.
    pub hard: bool,
    pub kind: ViolationKind,
    pub message: String,
}

impl Reason {
    pub fn new(stage: Stage, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            hard: stage.is_hard(),
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// The answer to one request.
///
/// A denial always carries at least one reason; an allowed request
/// carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Every failed check, in pipeline order.
    pub reasons: Vec<Reason>,
    /// Overall risk reported by threat detection, `Low` when it did not run.
    pub risk: Severity,
    /// Sanitized copy of the inspected text when a finding was blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl Decision {
    /// Builds a decision from collected reasons.
    pub fn from_reasons(reasons: Vec<Reason>, risk: Severity, sanitized: Option<String>) -> Self {
        Self {
            allowed: reasons.is_empty(),
            reasons,
            risk,
            sanitized,
        }
    }

    /// A denial by one hard check.
    pub fn hard_deny(reason: Reason) -> Self {
        Self::from_reasons(vec![reason], Severity::Low, None)
    }

    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// The hard check that ended the pipeline, if any.
    pub fn hard_failure(&self) -> Option<&Reason> {
        self.reasons.iter().find(|r| r.hard)
    }

    pub fn reason_messages(&self) -> Vec<&str> {
        self.reasons.iter().map(|r| r.message.as_str()).collect()
    }

    /// Returns true if any reason is of `kind`.
    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.reasons.iter().any(|r| r.kind == kind)
    }

    /// Returns true if any reason came from `stage`.
    pub fn failed_at(&self, stage: Stage) -> bool {
        self.reasons.iter().any(|r| r.stage == stage)
    }
}
