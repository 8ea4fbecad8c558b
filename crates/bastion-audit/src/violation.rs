//! Violation records and severity levels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a finding or violation.
///
/// Ordered so that `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, does not deny on its own.
    Low,
    /// Suspicious.
    Medium,
    /// Likely attack.
    High,
    /// Near-certain attack.
    Critical,
}

impl Severity {
    /// Maps a confidence score in `[0, 1]` to a severity band.
    ///
    /// | Confidence | Severity |
    /// |------------|----------|
    /// | ≥ 0.9      | Critical |
    /// | ≥ 0.7      | High     |
    /// | ≥ 0.5      | Medium   |
    /// | otherwise  | Low      |
    #[must_use]
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::Critical
        } else if confidence >= 0.7 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of a rejected check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Instruction override or role hijack in text.
    PromptInjection,
    /// Markup or script injection.
    Xss,
    /// Directory traversal or system path access.
    PathTraversal,
    /// Oversized or degenerate payload.
    Dos,
    /// Suspicious resource locator.
    MaliciousLocator,
    /// Origin is on the blocklist.
    OriginBlocked,
    /// Session or origin quota exhausted.
    RateLimit,
    /// Session administratively blocked.
    SessionBlocked,
    /// Session idle past its timeout.
    SessionExpired,
    /// Capability not granted to any of the session's roles.
    PermissionDenied,
    /// Request shape failed validation.
    Schema,
    /// Payload exceeds the byte ceiling.
    PayloadTooLarge,
    /// Remote host not on the allow-list.
    HostNotAllowed,
    /// Code-injection pattern in request data.
    CodeInjection,
    /// Domain format check failed.
    InvalidFormat,
    /// Sandboxed execution was rejected or failed.
    Sandbox,
    /// Unexpected internal fault folded into a decision.
    Internal,
}

impl ViolationKind {
    /// Returns the snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt_injection",
            Self::Xss => "xss",
            Self::PathTraversal => "path_traversal",
            Self::Dos => "dos",
            Self::MaliciousLocator => "malicious_locator",
            Self::OriginBlocked => "origin_blocked",
            Self::RateLimit => "rate_limit",
            Self::SessionBlocked => "session_blocked",
            Self::SessionExpired => "session_expired",
            Self::PermissionDenied => "permission_denied",
            Self::Schema => "schema",
            Self::PayloadTooLarge => "payload_too_large",
            Self::HostNotAllowed => "host_not_allowed",
            Self::CodeInjection => "code_injection",
            Self::InvalidFormat => "invalid_format",
            Self::Sandbox => "sandbox",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a rejected check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Reason class.
    pub kind: ViolationKind,
    /// Severity at the time of recording.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Component or caller the violation is attributed to.
    pub source: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Free-form context (session id, origin, confidence...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Violation {
    /// Creates a violation without metadata.
    pub fn new(
        kind: ViolationKind,
        severity: Severity,
        message: impl Into<String>,
        source: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            source: source.into(),
            timestamp_ms,
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_confidence(0.95), Severity::Critical);
        assert_eq!(Severity::from_confidence(0.9), Severity::Critical);
        assert_eq!(Severity::from_confidence(0.75), Severity::High);
        assert_eq!(Severity::from_confidence(0.5), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.31), Severity::Low);
    }

    #[test]
    fn test_violation_serializes_kind_snake_case() {
        let v = Violation::new(ViolationKind::RateLimit, Severity::Medium, "rate limit exceeded", "access", 7)
            .with_meta("session", "s-1");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "rate_limit");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["metadata"]["session"], "s-1");
    }
}
