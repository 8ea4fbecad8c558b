//! # Core Types for the Threat Detection Engine
//!
//! Threat taxonomy, per-call findings and the aggregated [`Detection`].
//!
//! ## Design Principles
//!
//! 1. **Exhaustive Classification** - Every finding maps to one [`ThreatKind`]
//! 2. **Confidence Calibration** - Every finding carries a score in `[0, 1]`
//! 3. **Deterministic** - Identical input and policy yield an identical [`Detection`]
//! 4. **Serializable** - All types derive Serde traits for audit trails

use bastion_audit::{Severity, ViolationKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attack categories the engine scores.
///
/// | Variant | Attack Class | Signals |
/// |---------|--------------|---------|
/// | `PromptInjection` | Instruction override, role hijack | Phrase patterns |
/// | `Xss` | Markup/script injection | Tag/handler patterns + tag count |
/// | `PathTraversal` | Escaping a directory root | Dot segments, encodings, system paths |
/// | `Dos` | Resource exhaustion via payload shape | Size, repetition, symbol ratio |
/// | `MaliciousLocator` | Hostile resource URIs | Host, query, scheme, length |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    /// Attempt to override instructions or declare a new system role.
    PromptInjection,
    /// Script, markup or event-handler injection.
    Xss,
    /// Directory traversal or absolute system path.
    PathTraversal,
    /// Oversized or degenerate payload.
    Dos,
    /// Resource locator with a hostile host, scheme or query.
    MaliciousLocator,
}

impl ThreatKind {
    /// Maps the threat onto the audit taxonomy.
    pub fn violation_kind(&self) -> ViolationKind {
        match self {
            Self::PromptInjection => ViolationKind::PromptInjection,
            Self::Xss => ViolationKind::Xss,
            Self::PathTraversal => ViolationKind::PathTraversal,
            Self::Dos => ViolationKind::Dos,
            Self::MaliciousLocator => ViolationKind::MaliciousLocator,
        }
    }

    /// Returns the snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt_injection",
            Self::Xss => "xss",
            Self::PathTraversal => "path_traversal",
            Self::Dos => "dos",
            Self::MaliciousLocator => "malicious_locator",
        }
    }
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the scanned text came from. Selects which detectors run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTag {
    /// Free text of unknown provenance.
    #[default]
    General,
    /// Values extracted from capability-invocation arguments.
    ToolArguments,
    /// A resource locator (URI). Enables the locator detector.
    ResourceLocator,
    /// Arguments of a templated-content request.
    Template,
}

impl std::str::FromStr for ContextTag {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "tool" | "tool_arguments" => Ok(Self::ToolArguments),
            "uri" | "locator" | "resource_locator" => Ok(Self::ResourceLocator),
            "template" | "prompt" => Ok(Self::Template),
            other => Err(DetectError::UnknownContext(other.to_string())),
        }
    }
}

/// One detector's verdict on one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatFinding {
    /// Attack category.
    pub kind: ThreatKind,
    /// Score in `[0, 1]`.
    pub confidence: f64,
    /// Severity band derived from the confidence.
    pub severity: Severity,
    /// What matched.
    pub description: String,
    /// Whether the finding crossed its category's block threshold
    /// while auto-block is enabled.
    pub blocked: bool,
}

impl ThreatFinding {
    pub(crate) fn new(kind: ThreatKind, confidence: f64, description: impl Into<String>) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            kind,
            confidence,
            severity: Severity::from_confidence(confidence),
            description: description.into(),
            blocked: false,
        }
    }
}

/// Aggregated result of one `detect` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Findings at or above the reporting floor, in detector order.
    pub findings: Vec<ThreatFinding>,
    /// Highest severity among the findings, `Low` when there are none.
    pub overall_risk: Severity,
    /// Input with markup, scripts and protocol prefixes stripped. Present
    /// only when at least one finding is blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl Detection {
    /// A detection with no findings.
    pub fn clean() -> Self {
        Self {
            findings: Vec::new(),
            overall_risk: Severity::Low,
            sanitized: None,
        }
    }

    /// Returns true if nothing was found.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Returns true if any finding is blocked.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.findings.iter().any(|f| f.blocked)
    }

    /// Returns the finding of the given kind, if any.
    pub fn finding(&self, kind: ThreatKind) -> Option<&ThreatFinding> {
        self.findings.iter().find(|f| f.kind == kind)
    }
}

/// Errors raised while building a detector.
#[derive(Debug, Error)]
pub enum DetectError {
    /// A pattern failed to compile.
    #[error("invalid detection pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A threshold lies outside `[0, 1]`.
    #[error("threshold for {kind} must lie in [0, 1], got {value}")]
    Threshold { kind: ThreatKind, value: f64 },

    /// Unrecognized context tag name.
    #[error("unknown context tag: {0}")]
    UnknownContext(String),

    /// Content exceeds the sanitizer's size ceiling.
    #[error("content too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}
