//! # Bastion Detect - Threat Detection Engine
//!
//! Scores untrusted text for five attack classes and returns a single
//! aggregated [`Detection`]. The engine is stateless and deterministic:
//! it never touches the network or filesystem and all patterns are
//! compiled once when the detector is built.
//!
//! ## Threat Model
//!
//! | Threat | Example | Signals |
//! |--------|---------|---------|
//! | Prompt injection | "Ignore previous instructions" | Weighted phrase table |
//! | XSS | `<script>`, `onerror=` | Weighted table + tag count |
//! | Path traversal | `../../etc/passwd`, `%2e%2e%2f` | Dot segments + system paths |
//! | DoS | 20 KB of one repeated token | Size, repetition, symbol ratio |
//! | Malicious locator | `javascript:`, unknown hosts | Locator grammar + query scan |
//!
//! ## Scoring
//!
//! ```text
//!   input ──▶ per-category score ──▶ drop < 0.3 ──▶ severity band ──▶ auto-block
//!                                                   ≥0.9 critical     confidence >
//!                                                   ≥0.7 high         category threshold
//!                                                   ≥0.5 medium
//!                                                   else low
//! ```
//!
//! Within a category the strongest signal wins and each additional
//! distinct signal adds 0.1, capped at 1.0.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bastion_detect::{ContextTag, DetectorConfig, ThreatDetector};
//!
//! let detector = ThreatDetector::new(DetectorConfig::default()).unwrap();
//! let detection = detector.detect("Ignore all previous instructions", ContextTag::General);
//! if detection.is_blocked() {
//!     println!("blocked at {} risk", detection.overall_risk);
//! }
//! ```

pub mod detector;
pub mod locator;
pub mod models;
mod patterns;
pub mod sanitize;

pub use detector::{BlockThresholds, DetectorConfig, ThreatDetector, MIN_CONFIDENCE};
pub use locator::{Locator, LocatorError, LocatorParser};
pub use models::{ContextTag, DetectError, Detection, ThreatFinding, ThreatKind};
pub use sanitize::MarkupStripper;

pub use bastion_audit::Severity;
