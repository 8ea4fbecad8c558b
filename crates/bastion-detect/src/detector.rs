//! Main detector facade
//!
//! Runs each enabled category against the input, discards findings below
//! the reporting floor, applies the auto-block policy and aggregates the
//! result into a [`Detection`].

use bastion_audit::{Audit, Severity, Violation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::locator::{Locator, LocatorError, LocatorParser};
use crate::models::{ContextTag, DetectError, Detection, ThreatFinding, ThreatKind};
use crate::patterns::{
    PatternTable, ABSOLUTE_SYSTEM_PATH, CODE_INJECTION, EXTRA_MATCH_BONUS, LOCATOR_SCRIPT,
    PATH_TRAVERSAL, PROMPT_INJECTION, XSS,
};
use crate::sanitize::MarkupStripper;

/// Findings below this confidence are discarded.
pub const MIN_CONFIDENCE: f64 = 0.3;

/// Confidence added when an absolute system path is present.
pub const ABSOLUTE_PATH_BUMP: f64 = 0.5;

/// Confidence contributed by each HTML-like tag, up to [`MAX_TAG_TERM`].
pub const TAG_WEIGHT: f64 = 0.05;

/// Ceiling of the tag-count term.
pub const MAX_TAG_TERM: f64 = 0.3;

/// Longest repeating unit the repetition scan looks for.
pub const MAX_REPEAT_PERIOD: usize = 64;

/// Minimum number of back-to-back copies of the unit.
pub const MIN_REPEATS: usize = 10;

/// Minimum byte span of the repeated run.
pub const MIN_REPEAT_SPAN: usize = 200;

/// Input size below which the repetition and symbol-ratio signals are
/// not applied. Small inputs cannot exhaust anything.
pub const DOS_HEURISTIC_MIN_BYTES: usize = 1024;

/// Minimum character count before the symbol ratio is considered.
pub const SYMBOL_RATIO_MIN_LEN: usize = 64;

/// Share of non-alphanumeric, non-whitespace characters that flags DoS.
pub const SYMBOL_RATIO_THRESHOLD: f64 = 0.6;

/// Per-category confidence above which a finding is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockThresholds {
    pub prompt_injection: f64,
    pub xss: f64,
    pub path_traversal: f64,
    pub dos: f64,
    pub malicious_locator: f64,
}

impl BlockThresholds {
    /// Threshold for `kind`.
    pub fn for_kind(&self, kind: ThreatKind) -> f64 {
        match kind {
            ThreatKind::PromptInjection => self.prompt_injection,
            ThreatKind::Xss => self.xss,
            ThreatKind::PathTraversal => self.path_traversal,
            ThreatKind::Dos => self.dos,
            ThreatKind::MaliciousLocator => self.malicious_locator,
        }
    }
}

impl Default for BlockThresholds {
    fn default() -> Self {
        Self {
            prompt_injection: 0.8,
            xss: 0.7,
            path_traversal: 0.7,
            dos: 0.8,
            malicious_locator: 0.7,
        }
    }
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Mark findings above their threshold as blocked
    pub auto_block: bool,
    pub prompt_injection: bool,
    pub xss: bool,
    pub path_traversal: bool,
    pub dos: bool,
    pub malicious_locator: bool,
    pub thresholds: BlockThresholds,
    /// Payload size that counts as a DoS signal
    pub max_input_bytes: usize,
    /// Locator length that counts as excessive
    pub max_locator_length: usize,
    /// Query parameter value length that counts as oversized
    pub max_query_param_bytes: usize,
    /// Remote hosts a locator may address (subdomains included)
    pub allowed_hosts: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            auto_block: true,
            prompt_injection: true,
            xss: true,
            path_traversal: true,
            dos: true,
            malicious_locator: true,
            thresholds: BlockThresholds::default(),
            max_input_bytes: 100_000,
            max_locator_length: 2048,
            max_query_param_bytes: 1000,
            allowed_hosts: Vec::new(),
        }
    }
}

impl DetectorConfig {
    /// Checks thresholds lie in `[0, 1]`.
    pub fn validate(&self) -> Result<(), DetectError> {
        for kind in [
            ThreatKind::PromptInjection,
            ThreatKind::Xss,
            ThreatKind::PathTraversal,
            ThreatKind::Dos,
            ThreatKind::MaliciousLocator,
        ] {
            let value = self.thresholds.for_kind(kind);
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectError::Threshold { kind, value });
            }
        }
        Ok(())
    }
}

/// Stateless threat scorer.
///
/// All pattern tables are compiled in [`ThreatDetector::new`]; a built
/// detector is immutable and can be shared across threads.
pub struct ThreatDetector {
    config: DetectorConfig,
    prompt: PatternTable,
    xss: PatternTable,
    traversal: PatternTable,
    system_paths: PatternTable,
    locator_script: PatternTable,
    code_injection: PatternTable,
    tag: regex::Regex,
    locators: LocatorParser,
    stripper: MarkupStripper,
    audit: Option<Audit>,
}

impl ThreatDetector {
    /// Builds a detector without an audit sink.
    pub fn new(config: DetectorConfig) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            prompt: PatternTable::compile(PROMPT_INJECTION)?,
            xss: PatternTable::compile(XSS)?,
            traversal: PatternTable::compile(PATH_TRAVERSAL)?,
            system_paths: PatternTable::compile(ABSOLUTE_SYSTEM_PATH)?,
            locator_script: PatternTable::compile(LOCATOR_SCRIPT)?,
            code_injection: PatternTable::compile(CODE_INJECTION)?,
            tag: regex::Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(\s[^<>]*)?/?>")?,
            locators: LocatorParser::new()?,
            stripper: MarkupStripper::new()?,
            config,
            audit: None,
        })
    }

    /// Builds a detector that records high-risk detections.
    pub fn with_audit(config: DetectorConfig, audit: Audit) -> Result<Self, DetectError> {
        let mut detector = Self::new(config)?;
        detector.audit = Some(audit);
        Ok(detector)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Splits a resource locator with the detector's grammar.
    pub fn parse_locator(&self, uri: &str) -> Result<Locator, LocatorError> {
        self.locators.parse(uri)
    }

    /// Classifies `input`.
    ///
    /// Pure with respect to `input`, `context` and the configuration: the
    /// same call always returns the same [`Detection`]. When the overall
    /// risk is high or critical a violation is also appended to the audit
    /// log, if one is attached.
    pub fn detect(&self, input: &str, context: ContextTag) -> Detection {
        let mut findings = Vec::new();

        if self.config.prompt_injection {
            findings.extend(self.check_prompt_injection(input));
        }
        if self.config.xss {
            findings.extend(self.check_xss(input));
        }
        if self.config.path_traversal {
            findings.extend(self.check_path_traversal(input));
        }
        if self.config.dos {
            findings.extend(self.check_dos(input));
        }
        if self.config.malicious_locator && context == ContextTag::ResourceLocator {
            findings.extend(self.check_locator(input));
        }

        findings.retain(|f| f.confidence >= MIN_CONFIDENCE);
        for finding in &mut findings {
            finding.blocked = self.config.auto_block
                && finding.confidence > self.config.thresholds.for_kind(finding.kind);
        }

        let overall_risk = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Low);
        let sanitized = findings
            .iter()
            .any(|f| f.blocked)
            .then(|| self.stripper.sanitize(input));

        let detection = Detection {
            findings,
            overall_risk,
            sanitized,
        };

        if detection.overall_risk >= Severity::High {
            self.record(&detection, context);
        }
        debug!(
            findings = detection.findings.len(),
            risk = %detection.overall_risk,
            "detection complete"
        );
        detection
    }

    /// Scans text for code-injection shapes. Returns matched descriptions.
    pub fn scan_code_injection(&self, text: &str) -> Vec<&'static str> {
        self.code_injection
            .score(text)
            .map(|s| s.matched)
            .unwrap_or_default()
    }

    /// Returns true if `text` names an absolute system path.
    pub fn is_system_path(&self, text: &str) -> bool {
        self.system_paths.is_match(text)
    }

    /// Strips invisible characters, markup and protocol prefixes from `text`.
    pub fn strip_markup(&self, text: &str) -> String {
        self.stripper.sanitize(text)
    }

    fn check_prompt_injection(&self, input: &str) -> Option<ThreatFinding> {
        let score = self.prompt.score(input)?;
        Some(ThreatFinding::new(
            ThreatKind::PromptInjection,
            score.confidence,
            score.describe(),
        ))
    }

    fn check_xss(&self, input: &str) -> Option<ThreatFinding> {
        let tags = self.tag.find_iter(input).count();
        let tag_term = (tags as f64 * TAG_WEIGHT).min(MAX_TAG_TERM);
        let score = self.xss.score(input);
        if score.is_none() && tags == 0 {
            return None;
        }

        let (base, mut description) = match score {
            Some(s) => (s.confidence, s.describe()),
            None => (0.0, String::new()),
        };
        if tags > 0 {
            if !description.is_empty() {
                description.push_str("; ");
            }
            description.push_str(&format!("{} HTML-like tags", tags));
        }
        Some(ThreatFinding::new(
            ThreatKind::Xss,
            (base + tag_term).min(1.0),
            description,
        ))
    }

    fn check_path_traversal(&self, input: &str) -> Option<ThreatFinding> {
        let score = self.traversal.score(input);
        let absolute = self.system_paths.is_match(input);
        if score.is_none() && !absolute {
            return None;
        }

        let (mut confidence, mut description) = match score {
            Some(s) => (s.confidence, s.describe()),
            None => (0.0, String::new()),
        };
        if absolute {
            confidence += ABSOLUTE_PATH_BUMP;
            if !description.is_empty() {
                description.push_str("; ");
            }
            description.push_str("absolute system path");
        }
        Some(ThreatFinding::new(
            ThreatKind::PathTraversal,
            confidence.min(1.0),
            description,
        ))
    }

    fn check_dos(&self, input: &str) -> Option<ThreatFinding> {
        let mut signals: Vec<(f64, String)> = Vec::new();

        if input.len() > self.config.max_input_bytes {
            signals.push((
                0.7,
                format!(
                    "payload of {} bytes exceeds {}",
                    input.len(),
                    self.config.max_input_bytes
                ),
            ));
        }
        if input.len() < DOS_HEURISTIC_MIN_BYTES {
            return combine(ThreatKind::Dos, signals);
        }
        if let Some(rep) = find_repetition(input.as_bytes()) {
            signals.push((
                0.8,
                format!(
                    "{}-byte unit repeated {} times",
                    rep.period, rep.repeats
                ),
            ));
        }
        if let Some(ratio) = symbol_ratio(input) {
            if ratio > SYMBOL_RATIO_THRESHOLD {
                signals.push((0.5, format!("{:.0}% non-alphanumeric", ratio * 100.0)));
            }
        }

        combine(ThreatKind::Dos, signals)
    }

    fn check_locator(&self, input: &str) -> Option<ThreatFinding> {
        let locator = match self.locators.parse(input.trim()) {
            Ok(locator) => locator,
            Err(e) => {
                return Some(ThreatFinding::new(
                    ThreatKind::MaliciousLocator,
                    0.6,
                    format!("malformed locator: {}", e),
                ))
            }
        };
        combine(ThreatKind::MaliciousLocator, self.locator_signals(input, &locator))
    }

    fn locator_signals(&self, raw: &str, locator: &Locator) -> Vec<(f64, String)> {
        let mut signals = Vec::new();

        if locator.is_script() {
            signals.push((0.95, format!("{}: scheme", locator.scheme)));
        }
        if locator.is_remote() && !locator.host_allowed(&self.config.allowed_hosts) {
            signals.push((0.7, format!("host '{}' not allowed", locator.host)));
        }
        if raw.len() > self.config.max_locator_length {
            signals.push((
                0.6,
                format!(
                    "locator length {} exceeds {}",
                    raw.len(),
                    self.config.max_locator_length
                ),
            ));
        }
        for (name, value) in locator.query_pairs() {
            if value.len() > self.config.max_query_param_bytes {
                signals.push((0.5, format!("query parameter '{}' is {} bytes", name, value.len())));
            }
            if let Some(score) = self.locator_script.score(&value) {
                signals.push((score.confidence, format!("query parameter '{}': {}", name, score.describe())));
            }
        }
        signals
    }

    fn record(&self, detection: &Detection, context: ContextTag) {
        let Some(audit) = &self.audit else {
            return;
        };
        let Some(worst) = detection
            .findings
            .iter()
            .max_by(|a, b| a.severity.cmp(&b.severity).then(b.kind.cmp(&a.kind)))
        else {
            return;
        };
        let violation = Violation::new(
            worst.kind.violation_kind(),
            detection.overall_risk,
            format!("{}: {}", worst.kind, worst.description),
            "detector",
            audit.now_ms(),
        )
        .with_meta("confidence", worst.confidence)
        .with_meta("findings", detection.findings.len())
        .with_meta("context", format!("{:?}", context))
        .with_meta("blocked", detection.is_blocked());
        audit.log().record(violation);
    }
}

/// Folds independent signals into one finding: the strongest signal plus a
/// bonus per additional signal.
fn combine(kind: ThreatKind, signals: Vec<(f64, String)>) -> Option<ThreatFinding> {
    if signals.is_empty() {
        return None;
    }
    let max = signals.iter().map(|(c, _)| *c).fold(0.0, f64::max);
    let bonus = EXTRA_MATCH_BONUS * (signals.len() - 1) as f64;
    let description = signals
        .into_iter()
        .map(|(_, d)| d)
        .collect::<Vec<_>>()
        .join("; ");
    Some(ThreatFinding::new(kind, (max + bonus).min(1.0), description))
}

/// A run of back-to-back copies of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repetition {
    /// Unit length in bytes.
    pub period: usize,
    /// Number of whole copies.
    pub repeats: usize,
}

/// Finds the first run of at least [`MIN_REPEATS`] copies of a unit of
/// 1..=[`MAX_REPEAT_PERIOD`] bytes spanning at least [`MIN_REPEAT_SPAN`]
/// bytes. Equivalent to a `(.{1,64})\1{9,}` backreference match.
pub fn find_repetition(bytes: &[u8]) -> Option<Repetition> {
    if bytes.len() < MIN_REPEAT_SPAN {
        return None;
    }
    for period in 1..=MAX_REPEAT_PERIOD {
        if bytes.len() < period * MIN_REPEATS {
            break;
        }
        // `run` counts consecutive positions where bytes[i] == bytes[i + period];
        // a run of r such positions spans r + period bytes.
        let mut run = 0usize;
        let mut best = 0usize;
        for i in 0..bytes.len() - period {
            if bytes[i] == bytes[i + period] {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        let span = best + period;
        if best > 0 && span >= MIN_REPEAT_SPAN && span / period >= MIN_REPEATS {
            return Some(Repetition {
                period,
                repeats: span / period,
            });
        }
    }
    None
}

/// Share of characters that are neither alphanumeric nor whitespace.
/// `None` for inputs shorter than [`SYMBOL_RATIO_MIN_LEN`] characters.
pub fn symbol_ratio(input: &str) -> Option<f64> {
    let mut total = 0usize;
    let mut symbols = 0usize;
    for c in input.chars() {
        total += 1;
        if !c.is_alphanumeric() && !c.is_whitespace() {
            symbols += 1;
        }
    }
    (total >= SYMBOL_RATIO_MIN_LEN).then(|| symbols as f64 / total as f64)
}
