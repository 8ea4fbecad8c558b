//! Typed security policy.
//!
//! One [`SecurityPolicy`] describes the whole system. Every section
//! rejects unknown fields and falls back to explicit defaults for missing
//! ones, so a typo in a policy file is a startup error rather than a
//! silently ignored setting.
//!
//! ```toml
//! [rate]
//! requests_per_hour = 500
//! session_timeout_minutes = 15
//!
//! [access]
//! require_auth = true
//! default_role = "reader"
//! roles = { reader = ["resources.read"], admin = ["*"] }
//! blocked_origins = ["203.0.113.9"]
//!
//! [network]
//! allowed_hosts = ["docs.rs", "crates.io"]
//!
//! [sandbox.limits]
//! execution_time_ms = 2000
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use bastion_access::{AccessConfig, WINDOW_MS};
use bastion_audit::Severity;
use bastion_detect::{BlockThresholds, DetectorConfig};
use bastion_sandbox::{IsolationStrategy, ResourceLimits, Restrictions, SandboxConfig};
use serde::{Deserialize, Serialize};

use crate::error::BastionError;
use crate::Result;

/// Configuration for the Bastion security orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityPolicy {
    /// Request size ceilings.
    pub limits: LimitsPolicy,

    /// Quotas and session lifetime.
    pub rate: RatePolicy,

    /// Roles, permissions and origin lists.
    pub access: AccessPolicy,

    /// Remote host and scheme allow-lists.
    pub network: NetworkPolicy,

    /// Threat detector toggles and thresholds.
    pub detection: DetectionPolicy,

    /// Sandboxed execution ceilings and capabilities.
    pub sandbox: SandboxPolicy,
}

/// Request size ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsPolicy {
    /// Serialized argument payload ceiling.
    pub max_payload_bytes: usize,

    /// Resource locator length ceiling.
    pub max_uri_length: usize,

    /// Capability and template name length ceiling.
    pub max_name_length: usize,

    /// Nesting ceiling of structured arguments.
    pub max_argument_depth: usize,
}

impl Default for LimitsPolicy {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024, // 1MB
            max_uri_length: 2048,
            max_name_length: 128,
            max_argument_depth: 32,
        }
    }
}

/// Quotas and session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatePolicy {
    /// Session ceiling per hourly window.
    pub requests_per_hour: u64,

    /// Origin ceiling as a multiple of the session ceiling.
    pub origin_multiplier: u64,

    /// Idle time after which a session is treated as absent.
    pub session_timeout_minutes: u64,

    /// Period of the background session sweep.
    pub sweep_interval_secs: u64,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            requests_per_hour: 1000,
            origin_multiplier: 2,
            session_timeout_minutes: 30,
            sweep_interval_secs: 60,
        }
    }
}

/// Roles, permissions and origin lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessPolicy {
    /// Enforce permission checks.
    pub require_auth: bool,

    /// Role assigned to new sessions. Must exist in `roles`.
    pub default_role: String,

    /// Role name to permission set. `*` grants everything.
    pub roles: BTreeMap<String, BTreeSet<String>>,

    /// Origins that bypass quotas.
    pub allowed_origins: BTreeSet<String>,

    /// Origins that are always refused.
    pub blocked_origins: BTreeSet<String>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        let base = AccessConfig::default();
        Self {
            require_auth: base.require_auth,
            default_role: base.default_role,
            roles: base.roles,
            allowed_origins: base.allowed_origins,
            blocked_origins: base.blocked_origins,
        }
    }
}

/// Remote host and scheme allow-lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkPolicy {
    /// Hosts remote locators and sandbox `fetch` may address
    /// (subdomains included). Empty means no remote host is allowed.
    pub allowed_hosts: Vec<String>,

    /// Locator schemes accepted by resource reads.
    pub allowed_schemes: Vec<String>,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allowed_schemes: vec!["http".into(), "https".into(), "file".into()],
        }
    }
}

/// Threat detector toggles and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionPolicy {
    /// Mark findings above their category threshold as blocked.
    pub auto_block: bool,
    pub prompt_injection: bool,
    pub xss: bool,
    pub path_traversal: bool,
    pub dos: bool,
    pub malicious_locator: bool,

    /// Per-category block thresholds.
    pub thresholds: BlockThresholds,

    /// Payload size that counts as a DoS signal.
    pub max_input_bytes: usize,

    /// Query parameter value length that counts as oversized.
    pub max_query_param_bytes: usize,

    /// Unblocked findings at or above this severity still deny.
    pub deny_severity: Severity,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        let base = DetectorConfig::default();
        Self {
            auto_block: base.auto_block,
            prompt_injection: base.prompt_injection,
            xss: base.xss,
            path_traversal: base.path_traversal,
            dos: base.dos,
            malicious_locator: base.malicious_locator,
            thresholds: base.thresholds,
            max_input_bytes: base.max_input_bytes,
            max_query_param_bytes: base.max_query_param_bytes,
            deny_severity: Severity::High,
        }
    }
}

/// Sandboxed execution ceilings and capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxPolicy {
    /// memory-mb, cpu-time-ms, execution-time-ms, file-reads, network-requests.
    pub limits: ResourceLimits,

    /// eval-disabled, dynamic-construction-disabled, network and file toggles.
    pub restrictions: Restrictions,

    /// Directories `readFile` may read beneath.
    pub allowed_dirs: Vec<PathBuf>,

    /// Extensions `readFile` may read.
    pub allowed_extensions: Vec<String>,

    /// Strategy used when a request names none.
    pub default_strategy: IsolationStrategy,

    /// Pool size ceiling.
    pub max_workers: usize,

    /// Path to `bastion-sandbox-worker`.
    pub worker_binary: Option<PathBuf>,

    /// Captured `console.log` lines kept per execution.
    pub max_output_lines: usize,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        let base = SandboxConfig::default();
        Self {
            limits: base.limits,
            restrictions: base.restrictions,
            allowed_dirs: base.allowed_dirs,
            allowed_extensions: base.allowed_extensions,
            default_strategy: base.default_strategy,
            max_workers: base.max_workers,
            worker_binary: base.worker_binary,
            max_output_lines: base.max_output_lines,
        }
    }
}

impl SecurityPolicy {
    /// Parses and validates a TOML policy.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let policy: Self = toml::from_str(text).map_err(|e| config_err(format!("invalid TOML policy: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parses and validates a JSON policy.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let policy: Self =
            serde_json::from_str(text).map_err(|e| config_err(format!("invalid JSON policy: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Loads a policy file, choosing the format by extension
    /// (`.toml` or `.json`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_err(format!("cannot read {}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&text),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text),
            _ => Err(config_err(format!(
                "unsupported policy format: {} (expected .toml or .json)",
                path.display()
            ))),
        }
    }

    /// Rejects semantically malformed policies.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Config`] if:
    /// - A size, quota, timeout or sandbox ceiling is zero
    /// - The default role is not in the role table
    /// - An origin is both allowed and blocked
    /// - File access is enabled with no allowed extension
    /// - A detection threshold lies outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        for (name, value) in [
            ("limits.max_payload_bytes", l.max_payload_bytes),
            ("limits.max_uri_length", l.max_uri_length),
            ("limits.max_name_length", l.max_name_length),
            ("limits.max_argument_depth", l.max_argument_depth),
        ] {
            if value == 0 {
                return Err(config_err(format!("{} must be positive", name)));
            }
        }

        let r = &self.rate;
        for (name, value) in [
            ("rate.requests_per_hour", r.requests_per_hour),
            ("rate.origin_multiplier", r.origin_multiplier),
            ("rate.session_timeout_minutes", r.session_timeout_minutes),
            ("rate.sweep_interval_secs", r.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(config_err(format!("{} must be positive", name)));
            }
        }

        let s = &self.sandbox.limits;
        for (name, value) in [
            ("sandbox.limits.memory_mb", s.memory_mb),
            ("sandbox.limits.cpu_time_ms", s.cpu_time_ms),
            ("sandbox.limits.execution_time_ms", s.execution_time_ms),
        ] {
            if value == 0 {
                return Err(config_err(format!("{} must be positive", name)));
            }
        }

        if !self.access.roles.contains_key(&self.access.default_role) {
            return Err(config_err(format!(
                "access.default_role '{}' is not defined in access.roles",
                self.access.default_role
            )));
        }
        if let Some(origin) = self
            .access
            .allowed_origins
            .intersection(&self.access.blocked_origins)
            .next()
        {
            return Err(config_err(format!("origin '{}' is both allowed and blocked", origin)));
        }
        if self.sandbox.restrictions.file_access_enabled && self.sandbox.allowed_extensions.is_empty() {
            return Err(config_err(
                "sandbox file access is enabled but sandbox.allowed_extensions is empty",
            ));
        }
        if self.network.allowed_schemes.is_empty() {
            return Err(config_err("network.allowed_schemes must not be empty"));
        }

        // Component checks catch anything the list above does not name.
        self.detector_config()
            .validate()
            .map_err(|e| config_err(e.to_string()))?;
        self.access_config()
            .validate()
            .map_err(|e| config_err(e.to_string()))?;
        self.sandbox_config()
            .validate()
            .map_err(|e| config_err(e.to_string()))?;
        Ok(())
    }

    /// Access manager settings derived from the `rate` and `access` sections.
    pub fn access_config(&self) -> AccessConfig {
        AccessConfig {
            requests_per_hour: self.rate.requests_per_hour,
            origin_multiplier: self.rate.origin_multiplier,
            window_ms: WINDOW_MS,
            session_timeout_ms: self.rate.session_timeout_minutes.saturating_mul(60 * 1000),
            require_auth: self.access.require_auth,
            default_role: self.access.default_role.clone(),
            roles: self.access.roles.clone(),
            allowed_origins: self.access.allowed_origins.clone(),
            blocked_origins: self.access.blocked_origins.clone(),
        }
    }

    /// Detector settings derived from the `detection`, `limits` and
    /// `network` sections.
    pub fn detector_config(&self) -> DetectorConfig {
        let d = &self.detection;
        DetectorConfig {
            auto_block: d.auto_block,
            prompt_injection: d.prompt_injection,
            xss: d.xss,
            path_traversal: d.path_traversal,
            dos: d.dos,
            malicious_locator: d.malicious_locator,
            thresholds: d.thresholds,
            max_input_bytes: d.max_input_bytes,
            max_locator_length: self.limits.max_uri_length,
            max_query_param_bytes: d.max_query_param_bytes,
            allowed_hosts: self.network.allowed_hosts.clone(),
        }
    }

    /// Sandbox settings derived from the `sandbox` and `network` sections.
    pub fn sandbox_config(&self) -> SandboxConfig {
        let s = &self.sandbox;
        SandboxConfig {
            limits: s.limits,
            restrictions: s.restrictions,
            allowed_dirs: s.allowed_dirs.clone(),
            allowed_extensions: s.allowed_extensions.clone(),
            allowed_hosts: self.network.allowed_hosts.clone(),
            default_strategy: s.default_strategy,
            max_workers: s.max_workers,
            worker_binary: s.worker_binary.clone(),
            max_output_lines: s.max_output_lines,
        }
    }
}

fn config_err(message: impl Into<String>) -> BastionError {
    BastionError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_validates() {
        let policy = SecurityPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.rate.requests_per_hour, 1000);
        assert_eq!(policy.access.default_role, "user");
        assert_eq!(policy.detection.deny_severity, Severity::High);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let policy = SecurityPolicy::from_toml_str(
            r#"
            [rate]
            requests_per_hour = 5

            [sandbox.limits]
            execution_time_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(policy.rate.requests_per_hour, 5);
        assert_eq!(policy.rate.session_timeout_minutes, 30);
        assert_eq!(policy.sandbox.limits.execution_time_ms, 250);
        assert_eq!(policy.sandbox.limits.memory_mb, 64);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = SecurityPolicy::from_toml_str("[rate]\nrequests_per_minute = 5\n").unwrap_err();
        assert!(matches!(err, BastionError::Config(_)));
        assert!(err.to_string().contains("requests_per_minute"));
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(SecurityPolicy::from_json_str(r#"{"metrics": {}}"#).is_err());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let err = SecurityPolicy::from_json_str(r#"{"rate": {"requests_per_hour": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("rate.requests_per_hour"));

        let mut policy = SecurityPolicy::default();
        policy.sandbox.limits.execution_time_ms = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_missing_default_role_rejected() {
        let mut policy = SecurityPolicy::default();
        policy.access.default_role = "ghost".into();
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_overlapping_origin_lists_rejected() {
        let mut policy = SecurityPolicy::default();
        policy.access.allowed_origins.insert("10.0.0.1".into());
        policy.access.blocked_origins.insert("10.0.0.1".into());
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_file_access_without_extensions_rejected() {
        let mut policy = SecurityPolicy::default();
        policy.sandbox.restrictions.file_access_enabled = true;
        policy.sandbox.allowed_extensions.clear();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut policy = SecurityPolicy::default();
        policy.detection.thresholds.xss = 1.5;
        assert!(matches!(policy.validate(), Err(BastionError::Config(_))));
    }

    #[test]
    fn test_component_configs_follow_policy() {
        let mut policy = SecurityPolicy::default();
        policy.rate.session_timeout_minutes = 2;
        policy.network.allowed_hosts = vec!["docs.rs".into()];
        policy.limits.max_uri_length = 512;

        assert_eq!(policy.access_config().session_timeout_ms, 120_000);
        assert_eq!(policy.detector_config().max_locator_length, 512);
        assert_eq!(policy.detector_config().allowed_hosts, vec!["docs.rs".to_string()]);
        assert_eq!(policy.sandbox_config().allowed_hosts, vec!["docs.rs".to_string()]);
    }

    #[test]
    fn test_json_roundtrip() {
        let policy = SecurityPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let parsed = SecurityPolicy::from_json_str(&json).unwrap();
        assert_eq!(parsed, policy);
    }
}
