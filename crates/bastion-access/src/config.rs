//! Access control configuration.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AccessError, Result};

/// Permission that grants every capability.
pub const WILDCARD_PERMISSION: &str = "*";

/// Length of a rate window (1 hour).
pub const WINDOW_MS: u64 = 60 * 60 * 1000;

/// Configuration for [`AccessManager`](crate::AccessManager).
///
/// Use the builder methods to adjust the defaults.
///
/// # Example
///
/// ```rust
/// use bastion_access::AccessConfig;
///
/// let config = AccessConfig::new()
///     .with_requests_per_hour(500)
///     .with_session_timeout_minutes(15)
///     .with_require_auth(true)
///     .with_role("auditor", ["resources.read"]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AccessConfig {
    /// Session ceiling per window.
    pub requests_per_hour: u64,
    /// Origin ceiling as a multiple of the session ceiling.
    pub origin_multiplier: u64,
    /// Rate window length.
    pub window_ms: u64,
    /// Idle time after which a session is treated as absent.
    pub session_timeout_ms: u64,
    /// Whether permission checks are enforced.
    pub require_auth: bool,
    /// Role assigned to new sessions.
    pub default_role: String,
    /// Role name to permission set.
    pub roles: BTreeMap<String, BTreeSet<String>>,
    /// Origins that bypass quotas.
    pub allowed_origins: BTreeSet<String>,
    /// Origins that are always refused.
    pub blocked_origins: BTreeSet<String>,
}

impl AccessConfig {
    /// Creates a config with default values.
    ///
    /// Defaults:
    /// - 1,000 requests per hour per session, 2x that per origin
    /// - Session timeout: 30 minutes
    /// - Authentication: not required
    /// - Roles: `user` (call, read, prompt) and `admin` (`*`), default `user`
    #[must_use]
    pub fn new() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            "user".to_string(),
            ["tools.call", "resources.read", "prompts.get"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        roles.insert(
            "admin".to_string(),
            BTreeSet::from([WILDCARD_PERMISSION.to_string()]),
        );
        Self {
            requests_per_hour: 1000,
            origin_multiplier: 2,
            window_ms: WINDOW_MS,
            session_timeout_ms: 30 * 60 * 1000,
            require_auth: false,
            default_role: "user".to_string(),
            roles,
            allowed_origins: BTreeSet::new(),
            blocked_origins: BTreeSet::new(),
        }
    }

    /// Sets the session ceiling.
    #[must_use]
    pub fn with_requests_per_hour(mut self, limit: u64) -> Self {
        self.requests_per_hour = limit;
        self
    }

    /// Sets the idle timeout in minutes.
    #[must_use]
    pub fn with_session_timeout_minutes(mut self, minutes: u64) -> Self {
        self.session_timeout_ms = minutes * 60 * 1000;
        self
    }

    /// Sets the idle timeout in milliseconds.
    #[must_use]
    pub fn with_session_timeout_ms(mut self, ms: u64) -> Self {
        self.session_timeout_ms = ms;
        self
    }

    /// Enables or disables permission enforcement.
    #[must_use]
    pub fn with_require_auth(mut self, required: bool) -> Self {
        self.require_auth = required;
        self
    }

    /// Sets the role assigned to new sessions.
    #[must_use]
    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = role.into();
        self
    }

    /// Defines or replaces a role.
    #[must_use]
    pub fn with_role<I, S>(mut self, role: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .insert(role.into(), permissions.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an origin to the allowlist.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.insert(origin.into());
        self
    }

    /// Adds an origin to the blocklist.
    #[must_use]
    pub fn block_origin(mut self, origin: impl Into<String>) -> Self {
        self.blocked_origins.insert(origin.into());
        self
    }

    /// Origin ceiling per window.
    pub fn origin_limit(&self) -> u64 {
        self.requests_per_hour.saturating_mul(self.origin_multiplier)
    }

    /// Rejects zero ceilings, a missing default role and overlapping
    /// origin lists.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_hour == 0 {
            return Err(AccessError::Config("requests_per_hour must be positive".into()));
        }
        if self.origin_multiplier == 0 {
            return Err(AccessError::Config("origin_multiplier must be positive".into()));
        }
        if self.window_ms == 0 || self.session_timeout_ms == 0 {
            return Err(AccessError::Config("window and session timeout must be positive".into()));
        }
        if !self.roles.contains_key(&self.default_role) {
            return Err(AccessError::Config(format!(
                "default role '{}' is not defined",
                self.default_role
            )));
        }
        if let Some(origin) = self.allowed_origins.intersection(&self.blocked_origins).next() {
            return Err(AccessError::Config(format!(
                "origin '{}' is both allowed and blocked",
                origin
            )));
        }
        Ok(())
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AccessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.origin_limit(), 2000);
    }

    #[test]
    fn test_missing_default_role_rejected() {
        let config = AccessConfig::new().with_default_role("ghost");
        assert!(matches!(config.validate(), Err(AccessError::Config(_))));
    }

    #[test]
    fn test_overlapping_origins_rejected() {
        let config = AccessConfig::new()
            .allow_origin("10.0.0.1")
            .block_origin("10.0.0.1");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        assert!(AccessConfig::new().with_requests_per_hour(0).validate().is_err());
    }
}
