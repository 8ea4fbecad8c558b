//! # Access Control Manager
//!
//! Session, origin-window and permission bookkeeping behind one shared
//! handle.
//!
//! ## State Machine
//!
//! ```text
//!            check_rate_limit            idle > timeout
//!  absent ──────────────────▶ active ─────────────────▶ expired ──▶ absent
//!                              │  ▲
//!               block_session  │  │ unblock_session
//!                              ▼  │
//!                             blocked
//! ```
//!
//! ## Concurrency
//!
//! Sessions and origin windows live in two `DashMap`s. A counter update
//! holds the shard lock of its key for the whole read-modify-write, so
//! checks on the same key serialize and checks on different keys run in
//! parallel. When both maps are held, the session entry is always taken
//! first.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bastion_audit::{Audit, SecurityEvent, Severity, Violation, ViolationKind};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{AccessConfig, WILDCARD_PERMISSION};
use crate::error::{AccessError, Result};
use crate::session::{RateWindow, Session, SessionSnapshot};

const SOURCE: &str = "access";

/// Outcome of a rate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the session window.
    pub remaining: u64,
    /// When the session window resets, in ms since the epoch.
    pub reset_at_ms: u64,
    /// Why the request was refused.
    pub reason: Option<String>,
}

impl RateDecision {
    fn allow(remaining: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at_ms,
            reason: None,
        }
    }

    fn deny(error: &AccessError, reset_at_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at_ms,
            reason: Some(error.to_string()),
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PermissionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

/// Thread-safe access control state.
///
/// # Example
///
/// ```rust
/// use bastion_access::{AccessConfig, AccessManager};
///
/// let manager = AccessManager::new(AccessConfig::new().with_requests_per_hour(2))?;
/// assert!(manager.check_rate_limit("s1", "10.0.0.1").allowed);
/// assert!(manager.check_rate_limit("s1", "10.0.0.1").allowed);
/// assert!(!manager.check_rate_limit("s1", "10.0.0.1").allowed);
/// # Ok::<(), bastion_access::AccessError>(())
/// ```
pub struct AccessManager {
    config: AccessConfig,
    sessions: DashMap<String, Session>,
    origins: DashMap<String, RateWindow>,
    allowed_origins: DashSet<String>,
    blocked_origins: DashSet<String>,
    audit: Audit,
}

impl AccessManager {
    /// Creates a manager with its own audit sinks.
    pub fn new(config: AccessConfig) -> Result<Self> {
        Self::with_audit(config, Audit::new())
    }

    /// Creates a manager publishing to `audit` and reading its clock.
    pub fn with_audit(config: AccessConfig, audit: Audit) -> Result<Self> {
        config.validate()?;
        let allowed_origins = config.allowed_origins.iter().cloned().collect();
        let blocked_origins = config.blocked_origins.iter().cloned().collect();
        Ok(Self {
            config,
            sessions: DashMap::new(),
            origins: DashMap::new(),
            allowed_origins,
            blocked_origins,
            audit,
        })
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    /// Evaluates and counts one request.
    ///
    /// Order: origin blocklist, origin allowlist (no counting), session
    /// block, session ceiling, origin ceiling, then both counters are
    /// incremented. Only an admitted request refreshes the idle clock.
    pub fn check_rate_limit(&self, session_id: &str, origin: &str) -> RateDecision {
        let now = self.audit.now_ms();
        let window_ms = self.config.window_ms;
        let limit = self.config.requests_per_hour;

        if self.blocked_origins.contains(origin) {
            let err = AccessError::OriginBlocked {
                origin: origin.to_string(),
            };
            self.deny(ViolationKind::OriginBlocked, Severity::High, &err, session_id, origin);
            return RateDecision::deny(&err, now.saturating_add(window_ms));
        }

        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, origin, &self.config.default_role, now));
        let expired_idle = session
            .is_expired(now, self.config.session_timeout_ms)
            .then(|| session.idle_ms(now));
        if expired_idle.is_some() {
            *session = Session::new(session_id, origin, &self.config.default_role, now);
        }

        if self.allowed_origins.contains(origin) {
            session.touch(origin, now);
            let reset_at = session.window.reset_at(window_ms);
            drop(session);
            self.emit_expired(session_id, expired_idle);
            return RateDecision::allow(limit, reset_at);
        }

        if session.blocked {
            drop(session);
            let err = AccessError::SessionBlocked {
                session_id: session_id.to_string(),
            };
            self.deny(ViolationKind::SessionBlocked, Severity::High, &err, session_id, origin);
            return RateDecision::deny(&err, now.saturating_add(window_ms));
        }

        session.window.roll(now, window_ms);
        let reset_at = session.window.reset_at(window_ms);

        if session.window.count >= limit {
            let count = session.window.count;
            drop(session);
            let err = AccessError::RateLimited {
                count,
                limit,
                reset_at_ms: reset_at,
            };
            self.rate_exceeded(session_id, origin, count, limit, &err);
            return RateDecision::deny(&err, reset_at);
        }

        let origin_limit = self.config.origin_limit();
        let mut window = self
            .origins
            .entry(origin.to_string())
            .or_insert_with(|| RateWindow::new(now));
        window.roll(now, window_ms);
        if window.count >= origin_limit {
            let count = window.count;
            drop(window);
            drop(session);
            let err = AccessError::OriginRateLimited {
                origin: origin.to_string(),
                limit: origin_limit,
            };
            self.rate_exceeded(session_id, origin, count, origin_limit, &err);
            return RateDecision::deny(&err, reset_at);
        }

        window.count += 1;
        session.window.count += 1;
        session.touch(origin, now);
        let remaining = limit - session.window.count;
        drop(window);
        drop(session);

        debug!(session_id, origin, remaining, "rate check passed");
        self.emit_expired(session_id, expired_idle);
        RateDecision::allow(remaining, reset_at)
    }

    /// Evicts the session if it idled past the timeout.
    ///
    /// A live or absent session passes; an idle one is removed and
    /// reported as [`AccessError::SessionExpired`].
    pub fn check_session_timeout(&self, session_id: &str) -> Result<()> {
        let now = self.audit.now_ms();
        let timeout = self.config.session_timeout_ms;
        let removed = self
            .sessions
            .remove_if(session_id, |_, s| s.is_expired(now, timeout));

        match removed {
            Some((_, session)) => {
                let idle_ms = session.idle_ms(now);
                self.emit_expired(session_id, Some(idle_ms));
                let err = AccessError::SessionExpired {
                    session_id: session_id.to_string(),
                    idle_ms,
                };
                self.audit
                    .violation(ViolationKind::SessionExpired, Severity::Low, err.to_string(), SOURCE);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Checks whether any role of the session grants `capability`.
    ///
    /// Always allows when authentication is not required. Otherwise an
    /// absent or idle session is refused.
    pub fn check_permission(&self, session_id: &str, capability: &str) -> PermissionDecision {
        if !self.config.require_auth {
            return PermissionDecision::allow();
        }
        let now = self.audit.now_ms();

        let refusal = match self.sessions.get(session_id) {
            None => Some("no active session"),
            Some(s) if s.is_expired(now, self.config.session_timeout_ms) => Some("session expired"),
            Some(s) if self.grants(&s, capability) => None,
            Some(_) => Some("capability not granted"),
        };
        let Some(refusal) = refusal else {
            return PermissionDecision::allow();
        };

        let err = AccessError::PermissionDenied {
            session_id: session_id.to_string(),
            capability: capability.to_string(),
        };
        self.audit.emit(SecurityEvent::PermissionDenied {
            session_id: session_id.to_string(),
            capability: capability.to_string(),
        });
        let violation = Violation::new(
            ViolationKind::PermissionDenied,
            Severity::Medium,
            format!("{}: {}", err, refusal),
            SOURCE,
            now,
        )
        .with_meta("session_id", session_id)
        .with_meta("capability", capability);
        self.audit.log().record(violation);

        PermissionDecision {
            allowed: false,
            reason: Some(format!("{}: {}", err, refusal)),
        }
    }

    fn grants(&self, session: &Session, capability: &str) -> bool {
        session
            .roles
            .iter()
            .filter_map(|role| self.config.roles.get(role))
            .flatten()
            .any(|p| p == WILDCARD_PERMISSION || p == capability)
    }

    /// Removes idle sessions and stale origin windows. Returns the number
    /// of sessions removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.audit.now_ms();
        let timeout = self.config.session_timeout_ms;
        let window_ms = self.config.window_ms;

        let mut expired = Vec::new();
        self.sessions.retain(|id, s| {
            if s.is_expired(now, timeout) {
                expired.push((id.clone(), s.idle_ms(now)));
                false
            } else {
                true
            }
        });
        self.origins.retain(|_, w| !w.is_stale(now, window_ms));

        for (id, idle_ms) in &expired {
            self.emit_expired(id, Some(*idle_ms));
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "swept expired sessions");
        }
        expired.len()
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// handle is aborted or the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.sweep_expired();
            }
        })
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    /// Adds `origin` to the blocklist. Returns false if already blocked.
    pub fn block_origin(&self, origin: &str) -> bool {
        let added = self.blocked_origins.insert(origin.to_string());
        if added {
            self.audit.emit(SecurityEvent::OriginBlocked {
                origin: origin.to_string(),
            });
        }
        added
    }

    /// Removes `origin` from the blocklist. Returns false if it was not blocked.
    pub fn unblock_origin(&self, origin: &str) -> bool {
        let removed = self.blocked_origins.remove(origin).is_some();
        if removed {
            self.audit.emit(SecurityEvent::OriginUnblocked {
                origin: origin.to_string(),
            });
        }
        removed
    }

    pub fn is_origin_blocked(&self, origin: &str) -> bool {
        self.blocked_origins.contains(origin)
    }

    /// Blocks a session, creating it if absent.
    pub fn block_session(&self, session_id: &str) {
        let now = self.audit.now_ms();
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, "", &self.config.default_role, now))
            .blocked = true;
        self.audit.emit(SecurityEvent::SessionBlocked {
            session_id: session_id.to_string(),
        });
    }

    /// Unblocks a session. Returns false if it does not exist.
    ///
    /// The idle clock restarts so the session is not swept immediately.
    pub fn unblock_session(&self, session_id: &str) -> bool {
        let now = self.audit.now_ms();
        let found = match self.sessions.get_mut(session_id) {
            Some(mut s) => {
                s.blocked = false;
                s.last_request_ms = now;
                true
            }
            None => false,
        };
        if found {
            self.audit.emit(SecurityEvent::SessionUnblocked {
                session_id: session_id.to_string(),
            });
        }
        found
    }

    /// Grants a defined role to an existing session.
    pub fn grant_role(&self, session_id: &str, role: &str) -> Result<()> {
        if !self.config.roles.contains_key(role) {
            return Err(AccessError::UnknownRole(role.to_string()));
        }
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| AccessError::UnknownSession(session_id.to_string()))?
            .roles
            .insert(role.to_string());
        self.audit.emit(SecurityEvent::RoleGranted {
            session_id: session_id.to_string(),
            role: role.to_string(),
        });
        Ok(())
    }

    /// Revokes a role. Returns false if the session did not hold it.
    pub fn revoke_role(&self, session_id: &str, role: &str) -> Result<bool> {
        let removed = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AccessError::UnknownSession(session_id.to_string()))?
            .roles
            .remove(role);
        if removed {
            self.audit.emit(SecurityEvent::RoleRevoked {
                session_id: session_id.to_string(),
                role: role.to_string(),
            });
        }
        Ok(removed)
    }

    /// Removes a session outright. Returns false if it did not exist.
    pub fn evict_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).map(|s| s.snapshot())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ------------------------------------------------------------------

    fn deny(&self, kind: ViolationKind, severity: Severity, err: &AccessError, session_id: &str, origin: &str) {
        let violation = Violation::new(kind, severity, err.to_string(), SOURCE, self.audit.now_ms())
            .with_meta("session_id", session_id)
            .with_meta("origin", origin);
        self.audit.log().record(violation);
    }

    fn rate_exceeded(&self, session_id: &str, origin: &str, count: u64, limit: u64, err: &AccessError) {
        self.audit.emit(SecurityEvent::RateLimitExceeded {
            session_id: session_id.to_string(),
            origin: origin.to_string(),
            count,
            limit,
        });
        self.deny(ViolationKind::RateLimit, Severity::Medium, err, session_id, origin);
    }

    fn emit_expired(&self, session_id: &str, idle_ms: Option<u64>) {
        if let Some(idle_ms) = idle_ms {
            self.audit.emit(SecurityEvent::SessionExpired {
                session_id: session_id.to_string(),
                idle_ms,
            });
        }
    }
}

impl std::fmt::Debug for AccessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessManager")
            .field("sessions", &self.sessions.len())
            .field("origins", &self.origins.len())
            .field("blocked_origins", &self.blocked_origins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_audit::ManualClock;

    fn manager(config: AccessConfig) -> (AccessManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let audit = Audit::with_clock(clock.clone());
        (AccessManager::with_audit(config, audit).unwrap(), clock)
    }

    #[test]
    fn test_first_check_creates_session_with_default_role() {
        let (m, _) = manager(AccessConfig::new());
        assert!(m.check_rate_limit("s1", "1.1.1.1").allowed);
        let snap = m.session("s1").unwrap();
        assert_eq!(snap.roles, vec!["user".to_string()]);
        assert_eq!(snap.request_count, 1);
    }

    #[test]
    fn test_remaining_counts_down() {
        let (m, _) = manager(AccessConfig::new().with_requests_per_hour(3));
        assert_eq!(m.check_rate_limit("s", "o").remaining, 2);
        assert_eq!(m.check_rate_limit("s", "o").remaining, 1);
        assert_eq!(m.check_rate_limit("s", "o").remaining, 0);
        let denied = m.check_rate_limit("s", "o");
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("rate limit exceeded"));
    }

    #[test]
    fn test_origin_ceiling_is_twice_session_ceiling() {
        let (m, _) = manager(AccessConfig::new().with_requests_per_hour(2));
        for s in ["a", "b"] {
            assert!(m.check_rate_limit(s, "shared").allowed);
            assert!(m.check_rate_limit(s, "shared").allowed);
        }
        let d = m.check_rate_limit("c", "shared");
        assert!(!d.allowed);
        assert_eq!(d.reason.as_deref(), Some("origin rate limit exceeded"));
        assert!(m.check_rate_limit("c", "elsewhere").allowed);
    }

    #[test]
    fn test_blocked_session_denied_until_unblocked() {
        let (m, _) = manager(AccessConfig::new());
        m.block_session("s");
        assert!(!m.check_rate_limit("s", "o").allowed);
        assert!(m.unblock_session("s"));
        assert!(m.check_rate_limit("s", "o").allowed);
    }

    #[test]
    fn test_session_timeout_evicts_idle_session() {
        let (m, clock) = manager(AccessConfig::new().with_session_timeout_minutes(1));
        m.check_rate_limit("s", "o");
        assert!(m.check_session_timeout("s").is_ok());

        clock.advance_secs(61);
        let err = m.check_session_timeout("s").unwrap_err();
        assert!(matches!(err, AccessError::SessionExpired { .. }));
        assert_eq!(m.session_count(), 0);
        assert!(m.check_session_timeout("s").is_ok());
    }

    #[test]
    fn test_expired_session_is_recreated_on_rate_check() {
        let (m, clock) = manager(AccessConfig::new().with_requests_per_hour(1).with_session_timeout_minutes(1));
        assert!(m.check_rate_limit("s", "o").allowed);
        assert!(!m.check_rate_limit("s", "o").allowed);
        clock.advance_secs(120);
        // Fresh session, but the origin window still holds one request.
        assert!(m.check_rate_limit("s", "o").allowed);
    }

    #[test]
    fn test_denied_requests_do_not_refresh_idle_clock() {
        let (m, clock) = manager(
            AccessConfig::new()
                .with_requests_per_hour(1)
                .with_session_timeout_minutes(1),
        );
        assert!(m.check_rate_limit("s", "o").allowed);
        let admitted_at = m.session("s").unwrap().last_request_ms;

        clock.advance_secs(40);
        assert!(!m.check_rate_limit("s", "o").allowed);
        assert_eq!(m.session("s").unwrap().last_request_ms, admitted_at);

        clock.advance_secs(30);
        assert!(matches!(
            m.check_session_timeout("s"),
            Err(AccessError::SessionExpired { .. })
        ));
    }

    #[test]
    fn test_permission_union_and_wildcard() {
        let config = AccessConfig::new()
            .with_require_auth(true)
            .with_role("runner", ["sandbox.execute"]);
        let (m, _) = manager(config);
        m.check_rate_limit("s", "o");

        assert!(m.check_permission("s", "tools.call").allowed);
        assert!(!m.check_permission("s", "sandbox.execute").allowed);

        m.grant_role("s", "runner").unwrap();
        assert!(m.check_permission("s", "sandbox.execute").allowed);
        assert!(m.check_permission("s", "tools.call").allowed);

        assert!(m.revoke_role("s", "runner").unwrap());
        m.grant_role("s", "admin").unwrap();
        assert!(m.check_permission("s", "anything.at.all").allowed);
    }

    #[test]
    fn test_permission_without_auth_allows_everything() {
        let (m, _) = manager(AccessConfig::new());
        assert!(m.check_permission("nobody", "sandbox.execute").allowed);
    }

    #[test]
    fn test_grant_unknown_role_fails() {
        let (m, _) = manager(AccessConfig::new());
        m.check_rate_limit("s", "o");
        assert_eq!(
            m.grant_role("s", "root"),
            Err(AccessError::UnknownRole("root".to_string()))
        );
        assert!(matches!(
            m.grant_role("ghost", "admin"),
            Err(AccessError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_sweep_removes_only_idle_sessions() {
        let (m, clock) = manager(AccessConfig::new().with_session_timeout_minutes(1));
        m.check_rate_limit("old", "o");
        m.block_session("held");
        clock.advance_secs(45);
        m.check_rate_limit("new", "o");
        clock.advance_secs(30);

        assert_eq!(m.sweep_expired(), 1);
        assert!(m.session("old").is_none());
        assert!(m.session("new").is_some());
        assert!(m.session("held").is_some());
    }

    #[test]
    fn test_denials_are_logged() {
        let (m, _) = manager(AccessConfig::new().block_origin("6.6.6.6"));
        m.check_rate_limit("s", "6.6.6.6");
        let log = m.audit().log().snapshot();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, ViolationKind::OriginBlocked);
        assert_eq!(log[0].metadata["origin"], "6.6.6.6");
    }
}
