//! Session and rate-window records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Fixed hourly counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    /// Requests counted since `start_ms`.
    pub count: u64,
    /// Window start in ms since the epoch.
    pub start_ms: u64,
}

impl RateWindow {
    /// Opens an empty window at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            count: 0,
            start_ms: now_ms,
        }
    }

    /// Returns true once more than `window_ms` has passed since the start.
    pub fn is_stale(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.start_ms) > window_ms
    }

    /// Resets the window if it is stale.
    pub fn roll(&mut self, now_ms: u64, window_ms: u64) {
        if self.is_stale(now_ms, window_ms) {
            *self = Self::new(now_ms);
        }
    }

    /// When the current window resets.
    pub fn reset_at(&self, window_ms: u64) -> u64 {
        self.start_ms.saturating_add(window_ms)
    }
}

/// One caller's interaction window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub origin: String,
    pub created_at_ms: u64,
    pub last_request_ms: u64,
    pub roles: BTreeSet<String>,
    pub blocked: bool,
    pub window: RateWindow,
}

impl Session {
    /// Creates an active session holding `default_role`.
    pub fn new(id: &str, origin: &str, default_role: &str, now_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            origin: origin.to_string(),
            created_at_ms: now_ms,
            last_request_ms: now_ms,
            roles: BTreeSet::from([default_role.to_string()]),
            blocked: false,
            window: RateWindow::new(now_ms),
        }
    }

    /// Milliseconds since the last request.
    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_request_ms)
    }

    /// Returns true if the session idled past `timeout_ms`.
    ///
    /// Blocked sessions never expire; only an unblock returns them to
    /// the active state where the idle clock applies.
    pub fn is_expired(&self, now_ms: u64, timeout_ms: u64) -> bool {
        !self.blocked && self.idle_ms(now_ms) > timeout_ms
    }

    /// Records activity without counting a request.
    pub fn touch(&mut self, origin: &str, now_ms: u64) {
        self.last_request_ms = now_ms;
        if self.origin != origin {
            self.origin = origin.to_string();
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            origin: self.origin.clone(),
            created_at_ms: self.created_at_ms,
            last_request_ms: self.last_request_ms,
            request_count: self.window.count,
            roles: self.roles.iter().cloned().collect(),
            blocked: self.blocked,
        }
    }
}

/// Read-only copy of a session for callers outside the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub origin: String,
    pub created_at_ms: u64,
    pub last_request_ms: u64,
    pub request_count: u64,
    pub roles: Vec<String>,
    pub blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_rolls_only_after_full_window() {
        let mut w = RateWindow::new(1_000);
        w.count = 5;
        w.roll(1_000 + 3_600_000, 3_600_000);
        assert_eq!(w.count, 5);
        w.roll(1_000 + 3_600_001, 3_600_000);
        assert_eq!(w.count, 0);
        assert_eq!(w.start_ms, 3_601_001);
    }

    #[test]
    fn test_blocked_session_never_expires() {
        let mut s = Session::new("s", "o", "user", 0);
        assert!(s.is_expired(10_001, 10_000));
        s.blocked = true;
        assert!(!s.is_expired(10_001, 10_000));
    }
}
