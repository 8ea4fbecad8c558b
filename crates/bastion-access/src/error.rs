//! Error types for access control.

use thiserror::Error;

/// Result type alias for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Reasons a caller is refused, plus administrative misuse.
///
/// # Security Notes
///
/// Messages name the session or origin that was refused but never the
/// quota state of other callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Origin is on the blocklist.
    #[error("origin {origin} is blocked")]
    OriginBlocked {
        /// Refused origin
        origin: String,
    },

    /// Session exhausted its hourly quota.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Requests counted in the current window
        count: u64,
        /// Hourly ceiling
        limit: u64,
        /// When the window resets, in ms since the epoch
        reset_at_ms: u64,
    },

    /// Origin exhausted its hourly quota.
    #[error("origin rate limit exceeded")]
    OriginRateLimited {
        /// Refused origin
        origin: String,
        /// Origin ceiling
        limit: u64,
    },

    /// Session administratively blocked.
    #[error("session {session_id} is blocked")]
    SessionBlocked {
        /// Refused session
        session_id: String,
    },

    /// Session idled past its timeout.
    #[error("session {session_id} expired after {idle_ms}ms idle")]
    SessionExpired {
        /// Expired session
        session_id: String,
        /// Idle time at the moment of the check
        idle_ms: u64,
    },

    /// No role of the session grants the capability.
    #[error("session {session_id} lacks permission for {capability}")]
    PermissionDenied {
        /// Refused session
        session_id: String,
        /// Requested capability
        capability: String,
    },

    /// Role is not defined in the role table.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Session does not exist.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Configuration is malformed.
    #[error("invalid access configuration: {0}")]
    Config(String),
}
