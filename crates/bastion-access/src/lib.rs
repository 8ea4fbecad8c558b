//! # Bastion Access - Access Control Manager
//!
//! Per-caller and per-origin quotas, coarse session/role bookkeeping and
//! origin allow/block lists.
//!
//! ## Threat Model
//!
//! | Threat | Defense |
//! |--------|---------|
//! | Request flooding from one session | Hourly session window |
//! | Session rotation from one address | Hourly origin window (2x session ceiling) |
//! | Known-bad address | Origin blocklist, checked first |
//! | Stale credentials | Idle timeout, background sweep |
//! | Capability misuse | Role to permission table, `*` wildcard |
//!
//! ## Security Notes
//!
//! - Every refusal is recorded as a [`Violation`](bastion_audit::Violation)
//! - Counters for one key are never observed half-updated
//! - Administrative calls are safe to interleave with live checks
//! - No state survives a restart

pub mod config;
pub mod error;
pub mod manager;
pub mod session;

pub use config::{AccessConfig, WILDCARD_PERMISSION, WINDOW_MS};
pub use error::{AccessError, Result};
pub use manager::{AccessManager, PermissionDecision, RateDecision};
pub use session::{RateWindow, Session, SessionSnapshot};
