//! # Bounded Violation Log
//!
//! Append-only ring of [`Violation`] records. When the log reaches
//! [`VIOLATION_LOG_CAP`] entries the oldest records are evicted in one
//! batch until [`VIOLATION_LOG_TRIM`] remain, trading old audit history for
//! guaranteed bounded memory.
//!
//! ## Security Notes
//!
//! - Eviction is irreversible; export through the event bus if history matters
//! - Recording and trimming happen under one lock, readers never see a
//!   log above the cap

use crate::events::{EventBus, SecurityEvent};
use crate::violation::{Severity, Violation, ViolationKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// Maximum number of retained violations.
pub const VIOLATION_LOG_CAP: usize = 1000;

/// Number of violations kept after an overflow trim.
pub const VIOLATION_LOG_TRIM: usize = 500;

/// Thread-safe bounded violation log.
#[derive(Debug)]
pub struct ViolationLog {
    entries: Mutex<VecDeque<Violation>>,
    bus: EventBus,
}

impl ViolationLog {
    /// Creates an empty log publishing on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(VIOLATION_LOG_CAP)),
            bus,
        }
    }

    /// Appends a violation, trimming the oldest entries on overflow.
    ///
    /// Emits `ViolationLogged`, and `CriticalViolation` for critical
    /// severity, after the lock is released.
    pub fn record(&self, violation: Violation) {
        {
            let mut entries = self.entries.lock();
            entries.push_back(violation.clone());
            if entries.len() > VIOLATION_LOG_CAP {
                let excess = entries.len() - VIOLATION_LOG_TRIM;
                entries.drain(..excess);
            }
        }

        if violation.severity == Severity::Critical {
            self.bus.emit(SecurityEvent::CriticalViolation {
                violation: violation.clone(),
            });
        }
        self.bus.emit(SecurityEvent::ViolationLogged { violation });
    }

    /// Returns the `n` most recent violations, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Violation> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Returns a copy of every retained violation, oldest first.
    pub fn snapshot(&self) -> Vec<Violation> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Counts retained violations per kind.
    pub fn count_by_kind(&self) -> BTreeMap<ViolationKind, usize> {
        let mut counts = BTreeMap::new();
        for v in self.entries.lock().iter() {
            *counts.entry(v.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Number of retained violations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no violation is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every retained violation.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
