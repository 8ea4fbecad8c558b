//! # Bastion Audit
//!
//! Shared audit plumbing for the Bastion security layers: the immutable
//! [`Violation`] record, the bounded [`ViolationLog`], the typed
//! [`SecurityEvent`] stream and the [`Clock`] seam used by every
//! time-windowed check.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   record()   ┌───────────────┐   emit()   ┌────────────┐
//! │  Detector /  │ ───────────▶ │ ViolationLog  │ ─────────▶ │  EventBus  │──▶ subscribers
//! │  Access /    │              │ (ring, 1000)  │            │ (broadcast)│
//! │  Sandbox     │ ─────────────────────────────────────────▶│            │
//! └──────────────┘                 emit()                    └────────────┘
//! ```
//!
//! ## Security Notes
//!
//! - The log is bounded: it never holds more than [`VIOLATION_LOG_CAP`] entries
//! - Emitting an event never blocks; slow subscribers lose the oldest events
//! - Violations are append-only and never mutated after recording

mod clock;
mod events;
mod log;
mod violation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventBus, SecurityEvent, DEFAULT_EVENT_CAPACITY};
pub use log::{ViolationLog, VIOLATION_LOG_CAP, VIOLATION_LOG_TRIM};
pub use violation::{Severity, Violation, ViolationKind};

use std::sync::Arc;

/// Audit sinks handed to each subsystem.
///
/// Cloning is cheap; all clones share the same log, bus and clock.
#[derive(Clone)]
pub struct Audit {
    log: Arc<ViolationLog>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl Audit {
    /// Creates an audit bundle on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an audit bundle on a caller-supplied clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let bus = EventBus::new(DEFAULT_EVENT_CAPACITY);
        Self {
            log: Arc::new(ViolationLog::new(bus.clone())),
            bus,
            clock,
        }
    }

    /// Returns the shared violation log.
    pub fn log(&self) -> &ViolationLog {
        &self.log
    }

    /// Returns the event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time in milliseconds since the Unix epoch.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Emits an event on the bus.
    pub fn emit(&self, event: SecurityEvent) {
        self.bus.emit(event);
    }

    /// Builds a violation stamped with the current time and records it.
    pub fn violation(
        &self,
        kind: ViolationKind,
        severity: Severity,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Violation {
        let violation = Violation::new(kind, severity, message, source, self.now_ms());
        self.log.record(violation.clone());
        violation
    }
}

impl Default for Audit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Audit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Audit")
            .field("violations", &self.log.len())
            .field("subscribers", &self.bus.subscriber_count())
            .finish()
    }
}
