//! # Integration Tests
//!
//! Quota, list and session behaviour under realistic call sequences.

use std::sync::Arc;
use std::time::Duration;

use bastion_access::{AccessConfig, AccessManager};
use bastion_audit::{Audit, ManualClock, SecurityEvent};

fn manager_with_clock(config: AccessConfig) -> (Arc<AccessManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let audit = Audit::with_clock(clock.clone());
    (Arc::new(AccessManager::with_audit(config, audit).unwrap()), clock)
}

// ============================================================================
// Rate windows
// ============================================================================

#[test]
fn test_ceiling_then_reset_after_an_hour() {
    let n = 5;
    let config = AccessConfig::new()
        .with_requests_per_hour(n)
        .with_session_timeout_minutes(120);
    let (m, clock) = manager_with_clock(config);

    for i in 1..=n {
        assert!(m.check_rate_limit("s", "10.0.0.1").allowed, "request {}", i);
    }
    let denied = m.check_rate_limit("s", "10.0.0.1");
    assert!(!denied.allowed);
    assert_eq!(denied.reason.as_deref(), Some("rate limit exceeded"));

    clock.advance_ms(60 * 60 * 1000 + 1);
    assert!(m.check_rate_limit("s", "10.0.0.1").allowed);
}

#[test]
fn test_reset_timestamp_is_window_end() {
    let (m, clock) = manager_with_clock(AccessConfig::new());
    let start = clock_now(&clock);
    let d = m.check_rate_limit("s", "o");
    assert_eq!(d.reset_at_ms, start + 60 * 60 * 1000);
}

fn clock_now(clock: &ManualClock) -> u64 {
    use bastion_audit::Clock;
    clock.now_ms()
}

// ============================================================================
// Origin lists
// ============================================================================

#[test]
fn test_blocklisted_origin_always_denied() {
    let (m, _) = manager_with_clock(AccessConfig::new().block_origin("203.0.113.9"));
    m.check_rate_limit("s", "10.0.0.1");
    m.grant_role("s", "admin").unwrap();

    for _ in 0..3 {
        let d = m.check_rate_limit("s", "203.0.113.9");
        assert!(!d.allowed);
        assert_eq!(d.reason.as_deref(), Some("origin 203.0.113.9 is blocked"));
    }
}

#[test]
fn test_allowlisted_origin_skips_quota() {
    let config = AccessConfig::new()
        .with_requests_per_hour(2)
        .allow_origin("127.0.0.1");
    let (m, _) = manager_with_clock(config);

    for _ in 0..50 {
        let d = m.check_rate_limit("s", "127.0.0.1");
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
    }
    assert_eq!(m.session("s").unwrap().request_count, 0);
    assert!(m.check_rate_limit("s", "10.0.0.1").allowed);
}

#[test]
fn test_runtime_block_and_unblock() {
    let (m, _) = manager_with_clock(AccessConfig::new());
    let mut events = m.audit().bus().subscribe();

    assert!(m.block_origin("198.51.100.7"));
    assert!(!m.block_origin("198.51.100.7"));
    assert!(m.is_origin_blocked("198.51.100.7"));
    assert!(!m.check_rate_limit("s", "198.51.100.7").allowed);

    assert!(m.unblock_origin("198.51.100.7"));
    assert!(m.check_rate_limit("s", "198.51.100.7").allowed);

    assert!(matches!(events.try_recv().unwrap(), SecurityEvent::OriginBlocked { .. }));
}

// ============================================================================
// Sessions and permissions
// ============================================================================

#[test]
fn test_idle_session_is_absent_for_permission_checks() {
    let config = AccessConfig::new()
        .with_require_auth(true)
        .with_session_timeout_minutes(10);
    let (m, clock) = manager_with_clock(config);

    m.check_rate_limit("s", "o");
    assert!(m.check_permission("s", "resources.read").allowed);

    clock.advance_secs(10 * 60 + 1);
    let d = m.check_permission("s", "resources.read");
    assert!(!d.allowed);
    assert!(d.reason.unwrap().contains("session expired"));
}

#[test]
fn test_permission_denial_is_audited() {
    let (m, _) = manager_with_clock(AccessConfig::new().with_require_auth(true));
    let mut events = m.audit().bus().subscribe();
    m.check_rate_limit("s", "o");

    assert!(!m.check_permission("s", "sandbox.execute").allowed);
    assert_eq!(m.audit().log().len(), 1);

    let mut saw_denied = false;
    while let Ok(event) = events.try_recv() {
        saw_denied |= matches!(event, SecurityEvent::PermissionDenied { .. });
    }
    assert!(saw_denied);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_checks_never_exceed_ceiling() {
    let n = 100;
    let (m, _) = manager_with_clock(AccessConfig::new().with_requests_per_hour(n));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                (0..50)
                    .filter(|_| m.check_rate_limit("shared", "o").allowed)
                    .count()
            })
        })
        .collect();
    let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(allowed as u64, n);
    assert_eq!(m.session("shared").unwrap().request_count, n);
}

#[test]
fn test_admin_calls_interleave_with_checks() {
    let (m, _) = manager_with_clock(AccessConfig::new());
    let checker = {
        let m = Arc::clone(&m);
        std::thread::spawn(move || {
            for i in 0..500 {
                m.check_rate_limit(&format!("s{}", i % 10), "o");
            }
        })
    };
    for i in 0..500 {
        let id = format!("s{}", i % 10);
        m.block_session(&id);
        m.unblock_session(&id);
    }
    checker.join().unwrap();
    assert_eq!(m.session_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_removes_idle_sessions() {
    let (m, clock) = manager_with_clock(AccessConfig::new().with_session_timeout_minutes(1));
    m.check_rate_limit("s", "o");
    let sweeper = m.spawn_sweeper(Duration::from_secs(60));

    clock.advance_secs(120);
    tokio::time::sleep(Duration::from_secs(61)).await;
    tokio::task::yield_now().await;

    assert_eq!(m.session_count(), 0);
    sweeper.abort();
}
