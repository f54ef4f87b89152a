//! Tests for the shared rate-limit budget

use std::time::Duration;

use prometheus_fleet::core::{RateLimitSnapshot, RateLimitState, MIN_RESET_WAIT};
use prometheus_fleet::util::now_epoch_secs;

#[test]
fn test_default_budget() {
    let state = RateLimitState::default();
    let snapshot = state.snapshot();
    assert_eq!(snapshot.limit, 5000);
    assert_eq!(snapshot.remaining, 5000);
    assert_eq!(state.time_to_reset(), MIN_RESET_WAIT);
}

#[test]
fn test_guards_track_running_polls() {
    let state = RateLimitState::shared();
    let a = state.enter_poll();
    let b = state.enter_poll();
    assert_eq!(state.running_polls(), 2);
    drop(a);
    assert_eq!(state.running_polls(), 1);
    drop(b);
    assert_eq!(state.running_polls(), 0);
}

#[test]
fn test_contention_stretches_backoff() {
    let state = RateLimitState::shared();
    state.observe(RateLimitSnapshot {
        limit: 5000,
        remaining: 10,
        reset_epoch_secs: now_epoch_secs() + 100,
    });
    let timeout = Duration::from_secs(60);
    let _one = state.enter_poll();
    let alone = state.backoff_delay(timeout);
    let _two = state.enter_poll();
    let _three = state.enter_poll();
    let crowded = state.backoff_delay(timeout);
    assert!(crowded > alone);
    assert!(alone >= Duration::from_secs(1));
}

#[test]
fn test_far_future_reset_cannot_overflow_backoff() {
    let state = RateLimitState::shared();
    state.observe(RateLimitSnapshot {
        limit: 5000,
        remaining: 1,
        reset_epoch_secs: u64::MAX,
    });
    let _polls: Vec<_> = (0..8).map(|_| state.enter_poll()).collect();
    let delay = state.backoff_delay(Duration::from_secs(60));
    assert_eq!(delay, prometheus_fleet::core::MAX_BACKOFF);
}
