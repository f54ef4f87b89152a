//! Tests for utility functions

use prometheus_fleet::util::{init_tracing, now_epoch_secs, now_ms};

#[test]
fn test_clock_units_agree() {
    let secs = now_epoch_secs();
    let ms = now_ms();
    assert!(secs > 1_600_000_000);
    let ms_as_secs = u64::try_from(ms / 1000).unwrap();
    assert!(ms_as_secs >= secs && ms_as_secs - secs <= 1);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(target: "prometheus_fleet", "tracing initialized");
}
