//! Tests for desired pool size policies

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus_fleet::core::{PoolBound, SizingPolicy};

#[test]
fn test_clamp_never_leaves_bounds() {
    for min in 0..4 {
        for max in min..6 {
            let policy = SizingPolicy::clamp(min, max);
            for queued in 0..10 {
                for in_progress in 0..10 {
                    let desired = policy.desired_size(queued, in_progress);
                    assert!(desired >= min && desired <= max, "{min}..{max}: {desired}");
                }
            }
        }
    }
}

#[test]
fn test_spare_never_exceeds_max() {
    for spare in 0..4 {
        for max in 0..6 {
            let policy = SizingPolicy::spare(spare, max);
            for queued in 0..10 {
                for in_progress in 0..10 {
                    let desired = policy.desired_size(queued, in_progress);
                    assert!(desired <= max);
                    assert_eq!(desired, (queued + in_progress + spare).min(max));
                }
            }
        }
    }
}

#[test]
fn test_dynamic_bounds_follow_source() {
    let min = Arc::new(AtomicUsize::new(0));
    let min_source = Arc::clone(&min);
    let policy = SizingPolicy::Clamp {
        min_pool_size: PoolBound::dynamic(move || min_source.load(Ordering::SeqCst)),
        max_pool_size: 5.into(),
    };
    assert_eq!(policy.desired_size(0, 0), 0);
    min.store(3, Ordering::SeqCst);
    assert_eq!(policy.desired_size(0, 0), 3);
    assert_eq!(format!("{:?}", PoolBound::dynamic(|| 1)), "Dynamic(..)");
}
