//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_fleet::config::{FleetConfig, SizingConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let cfg = FleetConfig::new("node-v6");
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.worker_size, "512mb");
    assert_eq!(cfg.builder_size(), "512mb");
    assert_eq!(cfg.sizing.max_pool_size(), 2);
    assert_eq!(cfg.poll_timeout(), Duration::from_secs(60));
    assert_eq!(cfg.shutdown_attempts, 4);
    assert_eq!(cfg.connect_policy().retries, 5);
    assert_eq!(cfg.connect_policy().base_delay, Duration::from_secs(1));
    assert_eq!(cfg.sizing_policy().desired_size(5, 0), 2);
    assert_eq!(cfg.sizing_policy().desired_size(0, 0), 0);
}

#[test]
fn test_invalid_empty_base_image() {
    assert!(FleetConfig::new("  ").validate().is_err());
}

#[test]
fn test_invalid_min_above_max() {
    let mut cfg = FleetConfig::new("node-v6");
    cfg.sizing = SizingConfig::Clamp {
        min_pool_size: 3,
        max_pool_size: 2,
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("min_pool_size"));
}

#[test]
fn test_invalid_zero_max() {
    let mut cfg = FleetConfig::new("node-v6");
    cfg.sizing = SizingConfig::Spare {
        min_spare_workers: 1,
        max_pool_size: 0,
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_invalid_zero_timeout() {
    let mut cfg = FleetConfig::new("node-v6");
    cfg.poll_timeout_secs = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_with_defaults() {
    let cfg = FleetConfig::from_json_str(r#"{"base_image": "node-v6"}"#).unwrap();
    assert_eq!(cfg, FleetConfig::new("node-v6"));
}

#[test]
fn test_from_json_spare_mode() {
    let json = r#"{
        "base_image": "node-v6",
        "worker_size": "1gb",
        "builder_size": "2gb",
        "sizing": {"mode": "spare", "min_spare_workers": 1, "max_pool_size": 8}
    }"#;
    let cfg = FleetConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.builder_size(), "2gb");
    assert_eq!(
        cfg.sizing,
        SizingConfig::Spare {
            min_spare_workers: 1,
            max_pool_size: 8
        }
    );
    assert_eq!(cfg.sizing_policy().desired_size(2, 1), 4);
}

#[test]
fn test_from_json_rejects_invalid() {
    let json = r#"{"base_image": "node-v6", "sizing": {"mode": "clamp", "min_pool_size": 5}}"#;
    assert!(FleetConfig::from_json_str(json).is_err());
    assert!(FleetConfig::from_json_str("not json").is_err());
}

#[test]
fn test_from_lookup() {
    let cfg = FleetConfig::from_lookup(lookup(&[
        ("FLEET_BASE_IMAGE", "node-v6"),
        ("FLEET_WORKER_SIZE", "1gb"),
        ("FLEET_DISTRIBUTION", "CentOS"),
        ("FLEET_MIN_POOL_SIZE", "1"),
        ("FLEET_MAX_POOL_SIZE", "4"),
        ("FLEET_POLL_TIMEOUT_SECS", "120"),
        ("FLEET_CONNECT_BASE_DELAY_MS", "250"),
    ]))
    .unwrap();
    assert_eq!(cfg.worker_size, "1gb");
    assert_eq!(cfg.distribution.as_deref(), Some("CentOS"));
    assert_eq!(
        cfg.sizing,
        SizingConfig::Clamp {
            min_pool_size: 1,
            max_pool_size: 4
        }
    );
    assert_eq!(cfg.poll_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.connect_policy().base_delay, Duration::from_millis(250));
}

#[test]
fn test_from_lookup_requires_base_image() {
    let err = FleetConfig::from_lookup(lookup(&[])).unwrap_err();
    assert!(err.to_string().contains("FLEET_BASE_IMAGE"));
}

#[test]
fn test_from_lookup_rejects_bad_number() {
    let err = FleetConfig::from_lookup(lookup(&[
        ("FLEET_BASE_IMAGE", "node-v6"),
        ("FLEET_MAX_POOL_SIZE", "many"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("FLEET_MAX_POOL_SIZE"));
}

#[test]
fn test_from_lookup_rejects_both_modes() {
    let result = FleetConfig::from_lookup(lookup(&[
        ("FLEET_BASE_IMAGE", "node-v6"),
        ("FLEET_MIN_POOL_SIZE", "1"),
        ("FLEET_MIN_SPARE_WORKERS", "1"),
    ]));
    assert!(result.is_err());
}
