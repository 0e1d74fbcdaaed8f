//! Tests for configuration validation

use prometheus_work_distributor::config::{BackpressurePolicy, DistributorConfig};
use std::time::Duration;

#[test]
fn test_default_config_is_valid() {
    let cfg = DistributorConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.worker_count >= 1);
    assert_eq!(cfg.policy, BackpressurePolicy::Block);
    assert_eq!(cfg.deadline(), None);
}

#[test]
fn test_config_invalid_capacity() {
    let invalid = DistributorConfig::new().with_capacity(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_worker_count() {
    let invalid = DistributorConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_timeout_policy() {
    let invalid =
        DistributorConfig::new().with_policy(BackpressurePolicy::Timeout { timeout_ms: 0 });
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_stack_size() {
    let invalid = DistributorConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "capacity": 10,
        "worker_count": 3,
        "policy": { "kind": "timeout", "timeout_ms": 250 },
        "deadline_ms": 500
    }"#;
    let cfg = DistributorConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.capacity, 10);
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.policy.timeout(), Some(Duration::from_millis(250)));
    assert_eq!(cfg.deadline(), Some(Duration::from_millis(500)));
}

#[test]
fn test_config_from_json_defaults_policy() {
    let cfg = DistributorConfig::from_json_str(r#"{ "capacity": 2, "worker_count": 1 }"#).unwrap();
    assert_eq!(cfg.policy, BackpressurePolicy::Block);
    assert_eq!(cfg.deadline_ms, None);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(DistributorConfig::from_json_str(r#"{ "capacity": 0, "worker_count": 1 }"#).is_err());
    assert!(DistributorConfig::from_json_str("not json").is_err());
}
