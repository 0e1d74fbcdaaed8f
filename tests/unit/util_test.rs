//! Tests for utility functions

use prometheus_work_distributor::util::{deadline_after, earliest, has_passed, now_ms};
use std::time::{Duration, Instant};

#[test]
fn test_now_ms_is_recent() {
    // 2020-01-01T00:00:00Z
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_earliest_prefers_bounded() {
    let now = Instant::now();
    let later = now + Duration::from_secs(1);
    assert_eq!(earliest(Some(later), Some(now)), Some(now));
    assert_eq!(earliest(None, Some(later)), Some(later));
    assert_eq!(earliest(None, None), None);
}

#[test]
fn test_deadline_after() {
    assert_eq!(deadline_after(None), None);
    let at = deadline_after(Some(Duration::from_millis(5))).unwrap();
    assert!(!has_passed(Some(at + Duration::from_secs(60))));
    std::thread::sleep(Duration::from_millis(10));
    assert!(has_passed(Some(at)));
    assert!(!has_passed(None));
}
