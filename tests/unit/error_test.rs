//! Tests for error types

use prometheus_work_distributor::core::{
    BarrierMisuse, CancelReason, DistributorError, PoolError, ProcessingError, QueueError,
};

#[test]
fn test_queue_error_display() {
    assert_eq!(QueueError::Full.to_string(), "queue full");
    assert_eq!(QueueError::Drained.to_string(), "queue closed and drained");
    assert!(QueueError::Cancelled(CancelReason::DeadlineExceeded)
        .to_string()
        .starts_with("wait cancelled"));
}

#[test]
fn test_queue_error_terminal() {
    assert!(!QueueError::Full.is_terminal());
    assert!(!QueueError::TimedOut.is_terminal());
    assert!(QueueError::Closed.is_terminal());
    assert!(QueueError::Drained.is_terminal());
    assert!(QueueError::Cancelled(CancelReason::Cancelled).is_terminal());
}

#[test]
fn test_cancel_reason_converts_to_queue_error() {
    let err: QueueError = CancelReason::ParentCancelled.into();
    assert_eq!(err, QueueError::Cancelled(CancelReason::ParentCancelled));
}

#[test]
fn test_distributor_error_from_pool_error() {
    let err: DistributorError = PoolError::NoWorkers.into();
    assert!(matches!(err, DistributorError::Pool(PoolError::NoWorkers)));
}

#[test]
fn test_processing_error_serializes() {
    let json = serde_json::to_string(&ProcessingError::Failed("bad input".into())).unwrap();
    assert!(json.contains("bad input"));
}

#[test]
fn test_barrier_misuse_display() {
    assert!(!BarrierMisuse.to_string().is_empty());
}
