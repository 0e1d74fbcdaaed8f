//! Integration tests for CompletionBarrier
//!
//! These tests validate:
//! - Waiting for many registered participants
//! - Participant guards released on unwinding threads
//! - Scope-bounded waits

use prometheus_work_distributor::core::{
    BarrierMisuse, CancelReason, CancellationScope, CompletionBarrier,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_wait_blocks_until_all_participants_finish() {
    let barrier = CompletionBarrier::new();
    let finished = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8_u64)
        .map(|i| {
            let participant = barrier.participant();
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let _participant = participant;
                thread::sleep(Duration::from_millis(5 * i));
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    barrier.wait();
    assert_eq!(finished.load(Ordering::SeqCst), 8);
    assert_eq!(barrier.count(), 0);
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_explicit_register_deregister_across_threads() {
    let barrier = CompletionBarrier::new();
    for _ in 0..4 {
        barrier.register();
    }
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                barrier.deregister().unwrap();
            })
        })
        .collect();
    assert!(barrier.wait_timeout(Duration::from_secs(5)));
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(barrier.deregister(), Err(BarrierMisuse));
}

#[test]
fn test_panicking_participant_still_releases() {
    let barrier = CompletionBarrier::new();
    let participant = barrier.participant();
    let handle = thread::spawn(move || {
        let _participant = participant;
        panic!("participant failed");
    });
    assert!(handle.join().is_err());
    assert!(barrier.wait_timeout(Duration::from_secs(1)));
}

#[test]
fn test_wait_timeout_expires_with_live_participant() {
    let barrier = CompletionBarrier::new();
    let _participant = barrier.participant();
    let start = Instant::now();
    assert!(!barrier.wait_timeout(Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_wait_within_stops_on_cancel() {
    let barrier = CompletionBarrier::new();
    let _participant = barrier.participant();
    let scope = CancellationScope::new();

    let canceller = {
        let scope = scope.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            scope.cancel();
        })
    };
    assert_eq!(barrier.wait_within(&scope), Err(CancelReason::Cancelled));
    canceller.join().unwrap();
}

#[test]
fn test_wait_within_stops_on_deadline() {
    let barrier = CompletionBarrier::new();
    let _participant = barrier.participant();
    let scope = CancellationScope::with_timeout(Duration::from_millis(30));
    assert_eq!(
        barrier.wait_within(&scope),
        Err(CancelReason::DeadlineExceeded)
    );
}
