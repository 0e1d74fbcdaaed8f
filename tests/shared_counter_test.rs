//! Integration tests for SharedCounter
//!
//! Concurrent writers with randomized pacing must never lose an update, and
//! readers running alongside must only ever observe values a writer produced.

use prometheus_work_distributor::core::{CancelReason, CancellationScope, SharedCounter};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WRITERS: usize = 8;
const INCREMENTS: usize = 200;

fn run_round() -> i64 {
    let counter = Arc::new(SharedCounter::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut last = 0;
                while !stop.load(Ordering::Acquire) {
                    let value = counter.read();
                    assert!(value >= last, "counter went backwards: {last} -> {value}");
                    last = value;
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let mut rng = rand::rng();
                for _ in 0..INCREMENTS {
                    if rng.random_bool(0.1) {
                        thread::sleep(Duration::from_micros(rng.random_range(0..200)));
                    }
                    counter.increment(1);
                }
            })
        })
        .collect();

    for handle in writers {
        handle.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    for handle in readers {
        handle.join().unwrap();
    }
    counter.read()
}

#[test]
fn test_no_lost_updates_repeated_rounds() {
    for round in 0..10 {
        assert_eq!(
            run_round(),
            i64::try_from(WRITERS * INCREMENTS).unwrap(),
            "round {round} lost updates"
        );
    }
}

#[test]
fn test_increment_returns_new_value() {
    let counter = SharedCounter::new(10);
    assert_eq!(counter.increment(5), 15);
    assert_eq!(counter.increment(-20), -5);
    assert_eq!(counter.read(), -5);
    assert_eq!(counter.try_read(), Some(-5));
}

#[test]
fn test_scoped_access_refused_after_cancel() {
    let counter = SharedCounter::new(1);
    let scope = CancellationScope::new();
    assert_eq!(counter.increment_within(&scope, 1), Ok(2));
    scope.cancel();
    assert_eq!(counter.increment_within(&scope, 1), Err(CancelReason::Cancelled));
    assert_eq!(counter.read_within(&scope), Err(CancelReason::Cancelled));
    assert_eq!(counter.read(), 2);
}
