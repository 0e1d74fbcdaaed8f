//! Reader/writer-locked shared counter.
//!
//! Built on `parking_lot::RwLock`, which is task-fair: once a writer is parked,
//! new readers queue behind it, so a continuous stream of readers cannot starve
//! writers. That fairness comes from the lock, not from this type.
//!
//! # Examples
//!
//! ```
//! use prometheus_work_distributor::core::SharedCounter;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let counter = Arc::new(SharedCounter::new(0));
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let counter = Arc::clone(&counter);
//!         thread::spawn(move || {
//!             for _ in 0..100 {
//!                 counter.increment(1);
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(counter.read(), 400);
//! ```

use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::error::CancelReason;
use super::scope::CancellationScope;

/// Longest a scoped lock wait goes without rechecking its scope.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// An integer guarded by a reader/writer lock.
///
/// The value can only be observed through [`read`](Self::read) and changed
/// through [`increment`](Self::increment); there is no guard handed out, so
/// callers cannot build their own read-modify-write sequences.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: RwLock<i64>,
}

impl SharedCounter {
    /// Create a counter holding `initial`.
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            value: RwLock::new(initial),
        }
    }

    /// Read the value under a shared lock.
    #[must_use]
    pub fn read(&self) -> i64 {
        *self.value.read()
    }

    /// Read the value if no writer currently holds the lock.
    #[must_use]
    pub fn try_read(&self) -> Option<i64> {
        self.value.try_read().map(|guard| *guard)
    }

    /// Add `delta` under the exclusive lock and return the new value.
    ///
    /// Saturates at `i64::MIN` and `i64::MAX` instead of overflowing.
    pub fn increment(&self, delta: i64) -> i64 {
        let mut value = self.value.write();
        *value = value.saturating_add(delta);
        *value
    }

    /// Read under `scope`: fails fast if the scope is done, and gives up a
    /// contended lock once the scope is cancelled or reaches its deadline.
    ///
    /// Lock waits recheck the scope every few milliseconds, so an explicit
    /// cancel is noticed within that interval rather than instantly.
    ///
    /// # Errors
    ///
    /// The scope's [`CancelReason`] if it is done before the lock is acquired.
    pub fn read_within(&self, scope: &CancellationScope) -> Result<i64, CancelReason> {
        acquire_within(scope, |until| self.value.try_read_until(until)).map(|value| *value)
    }

    /// Increment under `scope`, with the same cancellation rules as
    /// [`read_within`](Self::read_within).
    ///
    /// # Errors
    ///
    /// The scope's [`CancelReason`] if it is done before the lock is acquired;
    /// the value is unchanged in that case.
    pub fn increment_within(
        &self,
        scope: &CancellationScope,
        delta: i64,
    ) -> Result<i64, CancelReason> {
        let mut value = acquire_within(scope, |until| self.value.try_write_until(until))?;
        *value = value.saturating_add(delta);
        Ok(*value)
    }
}

fn acquire_within<G>(
    scope: &CancellationScope,
    try_until: impl Fn(Instant) -> Option<G>,
) -> Result<G, CancelReason> {
    loop {
        if let Some(reason) = scope.err() {
            return Err(reason);
        }
        let poll = Instant::now() + CANCEL_POLL;
        let until = scope.deadline().map_or(poll, |at| at.min(poll));
        if let Some(guard) = try_until(until) {
            return Ok(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_read_and_increment() {
        let counter = SharedCounter::new(5);
        assert_eq!(counter.read(), 5);
        assert_eq!(counter.increment(3), 8);
        assert_eq!(counter.increment(-10), -2);
        assert_eq!(counter.try_read(), Some(-2));
    }

    #[test]
    fn test_concurrent_readers() {
        let counter = Arc::new(SharedCounter::new(100));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || counter.read())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 100);
        }
    }

    #[test]
    fn test_within_done_scope_fails_fast() {
        let counter = SharedCounter::new(0);
        let scope = CancellationScope::new();
        scope.cancel();
        assert_eq!(counter.increment_within(&scope, 1), Err(CancelReason::Cancelled));
        assert_eq!(counter.read_within(&scope), Err(CancelReason::Cancelled));
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_within_live_scope() {
        let counter = SharedCounter::new(0);
        let scope = CancellationScope::with_timeout(Duration::from_secs(5));
        assert_eq!(counter.increment_within(&scope, 2), Ok(2));
        assert_eq!(counter.read_within(&scope), Ok(2));
    }

    #[test]
    fn test_increment_saturates() {
        let counter = SharedCounter::new(i64::MAX - 1);
        assert_eq!(counter.increment(5), i64::MAX);
        assert_eq!(counter.increment(1), i64::MAX);

        let counter = SharedCounter::new(i64::MIN);
        assert_eq!(counter.increment(-1), i64::MIN);
        let scope = CancellationScope::new();
        assert_eq!(counter.increment_within(&scope, -1), Ok(i64::MIN));
    }

    #[test]
    fn test_cancel_interrupts_contended_lock_wait() {
        let counter = Arc::new(SharedCounter::new(0));
        let scope = CancellationScope::new();
        let held = counter.value.write();

        let reader = {
            let counter = Arc::clone(&counter);
            let scope = scope.clone();
            thread::spawn(move || counter.read_within(&scope))
        };
        let writer = {
            let counter = Arc::clone(&counter);
            let scope = scope.derive();
            thread::spawn(move || counter.increment_within(&scope, 1))
        };
        thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        scope.cancel();
        assert_eq!(reader.join().unwrap(), Err(CancelReason::Cancelled));
        assert_eq!(writer.join().unwrap(), Err(CancelReason::ParentCancelled));
        assert!(start.elapsed() < Duration::from_millis(500));

        drop(held);
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_deadline_bounds_contended_lock_wait() {
        let counter = SharedCounter::new(0);
        let _held = counter.value.write();
        let scope = CancellationScope::with_timeout(Duration::from_millis(40));

        let start = Instant::now();
        assert_eq!(counter.read_within(&scope), Err(CancelReason::DeadlineExceeded));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
