//! Counting completion barrier.
//!
//! Participants [`register`](CompletionBarrier::register) before they start and
//! [`deregister`](CompletionBarrier::deregister) when they finish; waiters block
//! until the count returns to zero. A [`Participant`] guard deregisters on drop,
//! so a participant that unwinds still releases the barrier.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use super::error::{BarrierMisuse, CancelReason};
use super::scope::CancellationScope;

struct BarrierInner {
    count: Mutex<usize>,
    zero: Condvar,
}

/// A join primitive counting outstanding participants down to zero.
///
/// Cloning yields another handle to the same barrier.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<BarrierInner>,
}

impl CompletionBarrier {
    /// Create a barrier with no participants.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                count: Mutex::new(0),
                zero: Condvar::new(),
            }),
        }
    }

    /// Add one participant and return the new count.
    pub fn register(&self) -> usize {
        let mut count = self.inner.count.lock();
        *count += 1;
        *count
    }

    /// Register and return a guard that deregisters when dropped.
    #[must_use]
    pub fn participant(&self) -> Participant {
        self.register();
        Participant {
            barrier: self.clone(),
        }
    }

    /// Remove one participant, waking waiters when the count reaches zero.
    ///
    /// # Errors
    ///
    /// [`BarrierMisuse`] if there is no participant to remove; the count stays at
    /// zero. This is a programming error in the caller.
    pub fn deregister(&self) -> Result<usize, BarrierMisuse> {
        let mut count = self.inner.count.lock();
        if *count == 0 {
            drop(count);
            error!("CompletionBarrier::deregister called more times than register");
            return Err(BarrierMisuse);
        }
        *count -= 1;
        if *count == 0 {
            self.inner.zero.notify_all();
        }
        Ok(*count)
    }

    /// Current number of outstanding participants.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.inner.count.lock()
    }

    /// Block until the count is zero.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count > 0 {
            self.inner.zero.wait(&mut count);
        }
    }

    /// Block until the count is zero or `timeout` elapses. Returns true if the
    /// count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let until = Instant::now() + timeout;
        let mut count = self.inner.count.lock();
        while *count > 0 {
            if self.inner.zero.wait_until(&mut count, until).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    /// Block until the count is zero or `scope` is done, whichever comes first.
    ///
    /// # Errors
    ///
    /// The scope's [`CancelReason`] if it finished first.
    pub fn wait_within(&self, scope: &CancellationScope) -> Result<(), CancelReason> {
        let barrier: Weak<BarrierInner> = Arc::downgrade(&self.inner);
        let _subscription = scope.subscribe(Arc::new(move || {
            if let Some(barrier) = barrier.upgrade() {
                let _count = barrier.count.lock();
                barrier.zero.notify_all();
            }
        }));
        let wake_at = scope.deadline();

        let mut count = self.inner.count.lock();
        loop {
            if *count == 0 {
                return Ok(());
            }
            if let Some(reason) = scope.err() {
                return Err(reason);
            }
            match wake_at {
                Some(at) => {
                    let _ = self.inner.zero.wait_until(&mut count, at);
                }
                None => self.inner.zero.wait(&mut count),
            }
        }
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("count", &self.count())
            .finish()
    }
}

/// A registered participant; deregisters from its barrier when dropped.
#[must_use = "dropping the participant deregisters it immediately"]
#[derive(Debug)]
pub struct Participant {
    barrier: CompletionBarrier,
}

impl Drop for Participant {
    fn drop(&mut self) {
        // A guard is created by exactly one register, so this cannot underflow.
        let _ = self.barrier.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_empty() {
        let barrier = CompletionBarrier::new();
        barrier.wait();
        assert!(barrier.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_register_deregister_counts() {
        let barrier = CompletionBarrier::new();
        assert_eq!(barrier.register(), 1);
        assert_eq!(barrier.register(), 2);
        assert_eq!(barrier.deregister(), Ok(1));
        assert_eq!(barrier.deregister(), Ok(0));
    }

    #[test]
    fn test_deregister_below_zero_is_detected() {
        let barrier = CompletionBarrier::new();
        barrier.register();
        barrier.deregister().unwrap();
        assert_eq!(barrier.deregister(), Err(BarrierMisuse));
        assert_eq!(barrier.count(), 0);
    }

    #[test]
    fn test_participant_guard_releases_on_drop() {
        let barrier = CompletionBarrier::new();
        let guard = barrier.participant();
        assert_eq!(barrier.count(), 1);
        assert!(!barrier.wait_timeout(Duration::from_millis(5)));
        drop(guard);
        assert_eq!(barrier.count(), 0);
    }

    #[test]
    fn test_wait_blocks_until_all_participants_finish() {
        let barrier = CompletionBarrier::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let participant = barrier.participant();
                thread::spawn(move || {
                    let _participant = participant;
                    thread::sleep(Duration::from_millis(5 * i));
                })
            })
            .collect();
        barrier.wait();
        assert_eq!(barrier.count(), 0);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_participant_released_when_thread_panics() {
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
    fn test_wait_within_cancelled_scope() {
        let barrier = CompletionBarrier::new();
        let _guard = barrier.participant();
        let scope = CancellationScope::new();
        let waiter = {
            let barrier = barrier.clone();
            let scope = scope.clone();
            thread::spawn(move || barrier.wait_within(&scope))
        };
        thread::sleep(Duration::from_millis(10));
        scope.cancel();
        assert_eq!(waiter.join().unwrap(), Err(CancelReason::Cancelled));
    }

    #[test]
    fn test_wait_within_deadline() {
        let barrier = CompletionBarrier::new();
        let _guard = barrier.participant();
        let scope = CancellationScope::with_timeout(Duration::from_millis(20));
        assert_eq!(
            barrier.wait_within(&scope),
            Err(CancelReason::DeadlineExceeded)
        );
    }
}
