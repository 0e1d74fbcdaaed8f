//! Fixed-capacity FIFO queue with blocking, non-blocking and timeout-bounded sends.
//!
//! The queue is the single point where backpressure is applied. Every blocking
//! operation can be bound to a [`CancellationScope`]; a waiter then wakes on the
//! first of its primary condition, its own timeout, the queue closing, or the
//! scope becoming done.
//!
//! # Design
//!
//! - **No polling**: waiters park on a `Condvar`; cancellation wakes them through a
//!   scope listener, deadlines through `wait_until`
//! - **Close drains**: after [`close`](BoundedQueue::close) sends fail, receives
//!   keep returning buffered items and then [`QueueError::Drained`]
//! - **Items come back**: a refused enqueue returns the item in [`Rejected`]

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use super::error::{QueueError, Rejected};
use super::scope::{CancellationScope, Subscription};
use crate::util::clock::{deadline_after, earliest, has_passed};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct QueueInner<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> QueueInner<T> {
    fn wake_all(&self) {
        // Taking the lock orders this wake after any waiter's condition check.
        let _state = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// A bounded multi-producer multi-consumer FIFO queue.
///
/// Cloning yields another handle to the same queue.
pub struct BoundedQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create an open, empty queue holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            inner: Arc::new(QueueInner {
                capacity,
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity.min(1024)),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    /// Maximum number of buffered items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Current number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// True when no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().items.is_empty()
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// `Full` if the queue is at capacity, `Closed` if it has been closed.
    pub fn try_enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Rejected::new(item, QueueError::Closed));
        }
        if state.items.len() >= self.inner.capacity {
            return Err(Rejected::new(item, QueueError::Full));
        }
        self.push(&mut state, item);
        Ok(())
    }

    /// Remove the front item without waiting.
    ///
    /// Returns `Ok(None)` if the queue is open but empty.
    ///
    /// # Errors
    ///
    /// `Drained` once the queue is closed and empty.
    pub fn try_dequeue(&self) -> Result<Option<T>, QueueError> {
        let mut state = self.inner.state.lock();
        match self.pop(&mut state) {
            Some(item) => Ok(Some(item)),
            None if state.closed => Err(QueueError::Drained),
            None => Ok(None),
        }
    }

    /// Close the queue. Pending and future sends fail with `Closed`; receivers
    /// drain what is buffered and then observe `Drained`.
    ///
    /// Returns true if this call closed the queue, false if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let remaining = state.items.len();
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        drop(state);
        debug!(remaining, "Queue closed");
        true
    }

    /// Remove and return every buffered item.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.inner.state.lock();
        let items: Vec<T> = state.items.drain(..).collect();
        if !items.is_empty() {
            self.inner.not_full.notify_all();
        }
        items
    }

    fn push(&self, state: &mut MutexGuard<'_, QueueState<T>>, item: T) {
        state.items.push_back(item);
        assert!(
            state.items.len() <= self.inner.capacity,
            "bounded queue invariant violated: length {} exceeds capacity {}",
            state.items.len(),
            self.inner.capacity
        );
        self.inner.not_empty.notify_one();
    }

    fn pop(&self, state: &mut MutexGuard<'_, QueueState<T>>) -> Option<T> {
        let item = state.items.pop_front()?;
        self.inner.not_full.notify_one();
        Some(item)
    }
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Enqueue, waiting as long as it takes for space.
    ///
    /// # Errors
    ///
    /// `Closed` if the queue is or becomes closed before space frees up.
    pub fn enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        self.enqueue_until(item, None, None)
    }

    /// Enqueue, waiting at most `timeout` for space.
    ///
    /// # Errors
    ///
    /// `TimedOut` if no space frees up within `timeout`, `Closed` if the queue is
    /// or becomes closed first.
    pub fn enqueue_timeout(&self, item: T, timeout: Duration) -> Result<(), Rejected<T>> {
        self.enqueue_until(item, deadline_after(Some(timeout)), None)
    }

    /// Enqueue under `scope`, optionally bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the scope is or becomes done, `TimedOut` if `timeout`
    /// elapses, `Closed` if the queue is or becomes closed.
    pub fn enqueue_within(
        &self,
        item: T,
        scope: &CancellationScope,
        timeout: Option<Duration>,
    ) -> Result<(), Rejected<T>> {
        self.enqueue_until(item, deadline_after(timeout), Some(scope))
    }

    /// Dequeue, waiting until an item arrives or the queue is closed and empty.
    ///
    /// # Errors
    ///
    /// `Drained` once the queue is closed and empty.
    pub fn dequeue(&self) -> Result<T, QueueError> {
        self.dequeue_until(None, None)
    }

    /// Dequeue, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// `TimedOut` if nothing arrives in time, `Drained` once closed and empty.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        self.dequeue_until(deadline_after(Some(timeout)), None)
    }

    /// Dequeue under `scope`. A done scope wins over buffered items so that an
    /// immediate shutdown stops consumers without draining.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the scope is or becomes done, `Drained` once closed and empty.
    pub fn dequeue_within(&self, scope: &CancellationScope) -> Result<T, QueueError> {
        self.dequeue_until(None, Some(scope))
    }

    fn watch(&self, scope: Option<&CancellationScope>) -> Option<Subscription> {
        scope.map(|scope| {
            let queue: Weak<QueueInner<T>> = Arc::downgrade(&self.inner);
            scope.subscribe(Arc::new(move || {
                if let Some(queue) = queue.upgrade() {
                    queue.wake_all();
                }
            }))
        })
    }

    fn enqueue_until(
        &self,
        item: T,
        deadline: Option<Instant>,
        scope: Option<&CancellationScope>,
    ) -> Result<(), Rejected<T>> {
        let _subscription = self.watch(scope);
        let wake_at = earliest(deadline, scope.and_then(CancellationScope::deadline));

        let mut state = self.inner.state.lock();
        let error = loop {
            if state.closed {
                break QueueError::Closed;
            }
            if let Some(reason) = scope.and_then(CancellationScope::err) {
                break QueueError::Cancelled(reason);
            }
            if state.items.len() < self.inner.capacity {
                self.push(&mut state, item);
                return Ok(());
            }
            if has_passed(deadline) {
                break QueueError::TimedOut;
            }
            match wake_at {
                Some(at) => {
                    let _ = self.inner.not_full.wait_until(&mut state, at);
                }
                None => self.inner.not_full.wait(&mut state),
            }
        };

        // We may have absorbed a wake meant for a sender that can still use the slot.
        if !state.closed && state.items.len() < self.inner.capacity {
            self.inner.not_full.notify_one();
        }
        Err(Rejected::new(item, error))
    }

    fn dequeue_until(
        &self,
        deadline: Option<Instant>,
        scope: Option<&CancellationScope>,
    ) -> Result<T, QueueError> {
        let _subscription = self.watch(scope);
        let wake_at = earliest(deadline, scope.and_then(CancellationScope::deadline));

        let mut state = self.inner.state.lock();
        let error = loop {
            if let Some(reason) = scope.and_then(CancellationScope::err) {
                break QueueError::Cancelled(reason);
            }
            if let Some(item) = self.pop(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Drained);
            }
            if has_passed(deadline) {
                break QueueError::TimedOut;
            }
            match wake_at {
                Some(at) => {
                    let _ = self.inner.not_empty.wait_until(&mut state, at);
                }
                None => self.inner.not_empty.wait(&mut state),
            }
        };

        if !state.items.is_empty() {
            self.inner.not_empty.notify_one();
        }
        Err(error)
    }
}
