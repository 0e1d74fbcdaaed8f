//! Cancellation scopes.
//!
//! A [`CancellationScope`] is a node in a tree of cancellation contexts. Each
//! scope moves through exactly one transition, `Active -> Done`, triggered by:
//!
//! - an explicit [`cancel`](CancellationScope::cancel) (reason `Cancelled`),
//! - its effective deadline passing (reason `DeadlineExceeded`), or
//! - an ancestor becoming done through an explicit cancel (reason `ParentCancelled`).
//!
//! Explicit cancellation is broadcast eagerly: the cancelled scope marks every live
//! descendant done and wakes any waiter registered on them. Deadline expiry is
//! observed lazily on access; blocked waiters bound their waits by
//! [`deadline`](CancellationScope::deadline), which already folds in every
//! ancestor's deadline, so they wake on time without a timer thread.
//!
//! A child keeps its parent's node alive so that cancellation still reaches it
//! after intermediate handles are dropped, but never cancels the parent. Parents
//! hold only weak links to their children. Key/value payloads are copied into the child at derive time and
//! are read-only afterwards.
//!
//! # Example
//!
//! ```
//! use prometheus_work_distributor::core::{CancelReason, CancellationScope};
//!
//! let root = CancellationScope::new();
//! let child = root.derive();
//! let grandchild = child.derive();
//!
//! root.cancel();
//! assert!(grandchild.is_done());
//! assert_eq!(grandchild.err(), Some(CancelReason::ParentCancelled));
//! assert_eq!(root.err(), Some(CancelReason::Cancelled));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::error::CancelReason;
use crate::util::clock::earliest;

type Listener = Arc<dyn Fn() + Send + Sync>;
type ValueMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

struct ScopeState {
    reason: Option<CancelReason>,
    /// Waiters, listeners and children have been told. A reason can be
    /// recorded lazily before this is set.
    broadcast: bool,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
    children: Vec<Weak<ScopeInner>>,
}

struct ScopeInner {
    id: u64,
    parent: Option<Arc<ScopeInner>>,
    /// Earliest of this scope's own deadline and every ancestor's.
    deadline: Option<Instant>,
    values: ValueMap,
    state: Mutex<ScopeState>,
    done: Condvar,
}

impl ScopeInner {
    fn new(
        parent: Option<&Arc<Self>>,
        deadline: Option<Instant>,
        values: ValueMap,
        reason: Option<CancelReason>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            parent: parent.map(Arc::clone),
            deadline,
            values,
            state: Mutex::new(ScopeState {
                reason,
                broadcast: reason.is_some(),
                listeners: Vec::new(),
                next_listener: 0,
                children: Vec::new(),
            }),
            done: Condvar::new(),
        })
    }

    /// Resolve the current reason with this scope's state lock held.
    ///
    /// Lock order is always child before parent.
    fn resolve(&self, state: &mut ScopeState) -> Option<CancelReason> {
        if state.reason.is_none() {
            if self.deadline.is_some_and(|at| Instant::now() >= at) {
                state.reason = Some(CancelReason::DeadlineExceeded);
            } else if let Some(parent) = self.parent.as_ref() {
                if parent.err().is_some() {
                    state.reason = Some(CancelReason::ParentCancelled);
                }
            }
        }
        state.reason
    }

    fn err(&self) -> Option<CancelReason> {
        let mut state = self.state.lock();
        self.resolve(&mut state)
    }

    /// Transition to done and broadcast to listeners and descendants.
    ///
    /// Returns true if this call recorded the reason. A scope already marked
    /// done by a lazy check is still broadcast to exactly once.
    fn cancel_with(&self, reason: CancelReason) -> bool {
        let (recorded, reason, listeners, children) = {
            let mut state = self.state.lock();
            if state.broadcast {
                return false;
            }
            let (recorded, reason) = match self.resolve(&mut state) {
                Some(existing) => (false, existing),
                None => {
                    state.reason = Some(reason);
                    (true, reason)
                }
            };
            state.broadcast = true;
            self.done.notify_all();
            let listeners: Vec<Listener> =
                state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            let children = std::mem::take(&mut state.children);
            (recorded, reason, listeners, children)
        };

        debug!(scope_id = self.id, reason = %reason, recorded, "Scope cancelled");

        // Listeners and children run without our lock held.
        for listener in listeners {
            listener();
        }
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel_with(CancelReason::ParentCancelled);
        }
        recorded
    }
}

/// A cloneable handle to one node of a cancellation tree.
///
/// Clones share the same node: cancelling any clone cancels them all.
#[derive(Clone)]
pub struct CancellationScope {
    inner: Arc<ScopeInner>,
}

impl CancellationScope {
    /// Create a root scope with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ScopeInner::new(None, None, ValueMap::new(), None),
        }
    }

    /// Create a root scope that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: ScopeInner::new(None, Some(deadline), ValueMap::new(), None),
        }
    }

    /// Create a root scope that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Derive a child that inherits this scope's deadline and values.
    #[must_use]
    pub fn derive(&self) -> Self {
        self.derive_inner(None, None)
    }

    /// Derive a child with its own deadline. The child's effective deadline is
    /// the earlier of `deadline` and the inherited one.
    #[must_use]
    pub fn derive_with_deadline(&self, deadline: Instant) -> Self {
        self.derive_inner(Some(deadline), None)
    }

    /// Derive a child expiring `timeout` from now (or earlier, if inherited).
    #[must_use]
    pub fn derive_with_timeout(&self, timeout: Duration) -> Self {
        self.derive_with_deadline(Instant::now() + timeout)
    }

    /// Derive a child carrying an extra key/value pair. A key already present on
    /// an ancestor is shadowed for this child and its descendants only.
    #[must_use]
    pub fn derive_with_value<V>(&self, key: impl Into<String>, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
        self.derive_inner(None, Some((key.into(), value)))
    }

    fn derive_inner(
        &self,
        deadline: Option<Instant>,
        value: Option<(String, Arc<dyn Any + Send + Sync>)>,
    ) -> Self {
        let mut values = self.inner.values.clone();
        if let Some((key, value)) = value {
            values.insert(key, value);
        }
        let deadline = earliest(self.inner.deadline, deadline);

        // Registering under the parent lock means a concurrent cancel either sees
        // the child in its list or the child sees the parent's reason here.
        let mut state = self.inner.state.lock();
        let inherited = self
            .inner
            .resolve(&mut state)
            .map(|reason| match reason {
                CancelReason::DeadlineExceeded => CancelReason::DeadlineExceeded,
                CancelReason::Cancelled | CancelReason::ParentCancelled => {
                    CancelReason::ParentCancelled
                }
            });
        let child = ScopeInner::new(Some(&self.inner), deadline, values, inherited);
        if inherited.is_none() {
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child));
        }
        drop(state);

        Self { inner: child }
    }

    /// Cancel this scope and every descendant. Idempotent: returns false if the
    /// scope was already done, in which case its original reason is kept.
    pub fn cancel(&self) -> bool {
        self.inner.cancel_with(CancelReason::Cancelled)
    }

    /// True once this scope or any ancestor is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The reason this scope is done, or `None` while it is active.
    #[must_use]
    pub fn err(&self) -> Option<CancelReason> {
        self.inner.err()
    }

    /// The effective deadline, folding in every ancestor's deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the effective deadline, if there is one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Look up a value on this scope, falling back through its ancestors.
    ///
    /// Returns `None` if the key is absent or holds a value of a different type.
    #[must_use]
    pub fn value<V>(&self, key: &str) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        self.inner
            .values
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<V>().ok())
    }

    /// Block until this scope is done and return the reason.
    pub fn wait(&self) -> CancelReason {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(reason) = self.inner.resolve(&mut state) {
                return reason;
            }
            match self.inner.deadline {
                Some(at) => {
                    let _ = self.inner.done.wait_until(&mut state, at);
                }
                None => self.inner.done.wait(&mut state),
            }
        }
    }

    /// Block until this scope is done or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        let until = earliest(Some(Instant::now() + timeout), self.inner.deadline);
        let mut state = self.inner.state.lock();
        loop {
            if let Some(reason) = self.inner.resolve(&mut state) {
                return Some(reason);
            }
            let Some(at) = until else {
                return None;
            };
            if Instant::now() >= at {
                return None;
            }
            let _ = self.inner.done.wait_until(&mut state, at);
        }
    }

    /// Register a callback fired once when this scope is cancelled explicitly,
    /// directly or through an ancestor. Deadline expiry does not fire it; waiters
    /// bound themselves by [`deadline`](Self::deadline) instead.
    ///
    /// The callback runs on the cancelling thread with no scope lock held.
    pub(crate) fn subscribe(&self, listener: Listener) -> Subscription {
        let mut state = self.inner.state.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, listener));
        Subscription {
            scope: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationScope")
            .field("id", &self.inner.id)
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish_non_exhaustive()
    }
}

/// Removes its listener from the scope when dropped.
pub(crate) struct Subscription {
    scope: Weak<ScopeInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.upgrade() {
            scope.state.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
