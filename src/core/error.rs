//! Error types for queue, scope, barrier and distributor operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a cancellation scope transitioned to done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The scope itself was cancelled explicitly.
    #[error("scope cancelled")]
    Cancelled,
    /// The scope (or an ancestor it inherited the deadline from) ran past its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// An ancestor scope was cancelled explicitly.
    #[error("parent scope cancelled")]
    ParentCancelled,
}

/// Errors produced by [`BoundedQueue`](crate::core::BoundedQueue) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueError {
    /// Non-blocking enqueue found the queue at capacity.
    #[error("queue full")]
    Full,
    /// Bounded enqueue waited its full duration without finding space.
    #[error("enqueue timed out")]
    TimedOut,
    /// The queue was closed before or while the send was pending.
    #[error("queue closed")]
    Closed,
    /// Dequeue found the queue closed and empty. A terminal signal, not a fault.
    #[error("queue closed and drained")]
    Drained,
    /// The governing cancellation scope became done while waiting.
    #[error("wait cancelled: {0}")]
    Cancelled(#[from] CancelReason),
}

impl QueueError {
    /// Returns true when retrying the same operation can never succeed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Drained | Self::Cancelled(_))
    }
}

/// An enqueue that was refused, handing the item back to the caller.
#[derive(Error)]
#[error("{error}")]
pub struct Rejected<T> {
    /// The item that was not enqueued.
    pub item: T,
    /// Why it was refused.
    pub error: QueueError,
}

impl<T> Rejected<T> {
    pub(crate) const fn new(item: T, error: QueueError) -> Self {
        Self { item, error }
    }

    /// Discard the item and keep the error.
    pub fn into_error(self) -> QueueError {
        self.error
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A per-item processing failure, contained inside the worker that hit it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingError {
    /// The executor returned an error.
    #[error("processing failed: {0}")]
    Failed(String),
    /// The executor panicked; the panic was caught at the worker boundary.
    #[error("processing panicked: {0}")]
    Panicked(String),
}

/// More deregistrations than registrations were made on a completion barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("barrier misuse: deregister called with no registered participants")]
pub struct BarrierMisuse;

/// Errors raised while starting or driving a [`WorkerPool`](crate::core::WorkerPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// Worker count of zero was requested.
    #[error("worker count must be greater than 0")]
    NoWorkers,
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        /// Id of the worker that could not be spawned.
        worker_id: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by [`WorkDistributor`](crate::core::WorkDistributor) and
/// [`Coordinator`](crate::core::Coordinator).
#[derive(Debug, Error)]
pub enum DistributorError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `start` was called on a distributor whose pool is already running.
    #[error("worker pool already started")]
    AlreadyStarted,
    /// The worker pool failed to start.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A producer thread could not be spawned.
    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
