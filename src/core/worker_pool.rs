//! Worker pool with dedicated worker threads.
//!
//! A [`WorkerPool`] owns N workers that all consume one [`BoundedQueue`]. Every
//! worker registers with the pool's [`CompletionBarrier`] before its thread is
//! spawned and deregisters when it stops, so [`join`](WorkerPool::join) is a
//! barrier wait.
//!
//! # Shutdown modes
//!
//! - [`ShutdownMode::Orderly`] closes the queue. Workers drain what is buffered
//!   and stop on `Drained`.
//! - [`ShutdownMode::Immediate`] cancels the pool scope and closes the queue.
//!   Workers finish the item they hold and stop; buffered items stay queued for
//!   the owner to account for.
//!
//! Per-item results flow to the owner through a [`Reporter`], which keeps the
//! counters and forwards every [`ItemOutcome`] on a crossbeam channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::barrier::CompletionBarrier;
use super::error::{PoolError, ProcessingError, QueueError};
use super::events::{DistributorEvent, EventKind, EventSink};
use super::executor::{WorkItem, WorkerExecutor};
use super::queue::BoundedQueue;
use super::scope::CancellationScope;
use super::worker::{spawn_worker, Worker, WorkerContext, WorkerState};

/// How a pool should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop accepting work and let buffered items drain.
    Orderly,
    /// Stop as soon as in-flight items finish; buffered items are abandoned.
    Immediate,
}

/// The fate of one submitted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome<R> {
    /// The executor returned a value.
    Succeeded {
        /// Item sequence number.
        seq: u64,
        /// Worker that ran it.
        worker_id: usize,
        /// Executor output.
        output: R,
    },
    /// The executor returned an error or panicked.
    Failed {
        /// Item sequence number.
        seq: u64,
        /// Worker that ran it.
        worker_id: usize,
        /// What went wrong.
        error: ProcessingError,
    },
    /// The item was never accepted into the queue.
    Dropped {
        /// Item sequence number.
        seq: u64,
        /// Why it was refused.
        reason: QueueError,
    },
    /// The item was queued but never dequeued before an immediate stop.
    Abandoned {
        /// Item sequence number.
        seq: u64,
    },
}

impl<R> ItemOutcome<R> {
    /// Sequence number of the item this outcome belongs to.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        match self {
            Self::Succeeded { seq, .. }
            | Self::Failed { seq, .. }
            | Self::Dropped { seq, .. }
            | Self::Abandoned { seq } => *seq,
        }
    }

    /// True for [`ItemOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Statistics about item flow through a distributor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Submission attempts, accepted or not.
    pub submitted: u64,
    /// Items processed successfully.
    pub succeeded: u64,
    /// Items whose processing failed or panicked.
    pub failed: u64,
    /// Items refused at submission.
    pub dropped: u64,
    /// Items left queued by an immediate stop.
    pub abandoned: u64,
    /// Items currently being processed.
    pub in_flight: u64,
}

impl PoolStats {
    /// Items with a final outcome.
    #[must_use]
    pub const fn resolved(&self) -> u64 {
        self.succeeded + self.failed + self.dropped + self.abandoned
    }
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
    in_flight: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Acquire),
            succeeded: self.succeeded.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            abandoned: self.abandoned.load(Ordering::Acquire),
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }
}

/// Outcome reporting shared by producers, workers and the owner.
///
/// Every outcome updates the counters, is mirrored to the event sink when it
/// is not a success, and is sent on the outcome channel.
pub struct Reporter<R> {
    outcomes: Sender<ItemOutcome<R>>,
    counters: Arc<PoolCounters>,
    events: Arc<dyn EventSink>,
}

impl<R> Clone for Reporter<R> {
    fn clone(&self) -> Self {
        Self {
            outcomes: self.outcomes.clone(),
            counters: Arc::clone(&self.counters),
            events: Arc::clone(&self.events),
        }
    }
}

impl<R> Reporter<R> {
    /// Create a reporter and the receiving end of its outcome stream.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> (Self, Receiver<ItemOutcome<R>>) {
        let (outcomes, rx) = unbounded();
        (
            Self {
                outcomes,
                counters: Arc::new(PoolCounters::default()),
                events,
            },
            rx,
        )
    }

    /// Count one submission attempt.
    pub fn note_submitted(&self) {
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a final outcome.
    pub fn report(&self, outcome: ItemOutcome<R>) {
        let counter = match &outcome {
            ItemOutcome::Succeeded { .. } => &self.counters.succeeded,
            ItemOutcome::Failed {
                seq,
                worker_id,
                error,
            } => {
                self.event(
                    DistributorEvent::new(EventKind::ItemFailed)
                        .with_seq(*seq)
                        .with_worker(*worker_id)
                        .with_detail(error.to_string()),
                );
                &self.counters.failed
            }
            ItemOutcome::Dropped { seq, reason } => {
                self.event(
                    DistributorEvent::new(EventKind::ItemDropped)
                        .with_seq(*seq)
                        .with_detail(reason.to_string()),
                );
                &self.counters.dropped
            }
            ItemOutcome::Abandoned { seq } => {
                self.event(DistributorEvent::new(EventKind::ItemAbandoned).with_seq(*seq));
                &self.counters.abandoned
            }
        };
        counter.fetch_add(1, Ordering::AcqRel);
        if self.outcomes.send(outcome).is_err() {
            debug!("Outcome receiver dropped; outcome counted but not delivered");
        }
    }

    /// Forward an event to the sink.
    pub fn event(&self, event: DistributorEvent) {
        self.events.record(event);
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Mark one item in flight until the returned guard drops.
    pub(crate) fn begin(&self) -> InFlight {
        self.counters.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight {
            counters: Arc::clone(&self.counters),
        }
    }
}

pub(crate) struct InFlight {
    counters: Arc<PoolCounters>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A fixed set of worker threads consuming one queue under one scope.
///
/// # Design
///
/// - **No polling**: idle workers park in the queue; shutdown wakes them
/// - **Contained failures**: an executor error or panic fails one item only
/// - **Barrier join**: `join` waits for every worker to reach `Stopped`
pub struct WorkerPool<P> {
    queue: BoundedQueue<WorkItem<P>>,
    scope: CancellationScope,
    barrier: CompletionBarrier,
    workers: Vec<Worker>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    interrupted: Arc<AtomicBool>,
}

impl<P: Send + 'static> WorkerPool<P> {
    /// Spawn `worker_count` workers consuming `queue` under `scope`.
    ///
    /// Each worker is registered with the pool barrier before its thread starts.
    ///
    /// # Errors
    ///
    /// `NoWorkers` for a zero count; `Spawn` if a thread cannot be created, in
    /// which case workers already started are stopped immediately and joined.
    pub fn start<R, E>(
        worker_count: usize,
        queue: BoundedQueue<WorkItem<P>>,
        scope: CancellationScope,
        executor: E,
        reporter: Reporter<R>,
        stack_size: usize,
    ) -> Result<Self, PoolError>
    where
        R: Send + 'static,
        E: WorkerExecutor<P, R>,
    {
        if worker_count == 0 {
            return Err(PoolError::NoWorkers);
        }

        let barrier = CompletionBarrier::new();
        let interrupted = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker = Worker::new(worker_id);
            let ctx = WorkerContext {
                worker: worker.clone(),
                queue: queue.clone(),
                scope: scope.clone(),
                executor: executor.clone(),
                reporter: reporter.clone(),
                interrupted: Arc::clone(&interrupted),
                participant: barrier.participant(),
            };
            match spawn_worker(ctx, stack_size) {
                Ok(handle) => {
                    workers.push(worker);
                    handles.push(handle);
                }
                Err(source) => {
                    warn!(worker_id, error = %source, "Failed to spawn worker; stopping pool");
                    scope.cancel();
                    queue.close();
                    barrier.wait();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn { worker_id, source });
                }
            }
        }

        info!(
            worker_count,
            capacity = queue.capacity(),
            "WorkerPool started with dedicated OS threads"
        );
        reporter.event(
            DistributorEvent::new(EventKind::Started).with_detail(format!("{worker_count} workers")),
        );

        Ok(Self {
            queue,
            scope,
            barrier,
            workers,
            handles: Mutex::new(handles),
            interrupted,
        })
    }
}

impl<P> WorkerPool<P> {
    /// Stop the pool in the given mode. Safe to call more than once; an
    /// immediate shutdown after an orderly one still cancels the scope.
    pub fn shutdown(&self, mode: ShutdownMode) {
        info!(?mode, "Shutting down worker pool");
        if mode == ShutdownMode::Immediate {
            self.scope.cancel();
        }
        self.queue.close();
    }

    /// Block until every worker has stopped, then reap the threads.
    pub fn join(&self) {
        self.barrier.wait();
        let mut handles = self.handles.lock();
        for (idx, handle) in handles.drain(..).enumerate() {
            if handle.join().is_err() {
                warn!(worker_id = idx, "Worker thread panicked outside item processing");
            }
        }
        debug!(worker_count = self.workers.len(), "Worker pool joined");
    }

    /// Number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Current state of every worker, indexed by worker id.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(Worker::state).collect()
    }

    /// Workers still registered with the barrier.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.barrier.count()
    }

    /// True if any worker stopped because the scope became done rather than
    /// because the queue drained.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// The scope workers run under.
    #[must_use]
    pub const fn scope(&self) -> &CancellationScope {
        &self.scope
    }
}

impl<P> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        // Stop workers but DON'T join in Drop; explicit join is required for
        // graceful cleanup.
        if self.barrier.count() > 0 {
            debug!("WorkerPool dropped with live workers - stopping them without join");
            self.scope.cancel();
            self.queue.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::InMemoryEventSink;

    #[test]
    fn test_outcome_seq_and_success() {
        let ok: ItemOutcome<u8> = ItemOutcome::Succeeded {
            seq: 4,
            worker_id: 0,
            output: 1,
        };
        let dropped: ItemOutcome<u8> = ItemOutcome::Dropped {
            seq: 5,
            reason: QueueError::Full,
        };
        assert_eq!(ok.seq(), 4);
        assert!(ok.is_success());
        assert_eq!(dropped.seq(), 5);
        assert!(!dropped.is_success());
    }

    #[test]
    fn test_reporter_counts_and_forwards() {
        let sink = Arc::new(InMemoryEventSink::new(16));
        let (reporter, rx) = Reporter::<u8>::new(sink.clone());
        reporter.note_submitted();
        reporter.note_submitted();
        reporter.note_submitted();
        reporter.report(ItemOutcome::Succeeded {
            seq: 0,
            worker_id: 0,
            output: 9,
        });
        reporter.report(ItemOutcome::Dropped {
            seq: 1,
            reason: QueueError::Full,
        });
        reporter.report(ItemOutcome::Abandoned { seq: 2 });

        let stats = reporter.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.resolved(), 3);
        assert_eq!(rx.try_iter().count(), 3);
        assert_eq!(sink.count(EventKind::ItemDropped), 1);
        assert_eq!(sink.count(EventKind::ItemAbandoned), 1);
    }

    #[test]
    fn test_in_flight_guard() {
        let (reporter, _rx) = Reporter::<()>::new(Arc::new(InMemoryEventSink::new(1)));
        let guard = reporter.begin();
        assert_eq!(reporter.stats().in_flight, 1);
        drop(guard);
        assert_eq!(reporter.stats().in_flight, 0);
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.resolved(), 0);
    }
}
