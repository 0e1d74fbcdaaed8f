//! The work distributor handle.
//!
//! [`WorkDistributor`] wires a root [`CancellationScope`], a [`BoundedQueue`],
//! a [`WorkerPool`] and an outcome stream together behind one in-process API:
//!
//! ```rust,ignore
//! use prometheus_work_distributor::config::{BackpressurePolicy, DistributorConfig};
//! use prometheus_work_distributor::core::{ShutdownMode, WorkDistributor};
//!
//! let distributor = WorkDistributor::new(
//!     DistributorConfig::new()
//!         .with_capacity(32)
//!         .with_worker_count(4)
//!         .with_policy(BackpressurePolicy::Timeout { timeout_ms: 50 }),
//!     my_executor,
//! )?;
//! distributor.start()?;
//! for job in jobs {
//!     let _ = distributor.submit(job); // refusals show up on the outcome stream
//! }
//! distributor.shutdown(ShutdownMode::Orderly);
//! let stats = distributor.wait();
//! ```
//!
//! Submissions are accepted before [`start`](WorkDistributor::start); with the
//! blocking policy a submission into a full, unstarted queue waits until the
//! pool starts or the scope ends.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{CancelReason, DistributorError, QueueError};
use super::events::{DistributorEvent, EventKind, EventSink, TracingEventSink};
use super::executor::{WorkItem, WorkerExecutor};
use super::queue::BoundedQueue;
use super::scope::CancellationScope;
use super::worker::WorkerState;
use super::worker_pool::{ItemOutcome, PoolStats, Reporter, ShutdownMode, WorkerPool};
use crate::config::{BackpressurePolicy, DistributorConfig};

/// Why a distributor finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// All work drained normally.
    Completed,
    /// The root scope was cancelled.
    Cancelled,
    /// The root scope ran past its deadline.
    DeadlineExceeded,
}

impl From<CancelReason> for CompletionReason {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::DeadlineExceeded => Self::DeadlineExceeded,
            CancelReason::Cancelled | CancelReason::ParentCancelled => Self::Cancelled,
        }
    }
}

/// Final summary returned by [`WorkDistributor::wait`] and `Coordinator::run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStats {
    /// How the run ended.
    pub reason: CompletionReason,
    /// Submission attempts.
    pub submitted: u64,
    /// Items processed successfully.
    pub succeeded: u64,
    /// Items whose processing failed.
    pub failed: u64,
    /// Items refused at submission.
    pub dropped: u64,
    /// Items left in the queue by an immediate stop.
    pub abandoned: u64,
    /// Time from construction to completion.
    pub elapsed: Duration,
}

impl CompletionStats {
    /// True when every submission has exactly one final outcome.
    #[must_use]
    pub const fn is_fully_accounted(&self) -> bool {
        self.submitted == self.succeeded + self.failed + self.dropped + self.abandoned
    }
}

struct Shared<P, R> {
    queue: BoundedQueue<WorkItem<P>>,
    scope: CancellationScope,
    policy: BackpressurePolicy,
    next_seq: AtomicU64,
    reporter: Reporter<R>,
    /// Held shared for the whole of a submission so the summary snapshot never
    /// sees a submission without its outcome.
    accounting: RwLock<()>,
}

/// A cloneable submission handle for producer threads.
pub struct Submitter<P, R> {
    shared: Arc<Shared<P, R>>,
}

impl<P, R> Clone for Submitter<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Send + 'static, R> Submitter<P, R> {
    /// Submit one payload under the configured backpressure policy.
    ///
    /// Returns the item's sequence number when accepted. A refusal is also
    /// reported as [`ItemOutcome::Dropped`] on the outcome stream.
    ///
    /// # Errors
    ///
    /// - `Full` under [`BackpressurePolicy::Drop`]
    /// - `TimedOut` under [`BackpressurePolicy::Timeout`]
    /// - `Closed` after shutdown, `Cancelled` once the root scope is done;
    ///   producers should stop on these (see [`QueueError::is_terminal`])
    pub fn submit(&self, payload: P) -> Result<u64, QueueError> {
        let shared = &self.shared;
        let _accounting = shared.accounting.read();
        let seq = shared.next_seq.fetch_add(1, Ordering::AcqRel);
        shared.reporter.note_submitted();
        let item = WorkItem::new(seq, payload);

        let result = match shared.scope.err() {
            Some(reason) => Err(QueueError::Cancelled(reason)),
            None => {
                let enqueued = match shared.policy {
                    BackpressurePolicy::Drop => shared.queue.try_enqueue(item),
                    BackpressurePolicy::Timeout { .. } => {
                        shared
                            .queue
                            .enqueue_within(item, &shared.scope, shared.policy.timeout())
                    }
                    BackpressurePolicy::Block => {
                        shared.queue.enqueue_within(item, &shared.scope, None)
                    }
                };
                enqueued.map_err(|rejected| rejected.error)
            }
        };

        match result {
            Ok(()) => Ok(seq),
            Err(reason) => {
                debug!(seq, %reason, "Submission refused");
                shared.reporter.report(ItemOutcome::Dropped { seq, reason });
                Err(reason)
            }
        }
    }

    /// True once the queue stops accepting work or the root scope is done.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed() || self.shared.scope.is_done()
    }

    /// The distributor's root scope.
    #[must_use]
    pub fn scope(&self) -> &CancellationScope {
        &self.shared.scope
    }
}

/// Bounded work distributor: one queue, one worker pool, one root scope.
pub struct WorkDistributor<P, R, E> {
    config: DistributorConfig,
    shared: Arc<Shared<P, R>>,
    executor: E,
    pool: OnceLock<WorkerPool<P>>,
    started: AtomicBool,
    outcomes: Receiver<ItemOutcome<R>>,
    created_at: Instant,
    finished: Mutex<Option<CompletionStats>>,
}

impl<P, R, E> WorkDistributor<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Build a distributor that logs events through `tracing`.
    ///
    /// The deadline, if configured, starts counting now. Workers are not
    /// started until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: DistributorConfig, executor: E) -> Result<Self, DistributorError> {
        Self::with_event_sink(config, executor, Arc::new(TracingEventSink))
    }

    /// Build a distributor reporting events to `events`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn with_event_sink(
        config: DistributorConfig,
        executor: E,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, DistributorError> {
        config.validate().map_err(DistributorError::InvalidConfig)?;
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| DistributorError::InvalidConfig("capacity must be greater than 0".into()))?;

        let scope = config
            .deadline()
            .map_or_else(CancellationScope::new, CancellationScope::with_timeout);
        let (reporter, outcomes) = Reporter::new(events);

        info!(
            capacity = config.capacity,
            worker_count = config.worker_count,
            policy = ?config.policy,
            deadline_ms = ?config.deadline_ms,
            "WorkDistributor created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                queue: BoundedQueue::new(capacity),
                scope,
                policy: config.policy,
                next_seq: AtomicU64::new(0),
                reporter,
                accounting: RwLock::new(()),
            }),
            config,
            executor,
            pool: OnceLock::new(),
            started: AtomicBool::new(false),
            outcomes,
            created_at: Instant::now(),
            finished: Mutex::new(None),
        })
    }

    /// Spawn the worker pool.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` on a second call; `Pool` if workers cannot be spawned.
    pub fn start(&self) -> Result<(), DistributorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DistributorError::AlreadyStarted);
        }
        let pool = WorkerPool::start(
            self.config.worker_count,
            self.shared.queue.clone(),
            self.shared.scope.derive(),
            self.executor.clone(),
            self.shared.reporter.clone(),
            self.config.thread_stack_size,
        )?;
        if self.pool.set(pool).is_err() {
            return Err(DistributorError::AlreadyStarted);
        }
        Ok(())
    }

    /// Submit one payload. See [`Submitter::submit`].
    ///
    /// # Errors
    ///
    /// As for [`Submitter::submit`].
    pub fn submit(&self, payload: P) -> Result<u64, QueueError> {
        self.submitter().submit(payload)
    }

    /// A cloneable submission handle for producer threads.
    #[must_use]
    pub fn submitter(&self) -> Submitter<P, R> {
        Submitter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the distributor.
    ///
    /// `Orderly` closes the queue and lets buffered items drain. `Immediate`
    /// also cancels the root scope; workers finish the item they hold and
    /// everything still queued is reported as abandoned by [`wait`](Self::wait).
    pub fn shutdown(&self, mode: ShutdownMode) {
        self.shared.reporter.event(
            DistributorEvent::new(EventKind::ShutdownRequested).with_detail(format!("{mode:?}")),
        );
        if mode == ShutdownMode::Immediate {
            self.shared.scope.cancel();
        }
        match self.pool.get() {
            Some(pool) => pool.shutdown(mode),
            None => {
                self.shared.queue.close();
            }
        }
    }

    /// Block until the pool has stopped and return the summary.
    ///
    /// Returns once a shutdown was requested and honoured, or the root scope
    /// is done. A submission racing this call is either counted together with
    /// its outcome or left out entirely; refusals after the summary is taken
    /// only appear on the outcome stream. Subsequent calls return the same
    /// summary.
    pub fn wait(&self) -> CompletionStats {
        let mut finished = self.finished.lock();
        if let Some(stats) = finished.as_ref() {
            return stats.clone();
        }

        let interrupted = match self.pool.get() {
            Some(pool) => {
                pool.join();
                pool.was_interrupted()
            }
            None => false,
        };

        self.shared.queue.close();
        let leftover = self.shared.queue.drain();
        let abandoned_any = !leftover.is_empty();
        for item in leftover {
            self.shared
                .reporter
                .report(ItemOutcome::Abandoned { seq: item.seq });
        }

        let reason = if interrupted || abandoned_any {
            self.shared
                .scope
                .err()
                .map_or(CompletionReason::Cancelled, CompletionReason::from)
        } else {
            CompletionReason::Completed
        };

        let counts = {
            let _sealed = self.shared.accounting.write();
            self.shared.reporter.stats()
        };
        let stats = CompletionStats {
            reason,
            submitted: counts.submitted,
            succeeded: counts.succeeded,
            failed: counts.failed,
            dropped: counts.dropped,
            abandoned: counts.abandoned,
            elapsed: self.created_at.elapsed(),
        };

        info!(
            reason = ?stats.reason,
            submitted = stats.submitted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            dropped = stats.dropped,
            abandoned = stats.abandoned,
            elapsed_ms = stats.elapsed.as_millis(),
            "WorkDistributor finished"
        );
        self.shared.reporter.event(
            DistributorEvent::new(EventKind::Finished).with_detail(format!("{:?}", stats.reason)),
        );

        *finished = Some(stats.clone());
        stats
    }
}

impl<P, R, E> WorkDistributor<P, R, E> {
    /// A receiver for per-item outcomes. Receivers share one stream: each
    /// outcome is delivered to exactly one of them.
    #[must_use]
    pub fn outcomes(&self) -> Receiver<ItemOutcome<R>> {
        self.outcomes.clone()
    }

    /// The root scope. Cancelling it is equivalent to an immediate shutdown.
    #[must_use]
    pub fn scope(&self) -> &CancellationScope {
        &self.shared.scope
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.reporter.stats()
    }

    /// Items currently buffered.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Worker states, empty before [`start`](WorkDistributor::start).
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.get().map(WorkerPool::worker_states).unwrap_or_default()
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &DistributorConfig {
        &self.config
    }
}
