//! The worker loop.
//!
//! Each worker is a dedicated OS thread with its own single-threaded tokio
//! runtime. It repeatedly dequeues under the pool scope, runs the item through
//! the executor and reports the outcome. Failures and panics are contained to
//! the item that caused them.
//!
//! ```text
//!            dequeue ok               outcome reported
//!   Idle ───────────────▶ Processing ─────────────────▶ Idle
//!    │
//!    │ drained / scope done
//!    ▼
//!  Stopped
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::barrier::Participant;
use super::error::{ProcessingError, QueueError};
use super::events::{DistributorEvent, EventKind};
use super::executor::{ItemContext, WorkItem, WorkerExecutor};
use super::queue::BoundedQueue;
use super::scope::CancellationScope;
use super::worker_pool::{ItemOutcome, Reporter};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for an item.
    Idle = 0,
    /// Running an item through the executor.
    Processing = 1,
    /// Exited its loop; never restarts.
    Stopped = 2,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Processing,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
        })
    }
}

/// A pool-owned handle to one worker's identity and state.
#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    state: Arc<AtomicU8>,
}

impl Worker {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
        }
    }

    /// Worker id, unique within its pool.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Everything a worker thread owns.
pub(crate) struct WorkerContext<P, R, E> {
    pub worker: Worker,
    pub queue: BoundedQueue<WorkItem<P>>,
    pub scope: CancellationScope,
    pub executor: E,
    pub reporter: Reporter<R>,
    pub interrupted: Arc<AtomicBool>,
    /// Deregisters from the pool barrier when the thread exits, even by unwinding.
    pub participant: Participant,
}

/// Spawn a worker thread.
pub(crate) fn spawn_worker<P, R, E>(
    ctx: WorkerContext<P, R, E>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    thread::Builder::new()
        .name(format!("wd-worker-{}", ctx.worker.id))
        .stack_size(stack_size)
        .spawn(move || run(ctx))
}

fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into())
}

fn run<P, R, E>(ctx: WorkerContext<P, R, E>)
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let WorkerContext {
        worker,
        queue,
        scope,
        executor,
        reporter,
        interrupted,
        participant,
    } = ctx;
    let worker_id = worker.id;

    debug!(worker_id, "Worker thread started");

    let stop_reason = match build_runtime() {
        Ok(rt) => work_loop(&worker, &queue, &scope, &executor, &reporter, &interrupted, rt),
        Err(e) => {
            error!(worker_id, error = %e, "Failed to create worker runtime");
            format!("runtime unavailable: {e}")
        }
    };

    worker.set_state(WorkerState::Stopped);
    reporter.event(
        DistributorEvent::new(EventKind::WorkerStopped)
            .with_worker(worker_id)
            .with_detail(stop_reason.clone()),
    );
    debug!(worker_id, reason = %stop_reason, "Worker thread exiting");
    drop(participant);
}

/// Run items until the queue drains or the scope is done. Returns why it stopped.
fn work_loop<P, R, E>(
    worker: &Worker,
    queue: &BoundedQueue<WorkItem<P>>,
    scope: &CancellationScope,
    executor: &E,
    reporter: &Reporter<R>,
    interrupted: &AtomicBool,
    mut rt: tokio::runtime::Runtime,
) -> String
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let worker_id = worker.id;
    loop {
        worker.set_state(WorkerState::Idle);

        // Blocks until an item arrives, the queue drains, or the scope is done.
        let item = match queue.dequeue_within(scope) {
            Ok(item) => item,
            Err(QueueError::Cancelled(reason)) => {
                interrupted.store(true, Ordering::Release);
                return reason.to_string();
            }
            Err(err) => return err.to_string(),
        };

        worker.set_state(WorkerState::Processing);
        let seq = item.seq;
        debug!(worker_id, seq, "Worker executing item");

        let _in_flight = reporter.begin();
        let ctx = ItemContext {
            seq,
            worker_id,
            scope: scope.clone(),
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            rt.block_on(executor.execute(item.payload, ctx))
        }));

        let outcome = match result {
            Ok(Ok(output)) => ItemOutcome::Succeeded {
                seq,
                worker_id,
                output,
            },
            Ok(Err(err)) => ItemOutcome::Failed {
                seq,
                worker_id,
                error: ProcessingError::Failed(format!("{err:#}")),
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker_id, seq, panic = %message, "Executor panicked; item marked failed");
                reporter.report(ItemOutcome::Failed {
                    seq,
                    worker_id,
                    error: ProcessingError::Panicked(message),
                });
                // The runtime may be mid-poll after an unwind; start from a clean one.
                match build_runtime() {
                    Ok(fresh) => rt = fresh,
                    Err(e) => {
                        error!(worker_id, error = %e, "Failed to rebuild worker runtime");
                        return format!("runtime unavailable: {e}");
                    }
                }
                continue;
            }
        };

        debug!(worker_id, seq, "Worker completed item");
        reporter.report(outcome);
    }
}
