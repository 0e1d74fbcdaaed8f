//! Producer orchestration on top of a [`WorkDistributor`].
//!
//! A [`Coordinator`] runs a set of producer closures on their own threads,
//! starts the worker pool, and decides how to stop:
//!
//! - every producer returned: orderly shutdown, buffered work drains
//! - the root scope ended first (cancel or deadline): immediate shutdown
//!
//! Producers submit through a [`Submitter`] and should return once
//! `submit` yields a terminal error (see `QueueError::is_terminal`). When the
//! root scope ends, producers get [`PRODUCER_GRACE`] to return; any still
//! running after that are detached and the run finishes without them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use super::barrier::CompletionBarrier;
use super::distributor::{CompletionStats, Submitter, WorkDistributor};
use super::error::DistributorError;
use super::events::EventSink;
use super::executor::WorkerExecutor;
use super::scope::CancellationScope;
use super::worker_pool::{ItemOutcome, ShutdownMode};
use crate::config::DistributorConfig;

/// How long a stopped run waits for producers to return before detaching them.
pub const PRODUCER_GRACE: Duration = Duration::from_millis(100);

/// A producer: runs on its own thread and submits until it is done.
pub type Producer<P, R> = Box<dyn FnOnce(Submitter<P, R>) + Send>;

/// Runs producers against a distributor and reports one summary.
pub struct Coordinator<P, R, E> {
    distributor: WorkDistributor<P, R, E>,
}

impl<P, R, E> Coordinator<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Build a coordinator. The configured deadline starts counting now.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: DistributorConfig, executor: E) -> Result<Self, DistributorError> {
        Ok(Self {
            distributor: WorkDistributor::new(config, executor)?,
        })
    }

    /// Build a coordinator reporting events to `events`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn with_event_sink(
        config: DistributorConfig,
        executor: E,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, DistributorError> {
        Ok(Self {
            distributor: WorkDistributor::with_event_sink(config, executor, events)?,
        })
    }

    /// Run `producers` to completion and return the summary.
    ///
    /// Blocks until all producers have returned and the pool has stopped.
    /// Cancel [`scope`](Self::scope) from another thread to stop early; the run
    /// then returns within the workers' current items plus [`PRODUCER_GRACE`],
    /// even if a producer ignores its refusals. Submissions a detached producer
    /// makes after the summary is taken are not part of it.
    ///
    /// # Errors
    ///
    /// `Spawn` if a producer thread cannot be created, `Pool` if the workers
    /// cannot be started. Producers already running are stopped first.
    pub fn run(self, producers: Vec<Producer<P, R>>) -> Result<CompletionStats, DistributorError> {
        let distributor = self.distributor;
        let root = distributor.scope().clone();
        let producers_done = CompletionBarrier::new();
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(producers.len());

        info!(producer_count = producers.len(), "Coordinator starting producers");

        for (idx, producer) in producers.into_iter().enumerate() {
            let submitter = distributor.submitter();
            let participant = producers_done.participant();
            let spawned = thread::Builder::new()
                .name(format!("wd-producer-{idx}"))
                .spawn(move || {
                    let _participant = participant;
                    producer(submitter);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(producer = idx, error = %e, "Failed to spawn producer; stopping");
                    stop(&distributor, &producers_done, handles);
                    return Err(DistributorError::Spawn(e));
                }
            }
        }

        if let Err(e) = distributor.start() {
            warn!(error = %e, "Failed to start worker pool; stopping producers");
            stop(&distributor, &producers_done, handles);
            return Err(e);
        }

        match producers_done.wait_within(&root) {
            Ok(()) => {
                debug!("All producers finished; draining");
                distributor.shutdown(ShutdownMode::Orderly);
                reap(handles);
                Ok(distributor.wait())
            }
            Err(reason) => {
                info!(%reason, "Root scope ended before producers finished");
                Ok(stop(&distributor, &producers_done, handles))
            }
        }
    }

    /// A receiver for per-item outcomes; take it before [`run`](Self::run).
    #[must_use]
    pub fn outcomes(&self) -> Receiver<ItemOutcome<R>> {
        self.distributor.outcomes()
    }

    /// The root scope. Cancelling it stops the run immediately.
    #[must_use]
    pub fn scope(&self) -> CancellationScope {
        self.distributor.scope().clone()
    }
}

/// Stop immediately, give producers [`PRODUCER_GRACE`] to return, then take
/// the summary. Producers still running are detached, never joined.
fn stop<P, R, E>(
    distributor: &WorkDistributor<P, R, E>,
    producers_done: &CompletionBarrier,
    handles: Vec<JoinHandle<()>>,
) -> CompletionStats
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    distributor.shutdown(ShutdownMode::Immediate);
    let _detached = if producers_done.wait_timeout(PRODUCER_GRACE) {
        reap(handles);
        Vec::new()
    } else {
        warn!(
            still_running = producers_done.count(),
            grace_ms = PRODUCER_GRACE.as_millis(),
            "Producers ignored cancellation; detaching"
        );
        reap_finished(handles)
    };
    distributor.wait()
}

fn reap(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        join_producer(handle);
    }
}

/// Join the producers that have returned and hand back the rest.
fn reap_finished(handles: Vec<JoinHandle<()>>) -> Vec<JoinHandle<()>> {
    let (finished, running): (Vec<_>, Vec<_>) =
        handles.into_iter().partition(JoinHandle::is_finished);
    reap(finished);
    running
}

fn join_producer(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("producer").to_owned();
    if handle.join().is_err() {
        warn!(producer = %name, "Producer thread panicked");
    }
}
