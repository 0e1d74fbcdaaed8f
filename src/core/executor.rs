//! Work items and the executor trait workers run them through.

use std::time::Instant;

use async_trait::async_trait;

use super::scope::CancellationScope;

/// A unit of work travelling through the queue.
///
/// `seq` is assigned when the item is submitted and increases monotonically
/// per distributor. It exists for diagnostics and ordering checks only; it
/// never affects dequeue order.
#[derive(Debug)]
pub struct WorkItem<P> {
    /// Submission sequence number.
    pub seq: u64,
    /// Opaque caller payload.
    pub payload: P,
    /// When the item was submitted.
    pub submitted_at: Instant,
}

impl<P> WorkItem<P> {
    /// Wrap `payload` with a sequence number, stamped now.
    pub fn new(seq: u64, payload: P) -> Self {
        Self {
            seq,
            payload,
            submitted_at: Instant::now(),
        }
    }
}

/// Per-item context handed to an executor.
#[derive(Debug, Clone)]
pub struct ItemContext {
    /// Submission sequence number of the item.
    pub seq: u64,
    /// Id of the worker running the item.
    pub worker_id: usize,
    /// The worker pool's scope. Long-running executors should check it and bail
    /// out early once it is done.
    pub scope: CancellationScope,
}

/// Executor trait for worker pools.
///
/// Returning `Err` or panicking marks only this item as failed; the worker
/// keeps running and the failure is reported on the outcome stream.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_work_distributor::core::{ItemContext, WorkerExecutor};
///
/// #[derive(Clone)]
/// struct Doubler;
///
/// #[async_trait]
/// impl WorkerExecutor<u64, u64> for Doubler {
///     async fn execute(&self, payload: u64, _ctx: ItemContext) -> anyhow::Result<u64> {
///         Ok(payload * 2)
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Process one payload.
    ///
    /// # Threading
    ///
    /// Called from a dedicated worker thread with its own single-threaded tokio
    /// runtime, so CPU-bound work does not block any other runtime.
    async fn execute(&self, payload: P, ctx: ItemContext) -> anyhow::Result<R>;
}
