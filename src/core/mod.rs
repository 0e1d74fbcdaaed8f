//! Core work-distribution primitives.
//!
//! The building blocks compose bottom-up: [`CancellationScope`] trees carry
//! cancellation and deadlines, [`BoundedQueue`] provides backpressure,
//! [`WorkerPool`] consumes the queue, and [`WorkDistributor`] and
//! [`Coordinator`] tie them together with outcome accounting.

pub mod barrier;
pub mod coordinator;
pub mod distributor;
pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod scope;
pub mod shared_counter;
pub mod worker;
pub mod worker_pool;

pub use barrier::{CompletionBarrier, Participant};
pub use coordinator::{Coordinator, Producer, PRODUCER_GRACE};
pub use distributor::{CompletionReason, CompletionStats, Submitter, WorkDistributor};
pub use error::{
    AppResult, BarrierMisuse, CancelReason, DistributorError, PoolError, ProcessingError,
    QueueError, Rejected,
};
pub use events::{DistributorEvent, EventKind, EventSink, InMemoryEventSink, TracingEventSink};
pub use executor::{ItemContext, WorkItem, WorkerExecutor};
pub use queue::BoundedQueue;
pub use scope::CancellationScope;
pub use shared_counter::SharedCounter;
pub use worker::{Worker, WorkerState};
pub use worker_pool::{ItemOutcome, PoolStats, Reporter, ShutdownMode, WorkerPool};
