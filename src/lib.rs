//! # Prometheus Work Distributor
//!
//! A bounded, cancellable work-distribution core for CPU-bound jobs.
//!
//! Producers submit opaque payloads into a fixed-capacity queue; a fixed set of
//! worker threads drains it and runs each payload through a user-supplied
//! executor. The whole run lives under a tree of cancellation scopes, so an
//! explicit cancel or an overall deadline stops producers and workers promptly
//! and every submission is still accounted for exactly once.
//!
//! ## Key Features
//!
//! - **Backpressure**: a full queue drops, times out, or blocks per policy
//! - **Cancellation Trees**: scopes derive children that inherit cancel and deadline
//! - **Dedicated Workers**: one OS thread per worker, each with its own tokio runtime
//! - **Contained Failures**: an executor error or panic fails only its item
//! - **Full Accounting**: `submitted == succeeded + failed + dropped + abandoned`
//!
//! ## Coordinator
//!
//! ```rust,ignore
//! use prometheus_work_distributor::config::{BackpressurePolicy, DistributorConfig};
//! use prometheus_work_distributor::core::{Coordinator, Producer};
//! use std::time::Duration;
//!
//! let coordinator = Coordinator::new(
//!     DistributorConfig::new()
//!         .with_capacity(10)
//!         .with_worker_count(3)
//!         .with_policy(BackpressurePolicy::Block)
//!         .with_deadline(Duration::from_millis(500)),
//!     my_executor, // Implements WorkerExecutor
//! )?;
//!
//! let producer: Producer<u64, u64> = Box::new(|submitter| {
//!     let mut n = 0;
//!     while submitter.submit(n).map_or_else(|e| !e.is_terminal(), |_| true) {
//!         n += 1;
//!     }
//! });
//!
//! let stats = coordinator.run(vec![producer])?;
//! assert_eq!(stats.submitted, stats.succeeded + stats.failed + stats.dropped + stats.abandoned);
//! ```
//!
//! For lower-level control use `WorkDistributor` directly, or compose
//! `BoundedQueue`, `CancellationScope` and `CompletionBarrier` yourself.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Queues, scopes, workers and the distributor.
pub mod core;
/// Configuration models for the distributor.
pub mod config;
/// Shared utilities.
pub mod util;

pub use crate::config::{BackpressurePolicy, DistributorConfig};
pub use crate::core::{
    CancellationScope, CompletionReason, CompletionStats, Coordinator, ItemOutcome, ShutdownMode,
    WorkDistributor, WorkerExecutor,
};
