//! Configuration models for the distributor.

pub mod distributor;

pub use distributor::{BackpressurePolicy, DistributorConfig};
