//! Structured event sinks.
//!
//! The distributor reports lifecycle events to an [`EventSink`]. The default
//! [`TracingEventSink`] forwards them to `tracing`; [`InMemoryEventSink`] keeps a
//! bounded buffer for tests and diagnostics.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::clock::now_ms;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The worker pool started.
    Started,
    /// A shutdown was requested.
    ShutdownRequested,
    /// An item was refused by the backpressure policy or a closed queue.
    ItemDropped,
    /// An item failed or panicked during processing.
    ItemFailed,
    /// An item was still queued when the pool stopped immediately.
    ItemAbandoned,
    /// A worker exited its loop.
    WorkerStopped,
    /// The distributor finished and produced its summary.
    Finished,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::ShutdownRequested => "shutdown_requested",
            Self::ItemDropped => "item_dropped",
            Self::ItemFailed => "item_failed",
            Self::ItemAbandoned => "item_abandoned",
            Self::WorkerStopped => "worker_stopped",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// A structured distributor event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorEvent {
    /// Event identifier.
    pub event_id: String,
    /// Event kind.
    pub kind: EventKind,
    /// Item sequence number, for item events.
    pub seq: Option<u64>,
    /// Worker id, for worker events.
    pub worker_id: Option<usize>,
    /// Timestamp milliseconds.
    pub at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

impl DistributorEvent {
    /// Build an event stamped now with a fresh id.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            seq: None,
            worker_id: None,
            at_ms: now_ms(),
            detail: None,
        }
    }

    /// Attach an item sequence number.
    #[must_use]
    pub const fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Attach a worker id.
    #[must_use]
    pub const fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Attach free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Event sink abstraction. Called concurrently from producers and workers.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: DistributorEvent);
}

/// Forwards events to `tracing`. Item failures and drops log at warn level,
/// everything else at info.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: DistributorEvent) {
        match event.kind {
            EventKind::ItemDropped | EventKind::ItemFailed | EventKind::ItemAbandoned => warn!(
                event_id = %event.event_id,
                kind = %event.kind,
                seq = ?event.seq,
                worker_id = ?event.worker_id,
                detail = ?event.detail,
                "distributor event"
            ),
            _ => info!(
                event_id = %event.event_id,
                kind = %event.kind,
                seq = ?event.seq,
                worker_id = ?event.worker_id,
                detail = ?event.detail,
                "distributor event"
            ),
        }
    }
}

/// In-memory event sink with a bounded buffer; the oldest events are evicted.
#[derive(Debug)]
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<DistributorEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<DistributorEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of stored events of `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: DistributorEvent) {
        let mut events = self.events.lock();
        if self.max_events == 0 {
            return;
        }
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = DistributorEvent::new(EventKind::ItemFailed)
            .with_seq(7)
            .with_worker(2)
            .with_detail("boom");
        assert_eq!(event.kind, EventKind::ItemFailed);
        assert_eq!(event.seq, Some(7));
        assert_eq!(event.worker_id, Some(2));
        assert_eq!(event.detail.as_deref(), Some("boom"));
        assert!(Uuid::parse_str(&event.event_id).is_ok());
    }

    #[test]
    fn test_in_memory_sink_evicts_oldest() {
        let sink = InMemoryEventSink::new(2);
        sink.record(DistributorEvent::new(EventKind::Started).with_seq(1));
        sink.record(DistributorEvent::new(EventKind::ItemDropped).with_seq(2));
        sink.record(DistributorEvent::new(EventKind::ItemDropped).with_seq(3));

        let seqs: Vec<_> = sink.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![Some(2), Some(3)]);
        assert_eq!(sink.count(EventKind::ItemDropped), 2);
        assert_eq!(sink.count(EventKind::Started), 0);
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = DistributorEvent::new(EventKind::WorkerStopped).with_worker(1);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"worker_stopped\""));
    }
}
