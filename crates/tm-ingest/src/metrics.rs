//! Ingestion counters.
//!
//! All failure handling inside the pipeline is absorbed locally; these
//! counters are the only externally visible signal of degradation.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters updated by the producer client and the batch worker.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Events discarded at enqueue time (queue full or shutdown begun).
    pub events_dropped: AtomicU64,

    /// Events persisted through successful bulk writes.
    pub events_flushed: AtomicU64,

    /// Successful bulk writes.
    pub batches_flushed: AtomicU64,

    /// Individual retry attempts after a failed bulk write.
    pub flush_retries: AtomicU64,

    /// Batches abandoned after exhausting retries.
    pub batches_dropped: AtomicU64,

    /// Events lost inside abandoned batches.
    pub events_lost: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            flush_retries: self.flush_retries.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            events_lost: self.events_lost.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the counters, serializable for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_dropped: u64,
    pub events_flushed: u64,
    pub batches_flushed: u64,
    pub flush_retries: u64,
    pub batches_dropped: u64,
    pub events_lost: u64,
}
