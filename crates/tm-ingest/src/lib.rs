//! Tidemark ingestion pipeline.
//!
//! This crate provides:
//! - Fire-and-forget producer client (`TelemetryClient`)
//! - Bounded ingestion queue with a documented drop policy
//! - Single batch worker draining the queue into bulk writes
//!
//! The producer never blocks and never surfaces a failure to business
//! logic; degradation is visible only through [`IngestMetrics`] counters.

pub mod client;
pub mod metrics;
pub mod sink;
pub mod worker;

pub use client::TelemetryClient;
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use sink::{EventSink, SinkError};
pub use worker::{spawn_pipeline, BatchWorker, WorkerConfig, WorkerHandle};

/// Default maximum events held in the ingestion queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default batch size threshold for bulk writes.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default flush interval in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;
