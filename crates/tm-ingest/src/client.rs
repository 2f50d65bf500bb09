//! Fire-and-forget producer client.

use crate::metrics::IngestMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use tm_events::{EnrichedEvent, Event};
use tracing::debug;

/// Client for tracking telemetry events.
///
/// `track` enriches the event and places it on the bounded ingestion
/// queue. It never blocks the caller and never reports a failure: if the
/// queue is full or shutdown has begun, the event is dropped and counted.
/// Within one producer, enqueue order is preserved; no ordering is
/// guaranteed across producers.
#[derive(Clone)]
pub struct TelemetryClient {
    service: Arc<str>,
    sender: SyncSender<EnrichedEvent>,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<IngestMetrics>,
}

impl TelemetryClient {
    pub(crate) fn new(
        service: impl Into<String>,
        sender: SyncSender<EnrichedEvent>,
        shutdown: Arc<AtomicBool>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            service: service.into().into(),
            sender,
            shutdown,
            metrics,
        }
    }

    /// Create a no-op client for tests or disabled telemetry.
    ///
    /// Every tracked event is dropped (and counted) without a worker.
    pub fn noop() -> Self {
        let (sender, receiver) = std::sync::mpsc::sync_channel(1);
        drop(receiver);
        Self::new(
            "noop",
            sender,
            Arc::new(AtomicBool::new(true)),
            Arc::new(IngestMetrics::new()),
        )
    }

    /// Track a telemetry event.
    ///
    /// Non-blocking; downstream failures are never visible to the caller.
    pub fn track(&self, event: Event) {
        if self.shutdown.load(Ordering::Acquire) {
            self.metrics.add(&self.metrics.events_dropped, 1);
            return;
        }
        let enriched = EnrichedEvent::new(event, &self.service);
        if let Err(err) = self.sender.try_send(enriched) {
            // Full or disconnected: availability wins over durability.
            self.metrics.add(&self.metrics.events_dropped, 1);
            debug!(error = %err, "telemetry event dropped at enqueue");
        }
    }

    /// Track an event only if a condition holds.
    pub fn track_if(&self, condition: bool, event: Event) {
        if condition {
            self.track(event);
        }
    }

    /// Events dropped at enqueue time so far.
    pub fn dropped(&self) -> u64 {
        self.metrics.snapshot().events_dropped
    }

    /// Shared pipeline counters.
    pub fn metrics(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }
}
