//! Batch worker: the single consumer of the ingestion queue.
//!
//! The worker accumulates events into a batch and flushes on whichever
//! trigger fires first: the batch reaching its size threshold, or the
//! flush interval elapsing since the first event entered an empty batch.
//! The interval trigger bounds worst-case staleness during low traffic.
//!
//! Failed bulk writes are retried with doubling backoff a bounded number
//! of times, then the batch is dropped and counted. Loss is preferred over
//! cascading backpressure into producers; the queue bound is the only
//! regulator.

use crate::client::TelemetryClient;
use crate::metrics::IngestMetrics;
use crate::sink::EventSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tm_events::EnrichedEvent;
use tracing::{debug, error, warn};

use crate::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY};

/// How often an idle worker re-checks the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Configuration for the ingestion queue and batch worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum events queued between producers and the worker.
    pub queue_capacity: usize,

    /// Batch size threshold that forces a flush.
    pub batch_size: usize,

    /// Maximum age of a non-empty batch before it is flushed.
    pub flush_interval: Duration,

    /// Retry attempts after the initial failed bulk write.
    pub max_retries: u32,

    /// Backoff before the first retry; doubles per attempt.
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl WorkerConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }
}

/// Single consumer draining one ingestion queue.
///
/// Exactly one worker owns a queue's receiver; `run` consumes the worker,
/// so a second concurrent drain cannot be constructed.
pub struct BatchWorker<S: EventSink> {
    config: WorkerConfig,
    receiver: Receiver<EnrichedEvent>,
    sink: S,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<IngestMetrics>,
}

impl<S: EventSink> BatchWorker<S> {
    /// Drain the queue until shutdown is requested or every producer is
    /// gone, then flush the remaining partial batch and return.
    pub fn run(self) {
        let mut batch: Vec<EnrichedEvent> = Vec::with_capacity(self.config.batch_size);
        let mut deadline: Option<Instant> = None;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                self.drain_and_flush(&mut batch);
                debug!("ingest worker stopped after shutdown drain");
                return;
            }

            // Cap the wait so the shutdown flag is noticed promptly even
            // while a batch is ageing toward a distant deadline.
            let timeout = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()).min(IDLE_POLL),
                None => IDLE_POLL,
            };

            match self.receiver.recv_timeout(timeout) {
                Ok(event) => {
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + self.config.flush_interval);
                    }
                    batch.push(event);
                    if batch.len() >= self.config.batch_size {
                        self.flush(&mut batch);
                        deadline = None;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !batch.is_empty() && deadline.is_some_and(|d| Instant::now() >= d) {
                        self.flush(&mut batch);
                        deadline = None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush(&mut batch);
                    debug!("ingest worker stopped: all producers gone");
                    return;
                }
            }
        }
    }

    /// Pull everything still queued, flushing at the size threshold, then
    /// flush the final partial batch.
    fn drain_and_flush(&self, batch: &mut Vec<EnrichedEvent>) {
        while let Ok(event) = self.receiver.try_recv() {
            batch.push(event);
            if batch.len() >= self.config.batch_size {
                self.flush(batch);
            }
        }
        self.flush(batch);
    }

    /// Issue one bulk write for the whole batch, retrying with bounded
    /// backoff. The batch is cleared on success and after exhaustion.
    fn flush(&self, batch: &mut Vec<EnrichedEvent>) {
        if batch.is_empty() {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            match self.sink.insert_batch(batch) {
                Ok(()) => {
                    self.metrics
                        .add(&self.metrics.events_flushed, batch.len() as u64);
                    self.metrics.add(&self.metrics.batches_flushed, 1);
                    debug!(events = batch.len(), "flushed telemetry batch");
                    batch.clear();
                    return;
                }
                Err(err) if attempt < self.config.max_retries => {
                    attempt += 1;
                    self.metrics.add(&self.metrics.flush_retries, 1);
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        error = %err,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "bulk write failed, retrying"
                    );
                    thread::sleep(backoff);
                }
                Err(err) => {
                    error!(
                        error = %err,
                        events = batch.len(),
                        "bulk write failed after retries, dropping batch"
                    );
                    self.metrics
                        .add(&self.metrics.events_lost, batch.len() as u64);
                    self.metrics.add(&self.metrics.batches_dropped, 1);
                    batch.clear();
                    return;
                }
            }
        }
    }
}

/// Handle to a running worker thread.
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
    metrics: Arc<IngestMetrics>,
}

impl WorkerHandle {
    /// Current counter values.
    pub fn metrics(&self) -> crate::MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Begin orderly shutdown: producers start rejecting, the worker
    /// drains the queue and flushes its partial batch, then exits.
    /// Returns the final counters.
    pub fn shutdown(self) -> crate::MetricsSnapshot {
        self.shutdown.store(true, Ordering::Release);
        if self.join.join().is_err() {
            error!("ingest worker thread panicked");
        }
        self.metrics.snapshot()
    }
}

/// Wire up a complete ingestion pipeline: bounded queue, producer client,
/// and a batch worker on its own thread.
pub fn spawn_pipeline<S: EventSink + Send + 'static>(
    service: impl Into<String>,
    config: WorkerConfig,
    sink: S,
) -> std::io::Result<(TelemetryClient, WorkerHandle)> {
    let (sender, receiver) = mpsc::sync_channel(config.queue_capacity);
    let shutdown = Arc::new(AtomicBool::new(false));
    let metrics = Arc::new(IngestMetrics::new());

    let client = TelemetryClient::new(service, sender, shutdown.clone(), metrics.clone());
    let worker = BatchWorker {
        config,
        receiver,
        sink,
        shutdown: shutdown.clone(),
        metrics: metrics.clone(),
    };
    let join = thread::Builder::new()
        .name("tm-ingest-worker".to_string())
        .spawn(move || worker.run())?;

    Ok((
        client,
        WorkerHandle {
            shutdown,
            join,
            metrics,
        },
    ))
}
