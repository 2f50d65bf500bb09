//! The seam between the batch worker and durable storage.

use thiserror::Error;
use tm_events::EnrichedEvent;

/// Errors from a bulk write attempt.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Destination for flushed batches.
///
/// The worker issues one `insert_batch` call per flush; implementations
/// must make the whole batch visible atomically to concurrent readers.
pub trait EventSink {
    fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<(), SinkError>;
}

impl<S: EventSink + ?Sized> EventSink for &S {
    fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<(), SinkError> {
        (**self).insert_batch(events)
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<(), SinkError> {
        (**self).insert_batch(events)
    }
}

impl EventSink for tm_store::Store {
    fn insert_batch(&self, events: &[EnrichedEvent]) -> Result<(), SinkError> {
        self.append_batch(events)
            .map(|_| ())
            .map_err(|e| match e {
                tm_store::StoreError::Io(io) => SinkError::Io(io),
                other => SinkError::Unavailable(other.to_string()),
            })
    }
}
