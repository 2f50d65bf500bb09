//! Tidemark event catalog.
//!
//! This crate provides the typed catalog of trackable occurrences shared by
//! every platform service, plus the enrichment envelope the ingestion
//! pipeline carries:
//! - `Event`: tagged variant over known event kinds
//! - `EnrichedEvent`: event + timestamp, service identity, and actor id
//!
//! Events are immutable once constructed. The serialized payload is an open
//! map: consumers must tolerate extra keys and only rely on the declared
//! aggregate inputs (`duration_ms`, `success`, `error`, `provider`,
//! `status_code`, ...).

mod event;

pub use event::{EnrichedEvent, Event};
