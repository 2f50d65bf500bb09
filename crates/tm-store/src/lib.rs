//! Tidemark time-series store.
//!
//! Raw events live in day-width partitions under `<data_dir>/raw/`:
//! NDJSON segments while a partition is open, zstd Parquet once it is
//! compressed. Rollup tables live under `<data_dir>/rollups/` and are
//! exempt from retention.
//!
//! This crate provides:
//! - Append-mostly bulk writes with atomic batch visibility
//! - Consistent range snapshots for aggregate refresh
//! - Secondary lookups by kind, service, and actor (time-descending)
//! - An inverted index over the open event payload
//! - Lifecycle policies: compression of aged partitions and retention
//!   drops of expired ones

pub mod columnar;
pub mod config;
pub mod lifecycle;
pub mod partition;
pub mod store;

pub use columnar::events_schema;
pub use config::{default_data_dir, StoreConfig};
pub use lifecycle::{CompressionPolicy, LifecycleAction, LifecycleReport, RetentionPolicy};
pub use partition::{ChunkState, Partition};
pub use store::{AppendReport, PartitionSummary, Store, StoreError, StoredEvent};

/// Schema version persisted alongside the store layout.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Default age before an open partition is compressed, in days.
pub const DEFAULT_COMPRESS_AFTER_DAYS: u32 = 7;

/// Default age before a compressed partition is dropped, in days.
pub const DEFAULT_RETAIN_RAW_DAYS: u32 = 90;
