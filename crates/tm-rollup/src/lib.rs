//! Tidemark continuous aggregation engine.
//!
//! Each aggregate definition is an independently scheduled job that
//! recomputes a trailing window of raw events into one rollup table:
//! bucketed, grouped reducer outputs merged idempotently (recomputed
//! buckets are replaced, never appended). Rollup tables are the
//! long-term record once raw partitions age out.
//!
//! This crate provides:
//! - Reducers: count, filtered count, distinct count, mean, percentile,
//!   first value
//! - The seven production aggregate definitions
//! - The refresh engine with all-or-nothing table replacement
//! - A small thread-per-job scheduler for recurring work

pub mod definition;
pub mod reducer;
pub mod refresh;
pub mod scheduler;

pub use definition::{max_start_offset, standard_definitions, AggregateDef, BucketWidth};
pub use reducer::{FieldRef, Filter, Reducer};
pub use refresh::{load_table, refresh, table_path, RefreshReport, RollupError, RollupRow};
pub use scheduler::{JobStats, Scheduler};

/// Default lookback from "now" that a refresh recomputes, in hours.
pub const DEFAULT_START_OFFSET_HOURS: i64 = 72;

/// Default gap behind "now" left out of a refresh so in-flight rows are
/// never aggregated, in seconds.
pub const DEFAULT_END_OFFSET_SECS: i64 = 300;

/// Default refresh cadence, in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;
