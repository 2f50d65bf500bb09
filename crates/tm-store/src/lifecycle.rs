//! Partition lifecycle policies: compression and retention.
//!
//! Ordering contract: compress-then-retain. A partition is only droppable
//! once it has been compressed, so a stalled compression never cascades
//! into data-destroying retention. Both jobs mutate under the store's
//! write lock, which gives per-partition mutual exclusion against each
//! other and against bulk writes.

use crate::columnar;
use crate::partition::ChunkState;
use crate::store::{chunk_path, segment_path, Store, StoreError};
use crate::{DEFAULT_COMPRESS_AFTER_DAYS, DEFAULT_RETAIN_RAW_DAYS};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use tracing::{info, warn};

/// Converts open partitions past this age to read-only columnar chunks.
///
/// The configured age must exceed every aggregate's lookback window so
/// late rows have already been folded into rollups when their partition
/// freezes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CompressionPolicy {
    pub after_days: u32,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            after_days: DEFAULT_COMPRESS_AFTER_DAYS,
        }
    }
}

/// Drops compressed partitions past this age. Rollup tables are exempt.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetentionPolicy {
    pub after_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            after_days: DEFAULT_RETAIN_RAW_DAYS,
        }
    }
}

/// Which lifecycle policy produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Compress,
    Retain,
}

/// Outcome of one lifecycle run.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleReport {
    pub action: LifecycleAction,
    /// Partitions acted on (or that would be, under dry-run).
    pub partitions: Vec<NaiveDate>,
    /// Eligible-by-age partitions skipped because their state blocks the
    /// action (retention waiting on a stalled compression).
    pub skipped: Vec<NaiveDate>,
    pub bytes_reclaimed: u64,
    pub dry_run: bool,
}

impl LifecycleReport {
    fn new(action: LifecycleAction, dry_run: bool) -> Self {
        Self {
            action,
            partitions: Vec::new(),
            skipped: Vec::new(),
            bytes_reclaimed: 0,
            dry_run,
        }
    }
}

fn age_days(date: NaiveDate, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - date).num_days()
}

fn file_size(path: &std::path::Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

impl Store {
    /// Rewrite every open partition older than the policy age as a
    /// compressed chunk. Idempotent; partial progress survives an error
    /// and the job is retried on its next schedule.
    pub fn compress_aged(
        &self,
        policy: &CompressionPolicy,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<LifecycleReport, StoreError> {
        let mut report = LifecycleReport::new(LifecycleAction::Compress, dry_run);

        let eligible: Vec<NaiveDate> = {
            let partitions = self.partitions().read().unwrap();
            partitions
                .iter()
                .filter(|(date, p)| {
                    p.state == ChunkState::Open && age_days(**date, now) > policy.after_days as i64
                })
                .map(|(date, _)| *date)
                .collect()
        };

        for date in eligible {
            let dir = self.partition_dir(date);
            if dry_run {
                report.partitions.push(date);
                report.bytes_reclaimed += file_size(&segment_path(&dir));
                continue;
            }

            let mut partitions = self.partitions().write().unwrap();
            let Some(partition) = partitions.get_mut(&date) else {
                continue;
            };
            if partition.state != ChunkState::Open {
                continue;
            }

            let mut rows = partition.rows().to_vec();
            columnar::columnar_sort(&mut rows);

            let chunk = chunk_path(&dir);
            columnar::write_chunk(&chunk, &rows)?;
            let segment = segment_path(&dir);
            let segment_bytes = file_size(&segment);
            if segment.exists() {
                fs::remove_file(&segment)?;
            }
            partition.state = ChunkState::Compressed;

            report.partitions.push(date);
            report.bytes_reclaimed += segment_bytes.saturating_sub(file_size(&chunk));
            info!(
                partition = %date,
                rows = rows.len(),
                "compressed partition to columnar chunk"
            );
        }

        Ok(report)
    }

    /// Drop every compressed partition older than the policy age.
    /// Partitions past the age but still open are skipped: compression
    /// must supersede a chunk before retention may destroy it.
    pub fn prune_expired(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<LifecycleReport, StoreError> {
        let mut report = LifecycleReport::new(LifecycleAction::Retain, dry_run);

        let mut partitions = self.partitions().write().unwrap();
        let expired: Vec<NaiveDate> = partitions
            .iter()
            .filter(|(date, _)| age_days(**date, now) > policy.after_days as i64)
            .map(|(date, _)| *date)
            .collect();

        for date in expired {
            let state = partitions.get(&date).map(|p| p.state);
            if state != Some(ChunkState::Compressed) {
                warn!(
                    partition = %date,
                    "retention skipping expired partition awaiting compression"
                );
                report.skipped.push(date);
                continue;
            }

            let dir = self.partition_dir(date);
            let bytes = file_size(&chunk_path(&dir));
            if dry_run {
                report.partitions.push(date);
                report.bytes_reclaimed += bytes;
                continue;
            }

            fs::remove_dir_all(&dir)?;
            partitions.remove(&date);
            report.partitions.push(date);
            report.bytes_reclaimed += bytes;
            info!(partition = %date, bytes, "dropped expired partition");
        }

        Ok(report)
    }
}
