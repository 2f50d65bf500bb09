//! The partitioned raw-event store.

use crate::columnar;
use crate::config::StoreConfig;
use crate::partition::{ChunkState, Partition};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tm_events::EnrichedEvent;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One persisted raw event. Logical primary key: (timestamp, id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Monotonic surrogate id, unique within a store.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub service: String,
    pub actor_id: Option<Uuid>,
    /// Open structured payload; only declared aggregate inputs are
    /// contractually present.
    pub payload: Value,
}

impl StoredEvent {
    pub fn from_enriched(id: u64, event: &EnrichedEvent) -> Self {
        Self {
            id,
            timestamp: event.timestamp,
            event_type: event.kind().to_string(),
            service: event.service.clone(),
            actor_id: event.actor_id,
            payload: Value::Object(event.payload()),
        }
    }

    /// The day partition this row belongs to.
    pub fn partition_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Scalar payload field lookup; `None` for missing keys.
    pub fn payload_field(&self, key: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|map| map.get(key))
    }
}

/// Outcome of one bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendReport {
    pub appended: usize,
    /// Rows rejected because their date falls in a compressed partition.
    pub skipped_compressed: usize,
}

/// Secondary-index lookup selector.
#[derive(Clone, Copy)]
enum Lookup<'q> {
    Kind(&'q str),
    Service(&'q str),
    Actor(Uuid),
    Payload(&'q str, &'q Value),
}

/// Per-partition status line for administration output.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub date: NaiveDate,
    pub state: ChunkState,
    pub events: usize,
    pub bytes: u64,
}

/// Day-partitioned raw event store.
///
/// Producers' batches and aggregate-refresh snapshots synchronize on one
/// reader-writer lock: a bulk write publishes the whole batch inside a
/// single write-lock critical section, so `scan_range` never observes a
/// partially applied batch.
pub struct Store {
    root: PathBuf,
    partitions: RwLock<BTreeMap<NaiveDate, Partition>>,
    next_id: AtomicU64,
    skipped_compressed: AtomicU64,
}

impl Store {
    /// Open (or initialize) a store rooted at the configured data dir,
    /// reloading all partitions and their indexes.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let root = config.data_dir.clone();
        fs::create_dir_all(raw_dir(&root))?;
        fs::create_dir_all(rollups_dir(&root))?;

        let mut partitions = BTreeMap::new();
        let mut max_id = 0u64;

        for entry in fs::read_dir(raw_dir(&root))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let date = NaiveDate::parse_from_str(&name, "%Y-%m-%d").map_err(|_| {
                StoreError::InvalidPartition(format!("unrecognized partition directory {name}"))
            })?;

            let (state, rows) = load_partition_rows(&entry.path())?;
            max_id = max_id.max(rows.iter().map(|r| r.id).max().unwrap_or(0));
            partitions.insert(date, Partition::from_rows(date, state, rows));
        }

        debug!(
            partitions = partitions.len(),
            next_id = max_id + 1,
            root = %root.display(),
            "opened event store"
        );

        Ok(Self {
            root,
            partitions: RwLock::new(partitions),
            next_id: AtomicU64::new(max_id + 1),
            skipped_compressed: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rollups_dir(&self) -> PathBuf {
        rollups_dir(&self.root)
    }

    pub(crate) fn partition_dir(&self, date: NaiveDate) -> PathBuf {
        partition_dir(&self.root, date)
    }

    /// Append a batch of enriched events.
    ///
    /// The whole batch becomes visible atomically. Rows targeting a
    /// compressed partition violate chunk immutability and are skipped
    /// and counted instead of written.
    pub fn append_batch(&self, events: &[EnrichedEvent]) -> Result<AppendReport, StoreError> {
        let mut partitions = self.partitions.write().unwrap();

        let mut grouped: BTreeMap<NaiveDate, Vec<StoredEvent>> = BTreeMap::new();
        let mut skipped = 0usize;
        for event in events {
            let date = event.timestamp.date_naive();
            if matches!(
                partitions.get(&date).map(|p| p.state),
                Some(ChunkState::Compressed)
            ) {
                skipped += 1;
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            grouped
                .entry(date)
                .or_default()
                .push(StoredEvent::from_enriched(id, event));
        }

        // Durability first: segment appends happen before any in-memory
        // mutation, so a failed write leaves the snapshot unchanged and
        // the worker retries the whole batch.
        for (date, rows) in &grouped {
            append_segment(&partition_dir(&self.root, *date), rows)?;
        }

        let mut appended = 0usize;
        for (date, rows) in grouped {
            let partition = partitions
                .entry(date)
                .or_insert_with(|| Partition::new(date, ChunkState::Open));
            for row in rows {
                partition.push(row);
                appended += 1;
            }
        }

        if skipped > 0 {
            self.skipped_compressed
                .fetch_add(skipped as u64, Ordering::Relaxed);
            warn!(skipped, "dropped rows addressed to compressed partitions");
        }

        Ok(AppendReport {
            appended,
            skipped_compressed: skipped,
        })
    }

    /// Total rows ever skipped for targeting compressed partitions.
    pub fn skipped_compressed_total(&self) -> u64 {
        self.skipped_compressed.load(Ordering::Relaxed)
    }

    /// Consistent snapshot of all rows with `start <= timestamp < end`,
    /// ordered by (timestamp, id).
    pub fn scan_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<StoredEvent> {
        if start >= end {
            return Vec::new();
        }
        let partitions = self.partitions.read().unwrap();
        let mut rows: Vec<StoredEvent> = partitions
            .range(start.date_naive()..=end.date_naive())
            .flat_map(|(_, p)| p.rows())
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.timestamp, r.id));
        rows
    }

    /// Most recent rows of one kind, time-descending.
    pub fn recent_by_kind(&self, kind: &str, limit: usize) -> Vec<StoredEvent> {
        self.recent_matching(limit, Lookup::Kind(kind))
    }

    /// Most recent rows from one service, time-descending.
    pub fn recent_by_service(&self, service: &str, limit: usize) -> Vec<StoredEvent> {
        self.recent_matching(limit, Lookup::Service(service))
    }

    /// Most recent rows for one actor, time-descending.
    pub fn recent_by_actor(&self, actor: Uuid, limit: usize) -> Vec<StoredEvent> {
        self.recent_matching(limit, Lookup::Actor(actor))
    }

    /// Most recent rows whose payload field equals the given scalar,
    /// time-descending. Serves ad hoc filters without schema changes.
    pub fn recent_by_payload(&self, key: &str, value: &Value, limit: usize) -> Vec<StoredEvent> {
        self.recent_matching(limit, Lookup::Payload(key, value))
    }

    fn recent_matching(&self, limit: usize, lookup: Lookup<'_>) -> Vec<StoredEvent> {
        let partitions = self.partitions.read().unwrap();
        let mut out = Vec::new();
        // Newest partitions first; day boundaries keep this exact.
        for (_, partition) in partitions.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let mut matches = match lookup {
                Lookup::Kind(kind) => partition.rows_by_kind(kind),
                Lookup::Service(service) => partition.rows_by_service(service),
                Lookup::Actor(actor) => partition.rows_by_actor(actor),
                Lookup::Payload(key, value) => partition.rows_by_payload(key, value),
            };
            matches.sort_by_key(|r| std::cmp::Reverse((r.timestamp, r.id)));
            for row in matches {
                if out.len() >= limit {
                    break;
                }
                out.push(row.clone());
            }
        }
        out
    }

    /// Status lines for every partition, oldest first.
    pub fn partition_summaries(&self) -> Result<Vec<PartitionSummary>, StoreError> {
        let partitions = self.partitions.read().unwrap();
        let mut out = Vec::with_capacity(partitions.len());
        for (date, partition) in partitions.iter() {
            out.push(PartitionSummary {
                date: *date,
                state: partition.state,
                events: partition.len(),
                bytes: dir_size(&partition_dir(&self.root, *date))?,
            });
        }
        Ok(out)
    }

    pub(crate) fn partitions(&self) -> &RwLock<BTreeMap<NaiveDate, Partition>> {
        &self.partitions
    }
}

fn raw_dir(root: &Path) -> PathBuf {
    root.join("raw")
}

fn rollups_dir(root: &Path) -> PathBuf {
    root.join("rollups")
}

fn partition_dir(root: &Path, date: NaiveDate) -> PathBuf {
    raw_dir(root).join(date.format("%Y-%m-%d").to_string())
}

pub(crate) fn segment_path(dir: &Path) -> PathBuf {
    dir.join("events.ndjson")
}

pub(crate) fn chunk_path(dir: &Path) -> PathBuf {
    dir.join("events.parquet")
}

fn load_partition_rows(dir: &Path) -> Result<(ChunkState, Vec<StoredEvent>), StoreError> {
    let chunk = chunk_path(dir);
    if chunk.exists() {
        return Ok((ChunkState::Compressed, columnar::read_chunk(&chunk)?));
    }
    let segment = segment_path(dir);
    if !segment.exists() {
        return Ok((ChunkState::Open, Vec::new()));
    }
    let file = fs::File::open(&segment)?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok((ChunkState::Open, rows))
}

fn append_segment(dir: &Path, rows: &[StoredEvent]) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(segment_path(dir))?;
    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn dir_size(dir: &Path) -> Result<u64, StoreError> {
    let mut total = 0;
    if dir.exists() {
        for entry in fs::read_dir(dir)? {
            total += entry?.metadata()?.len();
        }
    }
    Ok(total)
}
