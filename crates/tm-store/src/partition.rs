//! In-memory view of one day-width partition.
//!
//! Every row belongs to exactly one partition, determined solely by the
//! UTC date of its timestamp; boundaries are fixed at creation. A
//! partition is `Open` (writable NDJSON segment) until the lifecycle
//! manager rewrites it as a read-only Parquet chunk.

use crate::store::StoredEvent;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Physical state of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Writable, row-oriented NDJSON segment.
    Open,
    /// Read-only, columnar Parquet chunk. No further writes.
    Compressed,
}

impl std::fmt::Display for ChunkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkState::Open => write!(f, "open"),
            ChunkState::Compressed => write!(f, "compressed"),
        }
    }
}

/// Postings lists rebuilt on load and maintained on append.
#[derive(Debug, Default)]
struct PartitionIndex {
    by_kind: HashMap<String, Vec<usize>>,
    by_service: HashMap<String, Vec<usize>>,
    by_actor: HashMap<Uuid, Vec<usize>>,
    /// Inverted index over scalar payload values, keyed (field, value).
    by_payload: HashMap<(String, String), Vec<usize>>,
}

/// Canonical index key for a scalar payload value; objects and arrays are
/// not indexed.
fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        _ => None,
    }
}

/// One day of raw events plus its secondary indexes.
#[derive(Debug)]
pub struct Partition {
    pub date: NaiveDate,
    pub state: ChunkState,
    rows: Vec<StoredEvent>,
    index: PartitionIndex,
}

impl Partition {
    pub fn new(date: NaiveDate, state: ChunkState) -> Self {
        Self {
            date,
            state,
            rows: Vec::new(),
            index: PartitionIndex::default(),
        }
    }

    /// Build a partition from loaded rows, sorted to (timestamp, id).
    pub fn from_rows(date: NaiveDate, state: ChunkState, mut rows: Vec<StoredEvent>) -> Self {
        rows.sort_by_key(|r| (r.timestamp, r.id));
        let mut partition = Self::new(date, state);
        for row in rows {
            partition.push(row);
        }
        partition
    }

    /// Append one row and index it.
    pub fn push(&mut self, row: StoredEvent) {
        let pos = self.rows.len();
        self.index
            .by_kind
            .entry(row.event_type.clone())
            .or_default()
            .push(pos);
        self.index
            .by_service
            .entry(row.service.clone())
            .or_default()
            .push(pos);
        if let Some(actor) = row.actor_id {
            self.index.by_actor.entry(actor).or_default().push(pos);
        }
        if let Some(payload) = row.payload.as_object() {
            for (key, value) in payload {
                if let Some(scalar) = scalar_key(value) {
                    self.index
                        .by_payload
                        .entry((key.clone(), scalar))
                        .or_default()
                        .push(pos);
                }
            }
        }
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[StoredEvent] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn select(&self, postings: Option<&Vec<usize>>) -> Vec<&StoredEvent> {
        postings
            .map(|positions| positions.iter().map(|&pos| &self.rows[pos]).collect())
            .unwrap_or_default()
    }

    pub fn rows_by_kind(&self, kind: &str) -> Vec<&StoredEvent> {
        self.select(self.index.by_kind.get(kind))
    }

    pub fn rows_by_service(&self, service: &str) -> Vec<&StoredEvent> {
        self.select(self.index.by_service.get(service))
    }

    pub fn rows_by_actor(&self, actor: Uuid) -> Vec<&StoredEvent> {
        self.select(self.index.by_actor.get(&actor))
    }

    pub fn rows_by_payload(&self, key: &str, value: &Value) -> Vec<&StoredEvent> {
        match scalar_key(value) {
            Some(scalar) => self.select(self.index.by_payload.get(&(key.to_string(), scalar))),
            None => Vec::new(),
        }
    }
}
