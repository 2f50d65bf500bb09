//! Incremental refresh: recompute a trailing window, merge into the table.

use crate::definition::AggregateDef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tm_store::{Store, StoreError, StoredEvent};
use tracing::{debug, info};

/// Errors from rollup refresh.
#[derive(Error, Debug)]
pub enum RollupError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of a rollup table: reducer outputs for a (bucket, group) cell.
///
/// The stored value is a pure function of the raw rows whose timestamp
/// falls in the bucket and whose grouping fields match; recomputing from
/// raw (while it exists) must reproduce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    pub bucket: DateTime<Utc>,
    /// Grouping-key columns, canonical string form; empty for ungrouped
    /// aggregates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub group: BTreeMap<String, String>,
    /// One entry per named reducer output.
    pub values: BTreeMap<String, Value>,
}

/// Outcome of one refresh run.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub definition: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub raw_rows: usize,
    pub rows_written: usize,
}

/// Path of the persisted table for one definition.
pub fn table_path(store: &Store, def: &AggregateDef) -> PathBuf {
    store.rollups_dir().join(format!("{}.json", def.name))
}

/// Load a rollup table; a missing file is an empty table.
pub fn load_table(path: &Path) -> Result<Vec<RollupRow>, RollupError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn save_table(path: &Path, rows: &[RollupRow]) -> Result<(), RollupError> {
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, serde_json::to_string_pretty(rows)?)?;
    fs::rename(&temp, path)?;
    Ok(())
}

/// Recompute the trailing window `[now - start_offset, now - end_offset)`
/// and merge the results into the definition's table.
///
/// Every bucket inside the recomputed window is replaced, including ones
/// that became empty; rows outside the window are untouched. The table is
/// rewritten through a temp file, so a failed run commits nothing and is
/// simply retried on the next schedule. Running the same window twice over
/// unchanged raw data produces a byte-identical table.
pub fn refresh(
    def: &AggregateDef,
    store: &Store,
    now: DateTime<Utc>,
) -> Result<RefreshReport, RollupError> {
    // Align the window start down to a bucket boundary so the oldest
    // recomputed bucket is always fully covered.
    let window_start = def.bucket.truncate(now - def.start_offset);
    let window_end = now - def.end_offset;

    let raw = store.scan_range(window_start, window_end);

    // (bucket, group) -> rows, in (timestamp, id) order from the scan.
    let mut cells: BTreeMap<(DateTime<Utc>, BTreeMap<String, String>), Vec<&StoredEvent>> =
        BTreeMap::new();
    for row in raw.iter().filter(|r| def.filter.matches(r)) {
        let Some(group) = group_key(def, row) else {
            continue;
        };
        cells
            .entry((def.bucket.truncate(row.timestamp), group))
            .or_default()
            .push(row);
    }

    let fresh: Vec<RollupRow> = cells
        .into_iter()
        .map(|((bucket, group), rows)| RollupRow {
            bucket,
            group,
            values: def
                .reducers
                .iter()
                .map(|(name, reducer)| (name.clone(), reducer.evaluate(&rows)))
                .collect(),
        })
        .collect();

    let path = table_path(store, def);
    let mut table = load_table(&path)?;
    table.retain(|row| row.bucket < window_start || row.bucket >= window_end);
    let rows_written = fresh.len();
    table.extend(fresh);
    table.sort_by(|a, b| (a.bucket, &a.group).cmp(&(b.bucket, &b.group)));
    save_table(&path, &table)?;

    debug!(
        definition = %def.name,
        raw_rows = raw.len(),
        rows_written,
        "rollup refresh merged"
    );
    if rows_written > 0 {
        info!(definition = %def.name, rows = rows_written, "rollup refreshed");
    }

    Ok(RefreshReport {
        definition: def.name.clone(),
        window_start,
        window_end,
        raw_rows: raw.len(),
        rows_written,
    })
}

/// Canonical grouping key; `None` excludes the row (missing group field).
fn group_key(def: &AggregateDef, row: &StoredEvent) -> Option<BTreeMap<String, String>> {
    let mut group = BTreeMap::new();
    for field in &def.group_by {
        group.insert(field.name().to_string(), field.extract_key(row)?);
    }
    Some(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{standard_definitions, AggregateDef, BucketWidth};
    use crate::reducer::{FieldRef, Filter, Reducer};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::TempDir;
    use tm_events::{EnrichedEvent, Event};
    use tm_store::StoreConfig;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
    }

    fn open_store(dir: &TempDir) -> Store {
        Store::open(&StoreConfig::new(dir.path().to_path_buf())).unwrap()
    }

    fn task_completed_at(ts: DateTime<Utc>, duration_ms: i64) -> EnrichedEvent {
        EnrichedEvent::at(
            Event::TaskCompleted {
                task_id: Uuid::new_v4(),
                actor_id: Uuid::new_v4(),
                duration_ms,
                exit_code: 0,
            },
            "runner",
            ts,
        )
    }

    fn task_runs_hourly() -> AggregateDef {
        standard_definitions()
            .into_iter()
            .find(|d| d.name == "task_runs_hourly")
            .unwrap()
    }

    #[test]
    fn worked_example_mean_and_p95() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let bucket_start = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
        store
            .append_batch(&[
                task_completed_at(bucket_start + Duration::minutes(5), 100),
                task_completed_at(bucket_start + Duration::minutes(10), 200),
                task_completed_at(bucket_start + Duration::minutes(15), 300),
            ])
            .unwrap();

        let def = task_runs_hourly();
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        assert_eq!(table.len(), 1);
        let row = &table[0];
        assert_eq!(row.bucket, bucket_start);
        assert_eq!(row.values["count"], json!(3));
        assert_eq!(row.values["duration_ms_mean"], json!(200.0));
        assert_eq!(row.values["duration_ms_p95"], json!(300.0));
        assert_eq!(row.values["duration_ms_p50"], json!(200.0));
    }

    #[test]
    fn refresh_is_idempotent_bytes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let bucket_start = Utc.with_ymd_and_hms(2026, 8, 6, 20, 0, 0).unwrap();
        store
            .append_batch(&[
                task_completed_at(bucket_start + Duration::minutes(1), 50),
                task_completed_at(bucket_start + Duration::minutes(2), 70),
            ])
            .unwrap();

        let def = task_runs_hourly();
        refresh(&def, &store, now()).unwrap();
        let first = fs::read(table_path(&store, &def)).unwrap();
        refresh(&def, &store, now()).unwrap();
        let second = fs::read(table_path(&store, &def)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn recomputed_buckets_are_replaced_not_appended() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let bucket_start = Utc.with_ymd_and_hms(2026, 8, 7, 8, 0, 0).unwrap();
        store
            .append_batch(&[task_completed_at(bucket_start + Duration::minutes(1), 10)])
            .unwrap();

        let def = task_runs_hourly();
        refresh(&def, &store, now()).unwrap();

        store
            .append_batch(&[task_completed_at(bucket_start + Duration::minutes(2), 20)])
            .unwrap();
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].values["count"], json!(2));
    }

    #[test]
    fn end_offset_excludes_in_flight_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .append_batch(&[
                task_completed_at(now() - Duration::minutes(2), 10),
                task_completed_at(now() - Duration::hours(1), 20),
            ])
            .unwrap();

        let def = task_runs_hourly();
        // end_offset is 5 minutes: the 2-minute-old row must wait.
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        let total: u64 = table
            .iter()
            .map(|r| r.values["count"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn start_offset_bounds_the_window() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .append_batch(&[
                task_completed_at(now() - Duration::days(5), 10),
                task_completed_at(now() - Duration::days(1), 20),
            ])
            .unwrap();

        let def = task_runs_hourly();
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table[0].values["duration_ms_mean"],
            json!(20.0),
            "row older than the lookback must not be aggregated"
        );
    }

    #[test]
    fn rows_outside_window_survive_merge() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let def = task_runs_hourly();

        // A historical row beyond the lookback, as left by an earlier
        // refresh; its raw partition may be long gone.
        let historical = RollupRow {
            bucket: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
            group: BTreeMap::new(),
            values: BTreeMap::from([("count".to_string(), json!(99))]),
        };
        save_table(&table_path(&store, &def), std::slice::from_ref(&historical)).unwrap();

        store
            .append_batch(&[task_completed_at(now() - Duration::hours(2), 10)])
            .unwrap();
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0], historical);
    }

    #[test]
    fn stale_rows_inside_window_are_dropped() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let def = task_runs_hourly();

        let stale = RollupRow {
            bucket: def.bucket.truncate(now() - Duration::hours(10)),
            group: BTreeMap::new(),
            values: BTreeMap::from([("count".to_string(), json!(5))]),
        };
        save_table(&table_path(&store, &def), &[stale]).unwrap();

        // No raw rows exist for that bucket: the refresh must erase it.
        refresh(&def, &store, now()).unwrap();
        let table = load_table(&table_path(&store, &def)).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn grouped_aggregate_emits_one_row_per_service() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ts = now() - Duration::hours(3);
        let api = |service: &str, status: u16, duration: i64| {
            EnrichedEvent::at(
                Event::ApiRequest {
                    service: service.to_string(),
                    endpoint: "/v1/ping".to_string(),
                    method: "GET".to_string(),
                    status_code: status,
                    duration_ms: duration,
                    actor_id: None,
                },
                "gateway",
                ts,
            )
        };
        store
            .append_batch(&[
                api("billing", 200, 10),
                api("billing", 502, 30),
                api("search", 200, 5),
            ])
            .unwrap();

        let def = standard_definitions()
            .into_iter()
            .find(|d| d.name == "api_requests_hourly")
            .unwrap();
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        assert_eq!(table.len(), 2);
        let billing = table
            .iter()
            .find(|r| r.group["service"] == "billing")
            .unwrap();
        assert_eq!(billing.values["count"], json!(2));
        assert_eq!(billing.values["server_errors"], json!(1));
        assert_eq!(billing.values["duration_ms_mean"], json!(20.0));
        let search = table
            .iter()
            .find(|r| r.group["service"] == "search")
            .unwrap();
        assert_eq!(search.values["server_errors"], json!(0));
    }

    #[test]
    fn equivalence_with_direct_recompute() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let bucket_start = Utc.with_ymd_and_hms(2026, 8, 6, 15, 0, 0).unwrap();
        let durations = [12, 48, 7, 91, 33];
        let events: Vec<EnrichedEvent> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| task_completed_at(bucket_start + Duration::minutes(i as i64), *d))
            .collect();
        store.append_batch(&events).unwrap();

        let def = task_runs_hourly();
        refresh(&def, &store, now()).unwrap();
        let table = load_table(&table_path(&store, &def)).unwrap();
        let row = table.iter().find(|r| r.bucket == bucket_start).unwrap();

        // Recompute every reducer straight from the raw snapshot.
        let raw = store.scan_range(bucket_start, bucket_start + Duration::hours(1));
        let refs: Vec<&StoredEvent> = raw.iter().filter(|r| def.filter.matches(r)).collect();
        for (name, reducer) in &def.reducers {
            assert_eq!(&row.values[name], &reducer.evaluate(&refs), "{name}");
        }
    }

    #[test]
    fn ungrouped_definition_without_group_field_still_aggregates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .append_batch(&[task_completed_at(now() - Duration::hours(1), 5)])
            .unwrap();

        let def = AggregateDef::new("all_events", BucketWidth::Day, Filter::any())
            .reduce("events", Reducer::Count)
            .reduce("distinct_actors", Reducer::DistinctCount(FieldRef::ActorId));
        refresh(&def, &store, now()).unwrap();

        let table = load_table(&table_path(&store, &def)).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table[0].group.is_empty());
        assert_eq!(table[0].values["events"], json!(1));
    }
}
