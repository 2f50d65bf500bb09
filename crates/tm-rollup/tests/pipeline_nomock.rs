//! No-mock pipeline integration: client -> queue -> worker -> store ->
//! refresh -> rollup table, with lifecycle over the same store.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tm_events::{EnrichedEvent, Event};
use tm_ingest::{spawn_pipeline, WorkerConfig};
use tm_rollup::{load_table, refresh, standard_definitions, table_path};
use tm_store::{CompressionPolicy, RetentionPolicy, Store, StoreConfig};
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
}

#[test]
fn tracked_events_land_in_rollups() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&StoreConfig::new(dir.path().to_path_buf())).unwrap());

    let config = WorkerConfig::default()
        .with_batch_size(10)
        .with_flush_interval(Duration::from_millis(50));
    let (client, handle) = spawn_pipeline("auth", config, store.clone()).unwrap();

    for i in 0..25 {
        client.track(Event::AuthLoginAttempt {
            actor_id: Some(Uuid::from_u128(i % 5)),
            email: format!("user{i}@example.com"),
            success: i % 4 != 0,
            error: (i % 4 == 0).then(|| "code expired".to_string()),
        });
    }
    let metrics = handle.shutdown();
    assert_eq!(metrics.events_flushed, 25);
    assert_eq!(metrics.events_dropped, 0);

    // The worker stamped wall-clock timestamps; refresh relative to the
    // real clock so the tracked events sit inside the window.
    let def = standard_definitions()
        .into_iter()
        .find(|d| d.name == "logins_hourly")
        .unwrap();
    let refresh_now = Utc::now() + ChronoDuration::hours(1);
    refresh(&def, &store, refresh_now).unwrap();

    let table = load_table(&table_path(&store, &def)).unwrap();
    let count: u64 = table
        .iter()
        .map(|r| r.values["count"].as_u64().unwrap())
        .sum();
    let succeeded: u64 = table
        .iter()
        .map(|r| r.values["succeeded"].as_u64().unwrap())
        .sum();
    assert_eq!(count, 25);
    assert_eq!(succeeded, 18);
    let actors: u64 = table
        .iter()
        .map(|r| r.values["distinct_actors"].as_u64().unwrap())
        .max()
        .unwrap();
    assert_eq!(actors, 5);
}

#[test]
fn lifecycle_preserves_rollups_after_raw_drop() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&StoreConfig::new(dir.path().to_path_buf())).unwrap();

    // Aged raw data: folded into rollups long ago by the hourly cadence;
    // here we refresh with a window reaching back far enough to cover it.
    let aged = now() - ChronoDuration::days(10);
    let events: Vec<EnrichedEvent> = (0..8)
        .map(|i| {
            EnrichedEvent::at(
                Event::TaskCompleted {
                    task_id: Uuid::new_v4(),
                    actor_id: Uuid::from_u128(i),
                    duration_ms: 100 * (i as i64 + 1),
                    exit_code: 0,
                },
                "runner",
                aged + ChronoDuration::minutes(i as i64),
            )
        })
        .collect();
    store.append_batch(&events).unwrap();

    let mut def = standard_definitions()
        .into_iter()
        .find(|d| d.name == "task_runs_daily")
        .unwrap();
    def.start_offset = ChronoDuration::days(12);
    refresh(&def, &store, now()).unwrap();

    let before = load_table(&table_path(&store, &def)).unwrap();
    assert_eq!(before.len(), 1);

    // Compress, then retire the raw partition entirely.
    store
        .compress_aged(&CompressionPolicy { after_days: 7 }, now(), false)
        .unwrap();
    let report = store
        .prune_expired(&RetentionPolicy { after_days: 8 }, now(), false)
        .unwrap();
    assert_eq!(report.partitions.len(), 1);
    assert!(store
        .scan_range(aged - ChronoDuration::hours(1), now())
        .is_empty());

    // The rollup is the long-term record: untouched by retention.
    let after = load_table(&table_path(&store, &def)).unwrap();
    assert_eq!(after, before);
}
