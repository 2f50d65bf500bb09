//! Parquet chunk encoding for compressed partitions.
//!
//! Compressed chunks are grouped by (event_type, service) and ordered by
//! time descending inside each group, matching the dashboard access
//! pattern. Files are written to a temp path and atomically renamed.

use crate::store::{StoreError, StoredEvent};
use arrow::array::{Array, RecordBatch, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{WriterProperties, WriterVersion};
use std::cmp::Reverse;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Helper to create a timestamp field (microseconds UTC).
fn timestamp_field(name: &str, nullable: bool) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        nullable,
    )
}

fn string_field(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

/// Arrow schema for a raw-event chunk.
pub fn events_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        timestamp_field("timestamp", false),
        string_field("event_type", false),
        string_field("service", false),
        string_field("actor_id", true),
        string_field("payload_json", false),
    ])
}

/// Sort rows into the chunk layout: (event_type, service) groups with
/// newest rows first inside each group.
pub fn columnar_sort(rows: &mut [StoredEvent]) {
    rows.sort_by(|a, b| {
        (&a.event_type, &a.service, Reverse((a.timestamp, a.id))).cmp(&(
            &b.event_type,
            &b.service,
            Reverse((b.timestamp, b.id)),
        ))
    });
}

/// Write one compressed chunk, replacing `path` atomically.
pub fn write_chunk(path: &Path, rows: &[StoredEvent]) -> Result<(), StoreError> {
    let schema = Arc::new(events_schema());

    let ids = UInt64Array::from(rows.iter().map(|r| r.id).collect::<Vec<_>>());
    let timestamps = TimestampMicrosecondArray::from(
        rows.iter()
            .map(|r| r.timestamp.timestamp_micros())
            .collect::<Vec<_>>(),
    )
    .with_timezone("UTC");
    let kinds = StringArray::from(rows.iter().map(|r| r.event_type.as_str()).collect::<Vec<_>>());
    let services = StringArray::from(rows.iter().map(|r| r.service.as_str()).collect::<Vec<_>>());
    let actors = StringArray::from(
        rows.iter()
            .map(|r| r.actor_id.map(|a| a.to_string()))
            .collect::<Vec<Option<String>>>(),
    );
    let payloads = StringArray::from(
        rows.iter()
            .map(|r| r.payload.to_string())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(ids),
            Arc::new(timestamps),
            Arc::new(kinds),
            Arc::new(services),
            Arc::new(actors),
            Arc::new(payloads),
        ],
    )?;

    let temp_path = path.with_extension("parquet.tmp");
    let file = File::create(&temp_path)?;
    let props = WriterProperties::builder()
        .set_writer_version(WriterVersion::PARQUET_2_0)
        .set_compression(Compression::ZSTD(
            ZstdLevel::try_new(3).expect("valid zstd level"),
        ))
        .set_dictionary_enabled(true)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn column<'a, T: 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| StoreError::InvalidPartition(format!("chunk missing column {name}")))
}

/// Read every row of a compressed chunk.
pub fn read_chunk(path: &Path) -> Result<Vec<StoredEvent>, StoreError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let ids: &UInt64Array = column(&batch, "id")?;
        let timestamps: &TimestampMicrosecondArray = column(&batch, "timestamp")?;
        let kinds: &StringArray = column(&batch, "event_type")?;
        let services: &StringArray = column(&batch, "service")?;
        let actors: &StringArray = column(&batch, "actor_id")?;
        let payloads: &StringArray = column(&batch, "payload_json")?;

        for i in 0..batch.num_rows() {
            let timestamp = DateTime::from_timestamp_micros(timestamps.value(i))
                .ok_or_else(|| {
                    StoreError::InvalidPartition("timestamp out of range".to_string())
                })?;
            let actor_id = if actors.is_null(i) {
                None
            } else {
                Some(Uuid::parse_str(actors.value(i)).map_err(|e| {
                    StoreError::InvalidPartition(format!("bad actor id: {e}"))
                })?)
            };
            rows.push(StoredEvent {
                id: ids.value(i),
                timestamp,
                event_type: kinds.value(i).to_string(),
                service: services.value(i).to_string(),
                actor_id,
                payload: serde_json::from_str(payloads.value(i))?,
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn row(id: u64, kind: &str, service: &str, minute: u32) -> StoredEvent {
        StoredEvent {
            id,
            timestamp: Utc.with_ymd_and_hms(2026, 7, 20, 9, minute, 0).unwrap(),
            event_type: kind.to_string(),
            service: service.to_string(),
            actor_id: (id % 2 == 0).then(Uuid::new_v4),
            payload: json!({"duration_ms": id * 10}),
        }
    }

    #[test]
    fn chunk_round_trip_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.parquet");
        let mut rows = vec![
            row(1, "api_request", "gateway", 1),
            row(2, "api_request", "billing", 2),
            row(3, "task_created", "runner", 3),
        ];
        columnar_sort(&mut rows);
        write_chunk(&path, &rows).unwrap();

        let back = read_chunk(&path).unwrap();
        assert_eq!(back, rows);
        assert!(!path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn columnar_sort_groups_then_newest_first() {
        let mut rows = vec![
            row(1, "api_request", "gateway", 1),
            row(2, "api_request", "gateway", 5),
            row(3, "api_request", "billing", 3),
        ];
        columnar_sort(&mut rows);
        let order: Vec<(String, u64)> = rows
            .iter()
            .map(|r| (r.service.clone(), r.id))
            .collect();
        assert_eq!(
            order,
            vec![
                ("billing".to_string(), 3),
                ("gateway".to_string(), 2),
                ("gateway".to_string(), 1),
            ]
        );
    }

    #[test]
    fn empty_chunk_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.parquet");
        write_chunk(&path, &[]).unwrap();
        assert!(read_chunk(&path).unwrap().is_empty());
    }
}
