//! Aggregate definitions and the production catalog.

use crate::reducer::{FieldRef, Filter, Reducer};
use crate::{DEFAULT_END_OFFSET_SECS, DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_START_OFFSET_HOURS};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde_json::json;

/// Width of the time bucket rows are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketWidth {
    Hour,
    Day,
}

impl BucketWidth {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketWidth::Hour => "hour",
            BucketWidth::Day => "day",
        }
    }

    /// Truncate a timestamp to the start of its bucket.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let time = match self {
            BucketWidth::Hour => {
                NaiveTime::from_hms_opt(ts.hour(), 0, 0).expect("valid hour")
            }
            BucketWidth::Day => NaiveTime::MIN,
        };
        ts.date_naive().and_time(time).and_utc()
    }
}

/// One continuous aggregate: bucket width, grouping key, filter, named
/// reducers, and its refresh window/cadence.
#[derive(Debug, Clone)]
pub struct AggregateDef {
    pub name: String,
    pub bucket: BucketWidth,
    /// Grouping key; empty groups the whole bucket into one row. Rows
    /// missing a grouping field are excluded from that aggregate.
    pub group_by: Vec<FieldRef>,
    pub filter: Filter,
    /// Named reducer outputs, one table column each.
    pub reducers: Vec<(String, Reducer)>,
    /// How far behind "now" a refresh starts recomputing.
    pub start_offset: Duration,
    /// Gap left before "now" so in-flight rows are never aggregated.
    pub end_offset: Duration,
    /// Cadence of the scheduled refresh job.
    pub schedule_interval: std::time::Duration,
}

impl AggregateDef {
    pub fn new(name: impl Into<String>, bucket: BucketWidth, filter: Filter) -> Self {
        Self {
            name: name.into(),
            bucket,
            group_by: Vec::new(),
            filter,
            reducers: Vec::new(),
            start_offset: Duration::hours(DEFAULT_START_OFFSET_HOURS),
            end_offset: Duration::seconds(DEFAULT_END_OFFSET_SECS),
            schedule_interval: std::time::Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }

    pub fn group_by(mut self, field: FieldRef) -> Self {
        self.group_by.push(field);
        self
    }

    pub fn reduce(mut self, name: impl Into<String>, reducer: Reducer) -> Self {
        self.reducers.push((name.into(), reducer));
        self
    }

    pub fn with_window(mut self, start_offset: Duration, end_offset: Duration) -> Self {
        self.start_offset = start_offset;
        self.end_offset = end_offset;
        self
    }

    pub fn with_schedule(mut self, interval: std::time::Duration) -> Self {
        self.schedule_interval = interval;
        self
    }
}

/// Largest lookback over a set of definitions; the compression age must
/// exceed this so rollups never lose late data to a frozen chunk.
pub fn max_start_offset(defs: &[AggregateDef]) -> Duration {
    defs.iter()
        .map(|d| d.start_offset)
        .max()
        .unwrap_or_else(Duration::zero)
}

/// The seven production aggregate definitions.
///
/// All run hourly over a 3-day lookback; bucket width is hourly for
/// near-real-time dashboards and daily for trend views.
pub fn standard_definitions() -> Vec<AggregateDef> {
    vec![
        AggregateDef::new(
            "logins_hourly",
            BucketWidth::Hour,
            Filter::kind("auth_login_attempt"),
        )
        .reduce("count", Reducer::Count)
        .reduce(
            "succeeded",
            Reducer::CountWhere(Filter::any().payload_equals("success", json!(true))),
        )
        .reduce("distinct_actors", Reducer::DistinctCount(FieldRef::ActorId))
        .reduce("first_error", Reducer::FirstValue(FieldRef::payload("error"))),
        AggregateDef::new(
            "task_runs_hourly",
            BucketWidth::Hour,
            Filter::kinds(["task_completed", "task_failed"]),
        )
        .reduce("count", Reducer::Count)
        .reduce("failed", Reducer::CountWhere(Filter::kind("task_failed")))
        .reduce(
            "duration_ms_mean",
            Reducer::Mean(FieldRef::payload("duration_ms")),
        )
        .reduce(
            "duration_ms_p50",
            Reducer::Percentile(FieldRef::payload("duration_ms"), 0.50),
        )
        .reduce(
            "duration_ms_p95",
            Reducer::Percentile(FieldRef::payload("duration_ms"), 0.95),
        )
        .reduce(
            "duration_ms_p99",
            Reducer::Percentile(FieldRef::payload("duration_ms"), 0.99),
        ),
        AggregateDef::new(
            "task_runs_daily",
            BucketWidth::Day,
            Filter::kinds(["task_completed", "task_failed", "task_cancelled"]),
        )
        .reduce("count", Reducer::Count)
        .reduce(
            "completed",
            Reducer::CountWhere(Filter::kind("task_completed")),
        )
        .reduce("failed", Reducer::CountWhere(Filter::kind("task_failed")))
        .reduce("distinct_actors", Reducer::DistinctCount(FieldRef::ActorId)),
        AggregateDef::new(
            "api_requests_hourly",
            BucketWidth::Hour,
            Filter::kind("api_request"),
        )
        .group_by(FieldRef::Service)
        .reduce("count", Reducer::Count)
        .reduce(
            "server_errors",
            Reducer::CountWhere(Filter::any().payload_at_least("status_code", 500.0)),
        )
        .reduce(
            "duration_ms_mean",
            Reducer::Mean(FieldRef::payload("duration_ms")),
        )
        .reduce(
            "duration_ms_p95",
            Reducer::Percentile(FieldRef::payload("duration_ms"), 0.95),
        )
        .reduce(
            "duration_ms_p99",
            Reducer::Percentile(FieldRef::payload("duration_ms"), 0.99),
        ),
        AggregateDef::new(
            "integrations_daily",
            BucketWidth::Day,
            Filter::kinds([
                "integration_connected",
                "integration_disconnected",
                "integration_used",
                "integration_error",
            ]),
        )
        .group_by(FieldRef::payload("provider"))
        .reduce("count", Reducer::Count)
        .reduce(
            "errors",
            Reducer::CountWhere(Filter::kind("integration_error")),
        )
        .reduce("distinct_actors", Reducer::DistinctCount(FieldRef::ActorId)),
        AggregateDef::new(
            "errors_hourly",
            BucketWidth::Hour,
            Filter::kind("application_error"),
        )
        .group_by(FieldRef::Service)
        .reduce("count", Reducer::Count)
        .reduce("distinct_actors", Reducer::DistinctCount(FieldRef::ActorId))
        .reduce(
            "first_message",
            Reducer::FirstValue(FieldRef::payload("error_message")),
        ),
        AggregateDef::new("active_actors_daily", BucketWidth::Day, Filter::any())
            .reduce("events", Reducer::Count)
            .reduce("distinct_actors", Reducer::DistinctCount(FieldRef::ActorId)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn hour_and_day_truncation() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 14, 37, 21).unwrap();
        assert_eq!(
            BucketWidth::Hour.truncate(ts),
            Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap()
        );
        assert_eq!(
            BucketWidth::Day.truncate(ts),
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn catalog_has_seven_unique_definitions() {
        let defs = standard_definitions();
        assert_eq!(defs.len(), 7);
        let names: HashSet<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn catalog_windows_are_uniform() {
        for def in standard_definitions() {
            assert_eq!(def.start_offset, Duration::hours(72), "{}", def.name);
            assert_eq!(def.end_offset, Duration::seconds(300), "{}", def.name);
            assert_eq!(
                def.schedule_interval,
                std::time::Duration::from_secs(3600),
                "{}",
                def.name
            );
            assert!(!def.reducers.is_empty(), "{}", def.name);
        }
    }

    #[test]
    fn max_start_offset_spans_the_catalog() {
        let defs = standard_definitions();
        assert_eq!(max_start_offset(&defs), Duration::hours(72));
        assert_eq!(max_start_offset(&[]), Duration::zero());
    }
}
