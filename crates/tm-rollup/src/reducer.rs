//! Reducers and row filters.
//!
//! A reducer maps the raw rows of one (bucket, group) cell to a single
//! value. Every reducer ignores rows whose input field is null or
//! missing: a task without a duration contributes nothing to the mean.

use serde_json::Value;
use std::collections::HashSet;
use tm_store::StoredEvent;

/// Reference to a scalar input on a stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    EventType,
    Service,
    ActorId,
    /// A declared key of the open payload.
    Payload(String),
}

impl FieldRef {
    pub fn payload(key: impl Into<String>) -> Self {
        FieldRef::Payload(key.into())
    }

    /// Column name used for group-key output.
    pub fn name(&self) -> &str {
        match self {
            FieldRef::EventType => "event_type",
            FieldRef::Service => "service",
            FieldRef::ActorId => "actor_id",
            FieldRef::Payload(key) => key,
        }
    }

    /// Extract the field; `None` for missing or null values.
    pub fn extract(&self, row: &StoredEvent) -> Option<Value> {
        match self {
            FieldRef::EventType => Some(Value::String(row.event_type.clone())),
            FieldRef::Service => Some(Value::String(row.service.clone())),
            FieldRef::ActorId => row.actor_id.map(|a| Value::String(a.to_string())),
            FieldRef::Payload(key) => row
                .payload_field(key)
                .filter(|v| !v.is_null())
                .cloned(),
        }
    }

    /// Canonical string form used for grouping and distinct counting.
    pub fn extract_key(&self, row: &StoredEvent) -> Option<String> {
        self.extract(row).map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    fn extract_f64(&self, row: &StoredEvent) -> Option<f64> {
        self.extract(row).and_then(|v| v.as_f64())
    }
}

/// Predicate over stored events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Matching event kinds; empty matches every kind.
    pub kinds: Vec<String>,
    /// Payload fields that must equal the given scalar.
    pub payload_equals: Vec<(String, Value)>,
    /// Numeric payload fields that must be at least the given value.
    pub payload_at_least: Vec<(String, f64)>,
}

impl Filter {
    /// Matches every row.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kinds: vec![kind.into()],
            ..Self::default()
        }
    }

    pub fn kinds<I: IntoIterator<Item = S>, S: Into<String>>(kinds: I) -> Self {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn payload_equals(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload_equals.push((key.into(), value));
        self
    }

    pub fn payload_at_least(mut self, key: impl Into<String>, min: f64) -> Self {
        self.payload_at_least.push((key.into(), min));
        self
    }

    pub fn matches(&self, row: &StoredEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k == &row.event_type) {
            return false;
        }
        for (key, expected) in &self.payload_equals {
            if row.payload_field(key) != Some(expected) {
                return false;
            }
        }
        for (key, min) in &self.payload_at_least {
            match row.payload_field(key).and_then(Value::as_f64) {
                Some(actual) if actual >= *min => {}
                _ => return false,
            }
        }
        true
    }
}

/// Aggregation function over one cell's rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    /// Row count.
    Count,
    /// Count of rows matching an additional predicate.
    CountWhere(Filter),
    /// Cardinality of a field across the cell.
    DistinctCount(FieldRef),
    /// Arithmetic mean of a numeric field.
    Mean(FieldRef),
    /// Nearest-rank percentile (0 < q <= 1) of a numeric field.
    Percentile(FieldRef, f64),
    /// First non-missing value ordered by (timestamp, id) ascending.
    FirstValue(FieldRef),
}

impl Reducer {
    /// Evaluate over rows already ordered by (timestamp, id) ascending.
    pub fn evaluate(&self, rows: &[&StoredEvent]) -> Value {
        match self {
            Reducer::Count => Value::from(rows.len() as u64),
            Reducer::CountWhere(filter) => {
                Value::from(rows.iter().filter(|r| filter.matches(r)).count() as u64)
            }
            Reducer::DistinctCount(field) => {
                let distinct: HashSet<String> =
                    rows.iter().filter_map(|r| field.extract_key(r)).collect();
                Value::from(distinct.len() as u64)
            }
            Reducer::Mean(field) => {
                let values: Vec<f64> = rows.iter().filter_map(|r| field.extract_f64(r)).collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    let mean = values.iter().sum::<f64>() / values.len() as f64;
                    Value::from(mean)
                }
            }
            Reducer::Percentile(field, quantile) => {
                let mut values: Vec<f64> =
                    rows.iter().filter_map(|r| field.extract_f64(r)).collect();
                if values.is_empty() {
                    return Value::Null;
                }
                values.sort_by(f64::total_cmp);
                Value::from(nearest_rank(&values, *quantile))
            }
            Reducer::FirstValue(field) => rows
                .iter()
                .find_map(|r| field.extract(r))
                .unwrap_or(Value::Null),
        }
    }
}

/// Nearest-rank order statistic: the ceil(q * n)-th smallest value.
fn nearest_rank(sorted: &[f64], quantile: f64) -> f64 {
    let n = sorted.len();
    let rank = (quantile * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}
