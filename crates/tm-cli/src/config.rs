//! Pipeline configuration: TOML file + defaults + cross-invariant checks.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tm_rollup::{max_start_offset, standard_definitions, AggregateDef};
use tm_store::StoreConfig;

/// Errors from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(#[from] tm_store::StoreError),
}

/// Top-level configuration, one section per pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub service: ServiceSection,
    pub ingest: IngestSection,
    pub storage: StorageSection,
    pub rollup: RollupSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Service identity stamped on enriched events.
    pub name: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "tidemark".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            queue_capacity: tm_ingest::DEFAULT_QUEUE_CAPACITY,
            batch_size: tm_ingest::DEFAULT_BATCH_SIZE,
            flush_interval_secs: tm_ingest::DEFAULT_FLUSH_INTERVAL_SECS,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Store root; flag and env override, then this, then the platform
    /// data dir.
    pub data_dir: Option<PathBuf>,
    pub compress_after_days: Option<u32>,
    pub retain_raw_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupSection {
    pub refresh_interval_secs: u64,
    pub start_offset_hours: i64,
    pub end_offset_secs: i64,
}

impl Default for RollupSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: tm_rollup::DEFAULT_REFRESH_INTERVAL_SECS,
            start_offset_hours: tm_rollup::DEFAULT_START_OFFSET_HOURS,
            end_offset_secs: tm_rollup::DEFAULT_END_OFFSET_SECS,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Ok(toml::from_str(&std::fs::read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }

    /// Resolve the effective store configuration.
    pub fn store_config(&self, data_dir_override: Option<PathBuf>) -> StoreConfig {
        let data_dir = data_dir_override
            .or_else(|| self.storage.data_dir.clone())
            .unwrap_or_else(tm_store::default_data_dir);
        let mut config = StoreConfig::new(data_dir);
        if let Some(days) = self.storage.compress_after_days {
            config.compress_after_days = days;
        }
        if let Some(days) = self.storage.retain_raw_days {
            config.retain_raw_days = days;
        }
        config
    }

    /// Worker configuration for a hosting service's ingestion pipeline.
    pub fn worker_config(&self) -> tm_ingest::WorkerConfig {
        tm_ingest::WorkerConfig::default()
            .with_queue_capacity(self.ingest.queue_capacity)
            .with_batch_size(self.ingest.batch_size)
            .with_flush_interval(Duration::from_secs(self.ingest.flush_interval_secs))
            .with_retries(
                self.ingest.max_retries,
                Duration::from_millis(self.ingest.retry_backoff_ms),
            )
    }

    /// The aggregate catalog with configured window and cadence applied.
    pub fn definitions(&self) -> Vec<AggregateDef> {
        standard_definitions()
            .into_iter()
            .map(|def| {
                def.with_window(
                    chrono::Duration::hours(self.rollup.start_offset_hours),
                    chrono::Duration::seconds(self.rollup.end_offset_secs),
                )
                .with_schedule(Duration::from_secs(self.rollup.refresh_interval_secs))
            })
            .collect()
    }

    /// Cross-stage invariants; fatal at startup when violated.
    pub fn validate(&self, data_dir_override: Option<PathBuf>) -> Result<(), ConfigError> {
        let store = self.store_config(data_dir_override);
        store.validate()?;

        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.ingest.queue_capacity < self.ingest.batch_size {
            return Err(ConfigError::Invalid(format!(
                "queue_capacity ({}) must be >= batch_size ({})",
                self.ingest.queue_capacity, self.ingest.batch_size
            )));
        }
        if self.ingest.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_secs must be at least 1".into(),
            ));
        }

        // Compression must not freeze a partition that a refresh window
        // can still reach, or late rows would be lost to the rollups.
        let defs = self.definitions();
        let lookback = max_start_offset(&defs);
        let compress_secs = store.compress_after_days as i64 * 86_400;
        if compress_secs <= lookback.num_seconds() {
            return Err(ConfigError::Invalid(format!(
                "compress_after_days ({}d) must exceed the maximum aggregate lookback ({}h)",
                store.compress_after_days,
                lookback.num_hours()
            )));
        }
        Ok(())
    }
}
