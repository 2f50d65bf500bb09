//! Store configuration.

use crate::lifecycle::{CompressionPolicy, RetentionPolicy};
use crate::store::StoreError;
use crate::{DEFAULT_COMPRESS_AFTER_DAYS, DEFAULT_RETAIN_RAW_DAYS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the raw store and its lifecycle policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory holding `raw/` partitions and `rollups/` tables.
    pub data_dir: PathBuf,

    /// Age in days before an open partition is compressed.
    #[serde(default = "default_compress_after_days")]
    pub compress_after_days: u32,

    /// Age in days before a compressed partition is dropped.
    #[serde(default = "default_retain_raw_days")]
    pub retain_raw_days: u32,
}

fn default_compress_after_days() -> u32 {
    DEFAULT_COMPRESS_AFTER_DAYS
}

fn default_retain_raw_days() -> u32 {
    DEFAULT_RETAIN_RAW_DAYS
}

impl StoreConfig {
    /// Config with default lifecycle ages.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            compress_after_days: DEFAULT_COMPRESS_AFTER_DAYS,
            retain_raw_days: DEFAULT_RETAIN_RAW_DAYS,
        }
    }

    pub fn compression_policy(&self) -> CompressionPolicy {
        CompressionPolicy {
            after_days: self.compress_after_days,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            after_days: self.retain_raw_days,
        }
    }

    /// Validate cross-policy invariants.
    ///
    /// Retention must not outrun compression: a partition has to be
    /// superseded by its compressed chunk before it may be dropped.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.compress_after_days == 0 {
            return Err(StoreError::InvalidConfig(
                "compress_after_days must be at least 1".to_string(),
            ));
        }
        if self.retain_raw_days < self.compress_after_days {
            return Err(StoreError::InvalidConfig(format!(
                "retain_raw_days ({}) must be >= compress_after_days ({})",
                self.retain_raw_days, self.compress_after_days
            )));
        }
        Ok(())
    }
}

/// Default store location under the platform data dir.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidemark")
}
