// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event storage configuration.
//!
//! Selects the backend (`memory` or `file`) and carries its tuning knobs.
//! Loading from a file is the embedding application's job; this module only
//! defines the serde surface and validation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid storage configuration: {0}")]
    Invalid(String),
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Bounded in-memory FIFO. Contents are lost on restart.
    Memory(MemoryStorageConfig),

    /// Segment-rotated write-ahead log on disk.
    File(FileStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory(MemoryStorageConfig::default())
    }
}

impl StorageConfig {
    /// Validate the selected backend's knobs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Memory(cfg) => cfg.validate(),
            Self::File(cfg) => cfg.validate(),
        }
    }
}

/// Tuning for the in-memory backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum queued events before `put` rejects new ones.
    #[serde(default = "default_max_records_count")]
    pub max_records_count: usize,

    /// Maximum events handed out per event pack.
    #[serde(default = "default_events_per_time")]
    pub events_per_time: usize,
}

fn default_max_records_count() -> usize {
    100_000
}

fn default_events_per_time() -> usize {
    100
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            max_records_count: default_max_records_count(),
            events_per_time: default_events_per_time(),
        }
    }
}

impl MemoryStorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_records_count == 0 {
            return Err(ConfigError::Invalid("max_records_count must be > 0".into()));
        }
        if self.events_per_time == 0 {
            return Err(ConfigError::Invalid("events_per_time must be > 0".into()));
        }
        Ok(())
    }
}

/// Tuning for the write-ahead-log backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding `data_<epochMs>.txt` segments and the cursor file.
    pub data_folder_path: PathBuf,

    /// Maximum number of segment files kept on disk; the oldest segment is
    /// deleted when a rotation would exceed this.
    #[serde(default = "default_max_file_count")]
    pub max_file_count: usize,

    /// Records per segment before rotating to a new file.
    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    /// Records written between fsyncs. Smaller = stronger durability,
    /// weaker throughput.
    #[serde(default = "default_max_records_between_fsync")]
    pub max_records_between_fsync: usize,

    /// Maximum records returned per event pack.
    #[serde(default = "default_max_read_records_count")]
    pub max_read_records_count: usize,

    /// Consumer sleep between polls when the queue is empty (milliseconds).
    #[serde(default = "default_no_records_sleep_interval_ms")]
    pub no_records_sleep_interval_ms: u64,
}

fn default_max_file_count() -> usize {
    10
}

fn default_max_records_per_file() -> usize {
    10_000
}

fn default_max_records_between_fsync() -> usize {
    300
}

fn default_max_read_records_count() -> usize {
    100
}

fn default_no_records_sleep_interval_ms() -> u64 {
    5_000
}

impl FileStorageConfig {
    /// Create a config with defaults for the given data directory.
    pub fn new<P: Into<PathBuf>>(data_folder_path: P) -> Self {
        Self {
            data_folder_path: data_folder_path.into(),
            max_file_count: default_max_file_count(),
            max_records_per_file: default_max_records_per_file(),
            max_records_between_fsync: default_max_records_between_fsync(),
            max_read_records_count: default_max_read_records_count(),
            no_records_sleep_interval_ms: default_no_records_sleep_interval_ms(),
        }
    }

    /// Set the segment file limit.
    pub fn max_file_count(mut self, count: usize) -> Self {
        self.max_file_count = count;
        self
    }

    /// Set the records-per-segment limit.
    pub fn max_records_per_file(mut self, count: usize) -> Self {
        self.max_records_per_file = count;
        self
    }

    /// Set the fsync cadence.
    pub fn max_records_between_fsync(mut self, count: usize) -> Self {
        self.max_records_between_fsync = count;
        self
    }

    /// Set the per-pack read limit.
    pub fn max_read_records_count(mut self, count: usize) -> Self {
        self.max_read_records_count = count;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_folder_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_folder_path must be set".into()));
        }
        if self.max_file_count == 0 {
            return Err(ConfigError::Invalid("max_file_count must be > 0".into()));
        }
        if self.max_records_per_file == 0 {
            return Err(ConfigError::Invalid(
                "max_records_per_file must be > 0".into(),
            ));
        }
        if self.max_records_between_fsync == 0 {
            return Err(ConfigError::Invalid(
                "max_records_between_fsync must be > 0".into(),
            ));
        }
        if self.max_read_records_count == 0 {
            return Err(ConfigError::Invalid(
                "max_read_records_count must be > 0".into(),
            ));
        }
        Ok(())
    }
}
