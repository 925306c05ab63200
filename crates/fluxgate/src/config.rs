// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline configuration.
//!
//! The embedding application loads this from wherever it keeps its config;
//! this module only defines the serde surface, defaults and validation.

use crate::strategy::{ReportStrategy, StrategyError};
use fluxgate_storage::{ConfigError as StorageConfigError, StorageConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pipeline configuration: {0}")]
    Invalid(String),

    #[error("report strategy: {0}")]
    Strategy(#[from] StrategyError),

    #[error("storage: {0}")]
    Storage(#[from] StorageConfigError),
}

/// Tuning for the telemetry pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Process-wide default report strategy, used when neither the key nor
    /// the connector carries one.
    #[serde(default = "default_report_strategy")]
    pub default_report_strategy: ReportStrategy,

    /// Periodic reporting scan cadence while any key is registered (ms).
    #[serde(default = "default_scan_interval_ms")]
    pub periodic_scan_interval_ms: u64,

    /// Scan cadence while the periodic key set is empty (ms).
    #[serde(default = "default_idle_scan_interval_ms")]
    pub idle_scan_interval_ms: u64,

    /// Soft budget for one periodic pass; a slower pass logs a warning (ms).
    #[serde(default = "default_scan_budget_ms")]
    pub scan_budget_ms: u64,

    /// Cache cleanup thread wake interval (ms, sub-second).
    #[serde(default = "default_cache_cleanup_tick_ms")]
    pub cache_cleanup_tick_ms: u64,

    /// How often the cleanup thread actually sweeps expired records (ms).
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,

    /// Capacity of the outbound batch queue between the service and the
    /// storage writer.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Maximum serialized payload size handed to storage (bytes).
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Event storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_report_strategy() -> ReportStrategy {
    ReportStrategy::on_received()
}

fn default_scan_interval_ms() -> u64 {
    10
}

fn default_idle_scan_interval_ms() -> u64 {
    100
}

fn default_scan_budget_ms() -> u64 {
    100
}

fn default_cache_cleanup_tick_ms() -> u64 {
    500
}

fn default_cache_sweep_interval_ms() -> u64 {
    3_600_000
}

fn default_outbound_queue_capacity() -> usize {
    1_024
}

fn default_max_payload_bytes() -> usize {
    65_536
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_report_strategy: default_report_strategy(),
            periodic_scan_interval_ms: default_scan_interval_ms(),
            idle_scan_interval_ms: default_idle_scan_interval_ms(),
            scan_budget_ms: default_scan_budget_ms(),
            cache_cleanup_tick_ms: default_cache_cleanup_tick_ms(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_payload_bytes: default_max_payload_bytes(),
            storage: StorageConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate all knobs, failing fast on the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_report_strategy.validate()?;
        self.storage.validate()?;

        if self.periodic_scan_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "periodic_scan_interval_ms must be > 0".into(),
            ));
        }
        if self.idle_scan_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_scan_interval_ms must be > 0".into(),
            ));
        }
        if self.cache_cleanup_tick_ms == 0 || self.cache_cleanup_tick_ms >= 1_000 {
            return Err(ConfigError::Invalid(
                "cache_cleanup_tick_ms must be within (0, 1000)".into(),
            ));
        }
        if self.cache_sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "cache_sweep_interval_ms must be > 0".into(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be > 0".into(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid("max_payload_bytes must be > 0".into()));
        }
        Ok(())
    }
}
