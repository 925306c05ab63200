// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # fluxgate
//!
//! Core telemetry pipeline for an IoT protocol gateway.
//!
//! Protocol adapters (Modbus, MQTT, OPC-UA, BLE, CAN, ...) normalize device
//! updates into [`data::ConvertedData`] and hand them to the
//! [`ReportStrategyService`]. The service applies per-datapoint report
//! strategies (change filtering, periodic reporting, TTL-gated resend),
//! groups what passed into per-device batches, and the
//! [`TelemetryPipeline`] persists size-bounded payloads into an
//! [`fluxgate_storage::EventStorage`] for the delivery transport to drain
//! with at-least-once semantics.
//!
//! ```text
//! adapter -> ConvertedData -> ReportStrategyService -> EventStorage -> transport
//! ```
//!
//! The pipeline performs no network I/O itself; adapters and the delivery
//! transport are external collaborators.

pub mod cache;
pub mod config;
pub mod data;
pub mod service;
pub mod strategy;

mod pipeline;
mod worker;

pub use cache::{CacheKey, StrategyCache};
pub use config::{ConfigError, PipelineConfig};
pub use data::{ConvertedData, DatapointKey, TelemetryEntry};
pub use pipeline::{PipelineStatsSnapshot, TelemetryPipeline};
pub use service::ReportStrategyService;
pub use strategy::{AggregationFunction, ReportStrategy, ReportStrategyType, StrategyError};

// Re-export the storage surface so embedders need only one dependency.
pub use fluxgate_storage as storage;
