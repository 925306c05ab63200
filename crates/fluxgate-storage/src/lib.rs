// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Durable event storage for the fluxgate gateway.
//!
//! A bounded queue between "filtered data ready to send" and "data delivered
//! to the platform", with at-least-once semantics: a pack of events pulled
//! with [`EventStorage::get_event_pack`] is re-delivered until the consumer
//! acknowledges it with [`EventStorage::event_pack_processing_done`].
//!
//! Two backends with two backpressure philosophies:
//!
//! - [`MemoryEventStorage`] -- bounded FIFO; rejects new events when full
//!   (bounded memory, telemetry loss under sustained backpressure).
//! - [`FileEventStorage`] -- segment-rotated write-ahead log; accepts all
//!   events and evicts the oldest segment when the file count limit is
//!   exceeded (bounded disk, unbounded acceptance). Survives restarts via a
//!   persisted read cursor.

pub mod config;
pub mod file;
pub mod memory;
pub mod storage;
pub mod throttle;

pub use config::{ConfigError, FileStorageConfig, MemoryStorageConfig, StorageConfig};
pub use file::FileEventStorage;
pub use memory::MemoryEventStorage;
pub use storage::{build_storage, EventStorage, StorageError};
pub use throttle::LogThrottle;
