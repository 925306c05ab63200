// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event storage abstraction.
//!
//! Backend-agnostic interface between the pipeline writer (many producer
//! threads) and the delivery transport (one consumer loop).

use crate::config::{ConfigError, StorageConfig};
use crate::file::FileEventStorage;
use crate::memory::MemoryEventStorage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Storage errors surfaced at construction time. Runtime I/O failures are
/// handled inside the backends (logged, retried next cycle).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state file: {0}")]
    InvalidState(String),
}

/// Durable at-least-once event queue.
///
/// Producers `put` serialized events from any thread; a single consumer
/// pulls packs and acknowledges them after a confirmed send. A pack that is
/// pulled but not acknowledged is returned verbatim by every subsequent
/// `get_event_pack` call -- that is the retry mechanism.
pub trait EventStorage: Send + Sync {
    /// Enqueue one serialized event.
    ///
    /// Returns `false` when the event was rejected (queue full or the write
    /// failed); the caller must treat the event as dropped. Never blocks
    /// indefinitely.
    fn put(&self, event: String) -> bool;

    /// Return the current pending pack, filling it from the queue first if
    /// no pack is pending. Repeated calls without an acknowledgment return
    /// the same events.
    fn get_event_pack(&self) -> Vec<String>;

    /// Acknowledge the pending pack. The next `get_event_pack` draws fresh
    /// events.
    fn event_pack_processing_done(&self);

    /// Number of events accepted but not yet acknowledged.
    fn len(&self) -> usize;

    /// Whether no unacknowledged events remain.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How long the consumer should sleep before polling again when
    /// `get_event_pack` came back empty.
    fn empty_poll_interval(&self) -> Duration {
        Duration::from_millis(1_000)
    }

    /// Flush any buffered writes to durable storage. No-op for backends
    /// without a buffer; called on pipeline shutdown.
    fn flush(&self) {}
}

/// Build the storage backend selected by the configuration.
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn EventStorage>, StorageError> {
    config.validate()?;
    match config {
        StorageConfig::Memory(cfg) => Ok(Arc::new(MemoryEventStorage::new(cfg.clone()))),
        StorageConfig::File(cfg) => Ok(Arc::new(FileEventStorage::new(cfg.clone())?)),
    }
}
