// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded in-memory event queue.
//!
//! The cheapest backend: a FIFO of serialized events with a hard capacity.
//! `put` rejects new events when the queue is full -- bounded memory at the
//! cost of telemetry loss under sustained backpressure. That trade-off is
//! deliberate; deployments that cannot afford loss use the file backend.

use crate::config::MemoryStorageConfig;
use crate::storage::EventStorage;
use parking_lot::Mutex;
use std::collections::VecDeque;

struct Inner {
    queue: VecDeque<String>,
    pending: Vec<String>,
}

/// Bounded FIFO event storage. Contents do not survive a restart.
pub struct MemoryEventStorage {
    config: MemoryStorageConfig,
    inner: Mutex<Inner>,
}

impl MemoryEventStorage {
    /// Create a queue with the configured capacity and pack size.
    pub fn new(config: MemoryStorageConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(config.max_records_count.min(1_024)),
                pending: Vec::new(),
            }),
            config,
        }
    }
}

impl EventStorage for MemoryEventStorage {
    fn put(&self, event: String) -> bool {
        let mut inner = self.inner.lock();
        if inner.queue.len() >= self.config.max_records_count {
            return false;
        }
        inner.queue.push_back(event);
        true
    }

    fn get_event_pack(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            let count = self.config.events_per_time.min(inner.queue.len());
            let drained: Vec<String> = inner.queue.drain(..count).collect();
            inner.pending = drained;
        }
        inner.pending.clone()
    }

    fn event_pack_processing_done(&self) {
        self.inner.lock().pending.clear();
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.queue.len() + inner.pending.len()
    }
}
