// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage writer.
//!
//! Drains the service's outbound batch queue, splits every batch at the
//! configured payload budget, serializes the chunks and puts them into the
//! event storage. Rejected puts and unsplittable batches are logged with
//! device context and dropped -- the pipeline never blocks an adapter and
//! never enqueues a frame the transport cannot send.

use crate::config::PipelineConfig;
use crate::data::ConvertedData;
use crate::service::ReportStrategyService;
use crate::worker::{StopHandle, STOP_JOIN_TIMEOUT};
use crossbeam::channel::Receiver;
use crossbeam::select;
use fluxgate_storage::{EventStorage, LogThrottle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Minimum interval between repeated storage-rejection logs.
const REJECT_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct PipelineStats {
    batches: AtomicU64,
    chunks_stored: AtomicU64,
    datapoints_dropped: AtomicU64,
    split_failures: AtomicU64,
}

/// Point-in-time view of the writer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    /// Batches drained from the service.
    pub batches: u64,
    /// Chunks accepted by the storage.
    pub chunks_stored: u64,
    /// Datapoints lost to storage rejection or oversized payloads.
    pub datapoints_dropped: u64,
    /// Batches whose header alone exceeded the payload budget.
    pub split_failures: u64,
}

/// Wires the report strategy service to an event storage.
pub struct TelemetryPipeline {
    service: Arc<ReportStrategyService>,
    storage: Arc<dyn EventStorage>,
    max_payload_bytes: usize,
    stats: Arc<PipelineStats>,
    writer: Mutex<Option<StopHandle>>,
}

impl TelemetryPipeline {
    pub fn new(
        service: Arc<ReportStrategyService>,
        storage: Arc<dyn EventStorage>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            service,
            storage,
            max_payload_bytes: config.max_payload_bytes,
            stats: Arc::new(PipelineStats::default()),
            writer: Mutex::new(None),
        }
    }

    /// Start the writer worker. Idempotent.
    pub fn start(&self) -> std::io::Result<()> {
        let mut guard = self.writer.lock();
        if guard.is_some() {
            return Ok(());
        }
        let batches: Receiver<ConvertedData> = self.service.batches();
        let storage = Arc::clone(&self.storage);
        let stats = Arc::clone(&self.stats);
        let max_payload_bytes = self.max_payload_bytes;

        let handle = StopHandle::spawn("fluxgate-storage-writer", move |stop_rx| {
            let mut reject_throttle = LogThrottle::new(REJECT_LOG_INTERVAL);
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(batches) -> msg => match msg {
                        Ok(batch) => Self::store_batch(
                            &storage,
                            &stats,
                            max_payload_bytes,
                            batch,
                            &mut reject_throttle,
                        ),
                        Err(_) => break,
                    },
                }
            }
        })?;
        *guard = Some(handle);
        Ok(())
    }

    /// Stop the writer and flush buffered storage writes.
    pub fn stop(&self) {
        if let Some(mut handle) = self.writer.lock().take() {
            handle.stop(STOP_JOIN_TIMEOUT);
        }
        self.storage.flush();
    }

    /// The storage this pipeline writes into; the delivery consumer pulls
    /// event packs from it.
    pub fn storage(&self) -> &Arc<dyn EventStorage> {
        &self.storage
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            batches: self.stats.batches.load(Ordering::Relaxed),
            chunks_stored: self.stats.chunks_stored.load(Ordering::Relaxed),
            datapoints_dropped: self.stats.datapoints_dropped.load(Ordering::Relaxed),
            split_failures: self.stats.split_failures.load(Ordering::Relaxed),
        }
    }

    fn store_batch(
        storage: &Arc<dyn EventStorage>,
        stats: &PipelineStats,
        max_payload_bytes: usize,
        batch: ConvertedData,
        reject_throttle: &mut LogThrottle,
    ) {
        stats.batches.fetch_add(1, Ordering::Relaxed);

        let chunks = match batch.split_by_size(max_payload_bytes) {
            Ok(chunks) => chunks,
            Err(e) => {
                stats.split_failures.fetch_add(1, Ordering::Relaxed);
                let lost = batch.telemetry_datapoints_count() + batch.attributes_count();
                stats
                    .datapoints_dropped
                    .fetch_add(lost as u64, Ordering::Relaxed);
                tracing::error!("dropping batch for device '{}': {e}", batch.device_name);
                return;
            }
        };

        for chunk in chunks {
            let datapoints = chunk.telemetry_datapoints_count() + chunk.attributes_count();
            let payload = match chunk.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    stats
                        .datapoints_dropped
                        .fetch_add(datapoints as u64, Ordering::Relaxed);
                    tracing::error!(
                        "failed to serialize payload for device '{}': {e}",
                        chunk.device_name
                    );
                    continue;
                }
            };
            if storage.put(payload) {
                stats.chunks_stored.fetch_add(1, Ordering::Relaxed);
            } else {
                stats
                    .datapoints_dropped
                    .fetch_add(datapoints as u64, Ordering::Relaxed);
                if let Some(suppressed) = reject_throttle.ready() {
                    tracing::warn!(
                        "storage rejected payload for device '{}', {datapoints} datapoints \
                         dropped ({suppressed} earlier rejections suppressed)",
                        chunk.device_name
                    );
                }
            }
        }
    }
}
