// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report strategy cache.
//!
//! Per-(datapoint, device, connector) store of the last observed value, the
//! effective strategy, the last report time and an expiry stamp. The
//! filtering decision table lives here as an exhaustive match over the
//! closed strategy enum; the service drives it and handles batching.
//!
//! One process-wide mutex guards the map. Every read, write and eviction
//! takes it -- a background cleanup thread concurrently removes expired
//! records, so reads outside the lock are not permitted. The lock covers
//! map operations only; no logging or serialization happens under it.

use crate::data::{now_ms, DatapointKey};
use crate::strategy::{ReportStrategy, ReportStrategyType};
use crate::worker::{StopHandle, STOP_JOIN_TIMEOUT};
use crossbeam::channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scheduler-jitter grace applied to period checks, so a periodic scan
/// landing just short of the boundary still fires.
pub(crate) const REPORT_PERIOD_GRACE_MS: u64 = 50;

/// Cache identity of one datapoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub datapoint: DatapointKey,
    pub device_name: String,
    pub connector_id: String,
}

impl CacheKey {
    pub fn new(
        datapoint: DatapointKey,
        device_name: impl Into<String>,
        connector_id: impl Into<String>,
    ) -> Self {
        Self {
            datapoint,
            device_name: device_name.into(),
            connector_id: connector_id.into(),
        }
    }
}

/// One cached datapoint record.
#[derive(Debug, Clone)]
struct CachedDatapoint {
    value: Value,
    /// Telemetry timestamp; `None` for attributes.
    ts: Option<u64>,
    device_type: String,
    strategy: ReportStrategy,
    last_report_ts: u64,
    expires_at: Option<u64>,
}

impl CachedDatapoint {
    /// Whether a period-based record is due: never reported, or the period
    /// (minus grace) has elapsed since the last report.
    fn should_report_by_period(&self, now: u64) -> bool {
        if !self.strategy.report_type.is_period_based() {
            return false;
        }
        let Some(period) = self.strategy.report_period else {
            return false;
        };
        self.last_report_ts == 0
            || now.saturating_sub(self.last_report_ts) + REPORT_PERIOD_GRACE_MS >= period
    }

    fn refresh(&mut self, value: &Value, ts: Option<u64>, strategy: &ReportStrategy, now: u64) {
        self.value = value.clone();
        self.ts = ts;
        if self.strategy != *strategy {
            self.strategy = strategy.clone();
        }
        self.expires_at = strategy.effective_ttl_ms().map(|ttl| now + ttl);
    }
}

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Emit the value now.
    pub report: bool,
    /// A record was newly inserted (first observation of this identity).
    pub created: bool,
}

/// One value collected by a periodic scan.
#[derive(Debug, Clone)]
pub struct PeriodicSample {
    pub key: CacheKey,
    pub device_type: String,
    pub value: Value,
    pub ts: Option<u64>,
}

/// Result of a periodic scan over the registered key set.
#[derive(Debug, Default)]
pub struct PeriodicScan {
    pub due: Vec<PeriodicSample>,
    /// Keys registered for periodic reporting with no backing record --
    /// an internal invariant violation the caller must log and drop.
    pub missing: Vec<CacheKey>,
}

/// Mutex-guarded strategy cache with a background TTL eviction worker.
///
/// The eviction worker shares only the guarded map with the cache, so
/// dropping the cache stops the worker (bounded wait via the stop handle).
pub struct StrategyCache {
    entries: Arc<Mutex<HashMap<CacheKey, CachedDatapoint>>>,
    cleanup_tick: Duration,
    sweep_interval: Duration,
    cleaner: Mutex<Option<StopHandle>>,
}

impl StrategyCache {
    /// Create a cache. `cleanup_tick` is the cleaner wake interval
    /// (sub-second), `sweep_interval` how often it actually sweeps.
    pub fn new(cleanup_tick: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            cleanup_tick,
            sweep_interval,
            cleaner: Mutex::new(None),
        }
    }

    /// Run one value through the decision table, mutating the record as the
    /// table prescribes.
    pub fn observe(
        &self,
        key: &CacheKey,
        device_type: &str,
        value: &Value,
        ts: Option<u64>,
        strategy: &ReportStrategy,
        now: u64,
    ) -> Observation {
        let mut entries = self.entries.lock();
        let record = match entries.entry(key.clone()) {
            Entry::Vacant(slot) => {
                // First observation is always reported.
                slot.insert(CachedDatapoint {
                    value: value.clone(),
                    ts,
                    device_type: device_type.to_string(),
                    strategy: strategy.clone(),
                    last_report_ts: now,
                    expires_at: strategy.effective_ttl_ms().map(|ttl| now + ttl),
                });
                return Observation {
                    report: true,
                    created: true,
                };
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let changed = record.value != *value;
        let report = match strategy.report_type {
            // Always reported, unconditionally; the record only tracks the
            // latest observation.
            ReportStrategyType::OnReceived => {
                record.refresh(value, ts, strategy, now);
                true
            }
            ReportStrategyType::OnChange => {
                if changed {
                    record.refresh(value, ts, strategy, now);
                    record.last_report_ts = now;
                    true
                } else {
                    false
                }
            }
            ReportStrategyType::OnReportPeriod => {
                if changed {
                    // Defer: the periodic scan will carry this value.
                    record.refresh(value, ts, strategy, now);
                }
                false
            }
            ReportStrategyType::OnChangeOrReportPeriod => {
                if changed {
                    record.refresh(value, ts, strategy, now);
                    // Change-triggered emission resets the clock so the
                    // next periodic report is not immediate.
                    record.last_report_ts = now;
                    true
                } else {
                    false
                }
            }
        };
        Observation {
            report,
            created: false,
        }
    }

    /// Collect and re-stamp all records due for a periodic report.
    pub fn collect_periodic_due<I>(&self, keys: I, now: u64) -> PeriodicScan
    where
        I: IntoIterator<Item = CacheKey>,
    {
        let mut scan = PeriodicScan::default();
        let mut entries = self.entries.lock();
        for key in keys {
            match entries.get_mut(&key) {
                Some(record) if record.should_report_by_period(now) => {
                    record.last_report_ts = now;
                    scan.due.push(PeriodicSample {
                        device_type: record.device_type.clone(),
                        value: record.value.clone(),
                        ts: record.ts,
                        key,
                    });
                }
                Some(_) => {}
                None => scan.missing.push(key),
            }
        }
        scan
    }

    /// Remove every expired record. `ON_RECEIVED` records are exempt: they
    /// never suppress anything, so eviction only bounds their memory and a
    /// sweep that skips them stays correct.
    pub fn sweep_expired(&self, now: u64) -> usize {
        Self::sweep_map(&self.entries, now)
    }

    fn sweep_map(entries: &Mutex<HashMap<CacheKey, CachedDatapoint>>, now: u64) -> usize {
        let mut entries = entries.lock();
        let before = entries.len();
        entries.retain(|_, record| {
            record.strategy.report_type == ReportStrategyType::OnReceived
                || record.expires_at.is_none_or(|expires_at| expires_at > now)
        });
        before - entries.len()
    }

    /// Purge all records of one connector (e.g. on disconnect).
    pub fn remove_connector(&self, connector_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.connector_id != connector_id);
        before - entries.len()
    }

    /// Purge all records of one device of one connector.
    pub fn remove_device(&self, connector_id: &str, device_name: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| {
            key.connector_id != connector_id || key.device_name != device_name
        });
        before - entries.len()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Start the eviction worker. Idempotent.
    pub fn start_cleaner(&self) -> std::io::Result<()> {
        let mut guard = self.cleaner.lock();
        if guard.is_some() {
            return Ok(());
        }
        let entries = Arc::clone(&self.entries);
        let tick = self.cleanup_tick;
        let sweep_interval = self.sweep_interval;
        let handle = StopHandle::spawn("fluxgate-cache-cleaner", move |stop_rx| {
            let mut last_sweep = Instant::now();
            loop {
                match stop_rx.recv_timeout(tick) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if last_sweep.elapsed() >= sweep_interval {
                    last_sweep = Instant::now();
                    let removed = Self::sweep_map(&entries, now_ms());
                    if removed > 0 {
                        tracing::debug!("evicted {removed} expired cache records");
                    }
                }
            }
        })?;
        *guard = Some(handle);
        Ok(())
    }

    /// Stop the eviction worker (bounded wait, logged on timeout).
    pub fn stop_cleaner(&self) {
        if let Some(mut handle) = self.cleaner.lock().take() {
            handle.stop(STOP_JOIN_TIMEOUT);
        }
    }
}
