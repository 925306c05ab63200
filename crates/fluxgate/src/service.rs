// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report strategy service.
//!
//! The thread-safe sink protocol adapters produce into. Each datapoint of a
//! submitted update is run through the strategy cache; what passes is
//! regrouped per (connector, device) and pushed onto a bounded outbound
//! queue for the storage writer. A background worker delivers the
//! period-based strategies on their clocks even when no new data arrives.
//!
//! The effective strategy for a datapoint resolves key-level override ->
//! connector-level default -> process-wide default, in that order.
//! Unregistered connectors fall back to the process-wide default.

use crate::cache::{CacheKey, StrategyCache};
use crate::config::{ConfigError, PipelineConfig};
use crate::data::{now_ms, ConvertedData, DatapointKey};
use crate::strategy::{ReportStrategy, StrategyError};
use crate::worker::{StopHandle, STOP_JOIN_TIMEOUT};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-connector registration state.
#[derive(Debug, Clone)]
struct ConnectorRegistration {
    name: String,
    default_strategy: Option<ReportStrategy>,
}

/// Concurrent filtering sink between adapters and the storage writer.
///
/// Call [`start`](Self::start) to run the periodic reporting worker and the
/// cache eviction worker, and [`stop`](Self::stop) during shutdown for a
/// bounded, logged join. The workers share only the guarded key set and
/// cache map, so dropping the service also winds them down.
pub struct ReportStrategyService {
    cache: Arc<StrategyCache>,
    connectors: Mutex<HashMap<String, ConnectorRegistration>>,
    /// Keys under a period-based strategy, scanned by the worker.
    periodic: Arc<Mutex<HashSet<CacheKey>>>,
    default_strategy: ReportStrategy,
    scan_interval: Duration,
    idle_interval: Duration,
    scan_budget: Duration,
    batch_tx: Sender<ConvertedData>,
    batch_rx: Receiver<ConvertedData>,
    worker: Mutex<Option<StopHandle>>,
}

impl ReportStrategyService {
    /// Build a service from a validated configuration.
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (batch_tx, batch_rx) = bounded(config.outbound_queue_capacity);
        Ok(Self {
            cache: Arc::new(StrategyCache::new(
                Duration::from_millis(config.cache_cleanup_tick_ms),
                Duration::from_millis(config.cache_sweep_interval_ms),
            )),
            connectors: Mutex::new(HashMap::new()),
            periodic: Arc::new(Mutex::new(HashSet::new())),
            default_strategy: config.default_report_strategy.clone(),
            scan_interval: Duration::from_millis(config.periodic_scan_interval_ms),
            idle_interval: Duration::from_millis(config.idle_scan_interval_ms),
            scan_budget: Duration::from_millis(config.scan_budget_ms),
            batch_tx,
            batch_rx,
            worker: Mutex::new(None),
        })
    }

    /// Receiver for emission-ready batches. The storage writer holds one
    /// clone; tests may hold another.
    pub fn batches(&self) -> Receiver<ConvertedData> {
        self.batch_rx.clone()
    }

    /// The strategy cache owned by this service.
    pub fn cache(&self) -> &Arc<StrategyCache> {
        &self.cache
    }

    /// Number of keys currently registered for periodic reporting.
    pub fn periodic_key_count(&self) -> usize {
        self.periodic.lock().len()
    }

    /// Register a connector, optionally with a connector-level default
    /// strategy. Fails fast on an invalid strategy.
    pub fn register_connector(
        &self,
        connector_id: &str,
        name: &str,
        default_strategy: Option<ReportStrategy>,
    ) -> Result<(), StrategyError> {
        if let Some(strategy) = &default_strategy {
            strategy.validate()?;
        }
        self.connectors.lock().insert(
            connector_id.to_string(),
            ConnectorRegistration {
                name: name.to_string(),
                default_strategy,
            },
        );
        tracing::info!("registered connector '{name}' ({connector_id})");
        Ok(())
    }

    /// Unregister a connector and purge its cache records, periodic-set
    /// entries and policy registration. Skipping this on disconnect leaks
    /// both the cache and the periodic set.
    pub fn remove_connector(&self, connector_id: &str) {
        let registration = self.connectors.lock().remove(connector_id);
        let removed = self.cache.remove_connector(connector_id);
        self.periodic
            .lock()
            .retain(|key| key.connector_id != connector_id);
        if let Some(registration) = registration {
            tracing::info!(
                "removed connector '{}' ({connector_id}), {removed} cached datapoints purged",
                registration.name
            );
        }
    }

    /// Purge one device of one connector (e.g. on device disconnect).
    pub fn remove_device(&self, connector_id: &str, device_name: &str) {
        let removed = self.cache.remove_device(connector_id, device_name);
        self.periodic.lock().retain(|key| {
            key.connector_id != connector_id || key.device_name != device_name
        });
        if removed > 0 {
            tracing::debug!(
                "purged {removed} cached datapoints of device '{device_name}' ({connector_id})"
            );
        }
    }

    /// Submit one normalized device update. Datapoints that pass their
    /// strategy are regrouped into a batch and queued for storage.
    pub fn submit(&self, connector_id: &str, data: ConvertedData) {
        let connector_default = self.connector_default(connector_id);
        let now = now_ms();

        let mut out = ConvertedData::new(&data.device_name, &data.device_type);
        for (key, value) in data.metadata() {
            out.add_metadata(key.clone(), value.clone());
        }

        for entry in data.telemetry() {
            for (key, value) in &entry.values {
                self.process_datapoint(
                    connector_id,
                    connector_default.as_ref(),
                    &data.device_name,
                    &data.device_type,
                    key,
                    value,
                    Some(entry.ts),
                    now,
                    &mut out,
                );
            }
        }
        for (key, value) in data.attributes() {
            self.process_datapoint(
                connector_id,
                connector_default.as_ref(),
                &data.device_name,
                &data.device_type,
                key,
                value,
                None,
                now,
                &mut out,
            );
        }

        if !out.is_empty() {
            self.dispatch(out);
        }
    }

    /// Lower-level single-datapoint form of [`submit`](Self::submit).
    /// `ts = None` marks an attribute.
    pub fn submit_datapoint(
        &self,
        connector_id: &str,
        device_name: &str,
        device_type: &str,
        key: DatapointKey,
        value: Value,
        ts: Option<u64>,
    ) {
        let connector_default = self.connector_default(connector_id);
        let now = now_ms();
        let mut out = ConvertedData::new(device_name, device_type);
        self.process_datapoint(
            connector_id,
            connector_default.as_ref(),
            device_name,
            device_type,
            &key,
            &value,
            ts,
            now,
            &mut out,
        );
        if !out.is_empty() {
            self.dispatch(out);
        }
    }

    /// Start the periodic reporting worker and the cache eviction worker.
    /// Idempotent.
    pub fn start(&self) -> std::io::Result<()> {
        self.cache.start_cleaner()?;

        let mut guard = self.worker.lock();
        if guard.is_some() {
            return Ok(());
        }
        let cache = Arc::clone(&self.cache);
        let periodic = Arc::clone(&self.periodic);
        let batch_tx = self.batch_tx.clone();
        let scan_interval = self.scan_interval;
        let idle_interval = self.idle_interval;
        let scan_budget = self.scan_budget;

        let handle = StopHandle::spawn("fluxgate-periodic-report", move |stop_rx| loop {
            let interval = if periodic.lock().is_empty() {
                idle_interval
            } else {
                scan_interval
            };
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    Self::run_periodic_pass(&cache, &periodic, &batch_tx, scan_budget);
                }
            }
        })?;
        *guard = Some(handle);
        Ok(())
    }

    /// Stop both workers (bounded wait each, logged on timeout).
    pub fn stop(&self) {
        if let Some(mut handle) = self.worker.lock().take() {
            handle.stop(STOP_JOIN_TIMEOUT);
        }
        self.cache.stop_cleaner();
    }

    fn connector_default(&self, connector_id: &str) -> Option<ReportStrategy> {
        self.connectors
            .lock()
            .get(connector_id)
            .and_then(|registration| registration.default_strategy.clone())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_datapoint(
        &self,
        connector_id: &str,
        connector_default: Option<&ReportStrategy>,
        device_name: &str,
        device_type: &str,
        key: &DatapointKey,
        value: &Value,
        ts: Option<u64>,
        now: u64,
        out: &mut ConvertedData,
    ) {
        let strategy = key
            .strategy
            .as_ref()
            .or(connector_default)
            .unwrap_or(&self.default_strategy);

        let cache_key = CacheKey::new(key.clone(), device_name, connector_id);
        let observation = self
            .cache
            .observe(&cache_key, device_type, value, ts, strategy, now);

        if observation.created && strategy.report_type.is_period_based() {
            self.periodic.lock().insert(cache_key);
        }
        if observation.report {
            match ts {
                Some(ts) => out.add_telemetry_datapoint(Some(ts), key.clone(), value.clone()),
                None => out.add_attribute(key.clone(), value.clone()),
            }
        }
    }

    /// One pass of the periodic reporting loop: collect due records,
    /// regroup them per (connector, device) and queue the batches.
    fn periodic_pass(&self) {
        Self::run_periodic_pass(&self.cache, &self.periodic, &self.batch_tx, self.scan_budget);
    }

    fn run_periodic_pass(
        cache: &StrategyCache,
        periodic: &Mutex<HashSet<CacheKey>>,
        batch_tx: &Sender<ConvertedData>,
        scan_budget: Duration,
    ) {
        let started = Instant::now();
        let now = now_ms();

        let keys: Vec<CacheKey> = periodic.lock().iter().cloned().collect();
        if keys.is_empty() {
            return;
        }
        let scan = cache.collect_periodic_due(keys, now);

        if !scan.missing.is_empty() {
            // A registered key without a backing record means registration
            // and cache went out of sync -- a bug, not an operational
            // condition. Drop the keys so the loop stays healthy.
            {
                let mut periodic = periodic.lock();
                for key in &scan.missing {
                    periodic.remove(key);
                }
            }
            tracing::error!(
                "{} periodic keys had no cache record and were dropped (first: '{}' of device '{}')",
                scan.missing.len(),
                scan.missing[0].datapoint,
                scan.missing[0].device_name
            );
        }

        let mut batches: HashMap<(String, String), ConvertedData> = HashMap::new();
        for sample in scan.due {
            let batch = batches
                .entry((
                    sample.key.connector_id.clone(),
                    sample.key.device_name.clone(),
                ))
                .or_insert_with(|| {
                    ConvertedData::new(&sample.key.device_name, &sample.device_type)
                });
            match sample.ts {
                Some(ts) => {
                    batch.add_telemetry_datapoint(Some(ts), sample.key.datapoint, sample.value);
                }
                None => batch.add_attribute(sample.key.datapoint, sample.value),
            }
        }
        for (_, batch) in batches {
            Self::dispatch_to(batch_tx, batch);
        }

        let elapsed = started.elapsed();
        if elapsed > scan_budget {
            tracing::warn!(
                "periodic report pass took {elapsed:?} (budget {scan_budget:?}); \
                 key set or cache outgrew the polling cadence"
            );
        }
    }

    fn dispatch(&self, batch: ConvertedData) {
        Self::dispatch_to(&self.batch_tx, batch);
    }

    fn dispatch_to(batch_tx: &Sender<ConvertedData>, batch: ConvertedData) {
        match batch_tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                tracing::warn!(
                    "outbound queue full, dropping batch of {} datapoints for device '{}'",
                    batch.telemetry_datapoints_count() + batch.attributes_count(),
                    batch.device_name
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("outbound queue disconnected, dropping batch");
            }
        }
    }
}
