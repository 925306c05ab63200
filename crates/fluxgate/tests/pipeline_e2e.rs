// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! End-to-end pipeline tests: adapter -> service -> storage, with the
//! background workers running on real clocks.

use fluxgate::data::{ConvertedData, DatapointKey};
use fluxgate::storage::{build_storage, EventStorage, MemoryStorageConfig, StorageConfig};
use fluxgate::{PipelineConfig, ReportStrategy, ReportStrategyService, TelemetryPipeline};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct TestPipeline {
    service: Arc<ReportStrategyService>,
    pipeline: TelemetryPipeline,
}

impl TestPipeline {
    fn start() -> Self {
        let config = PipelineConfig {
            default_report_strategy: ReportStrategy::on_change(),
            storage: StorageConfig::Memory(MemoryStorageConfig {
                max_records_count: 1_000,
                events_per_time: 100,
            }),
            ..Default::default()
        };
        let service = Arc::new(ReportStrategyService::new(&config).expect("service"));
        let storage = build_storage(&config.storage).expect("storage");
        let pipeline = TelemetryPipeline::new(Arc::clone(&service), storage, &config);
        service.start().expect("service start");
        pipeline.start().expect("pipeline start");
        Self { service, pipeline }
    }

    fn submit(&self, key: &DatapointKey, value: serde_json::Value) {
        let mut data = ConvertedData::new("sensor-1", "temperature-sensor");
        data.add_telemetry_datapoint(None, key.clone(), value);
        self.service.submit("conn-1", data);
    }

    /// Drain everything currently in storage; each payload's telemetry
    /// values for `key` are collected in order.
    fn drain_values(&self, key: &str) -> Vec<serde_json::Value> {
        let storage = self.pipeline.storage();
        let mut values = Vec::new();
        loop {
            let pack = storage.get_event_pack();
            if pack.is_empty() {
                return values;
            }
            for payload in &pack {
                let wire: serde_json::Value = serde_json::from_str(payload).expect("payload json");
                for entry in wire["telemetry"].as_array().expect("telemetry") {
                    if let Some(value) = entry["values"].get(key) {
                        values.push(value.clone());
                    }
                }
            }
            storage.event_pack_processing_done();
        }
    }

    fn stop(&self) {
        self.pipeline.stop();
        self.service.stop();
    }
}

/// Poll until the drained value count reaches `count` or the deadline hits.
fn wait_for_count(pipeline: &TestPipeline, key: &str, count: usize, deadline: Duration) -> Vec<serde_json::Value> {
    let start = std::time::Instant::now();
    let mut values = Vec::new();
    while start.elapsed() < deadline {
        values.extend(pipeline.drain_values(key));
        if values.len() >= count {
            return values;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    values
}

#[test]
fn test_full_stack_roundtrip() {
    let pipeline = TestPipeline::start();
    let key = DatapointKey::new("temp");

    pipeline.submit(&key, json!(20));
    let values = wait_for_count(&pipeline, "temp", 1, Duration::from_secs(1));
    assert_eq!(values, vec![json!(20)]);

    // Unchanged value under ON_CHANGE: nothing new reaches storage.
    pipeline.submit(&key, json!(20));
    std::thread::sleep(Duration::from_millis(100));
    assert!(pipeline.drain_values("temp").is_empty());

    pipeline.stop();
}

/// The worked example: ON_REPORT_PERIOD(600ms), rapid submits of 20/21/22.
/// The first observation reports immediately; after that exactly one
/// periodic emission fires around the period boundary, carrying the most
/// recent value.
#[test]
fn test_report_period_emits_latest_value_once() {
    let pipeline = TestPipeline::start();
    let key = DatapointKey::with_strategy(
        "temp",
        ReportStrategy::on_report_period(600).expect("strategy"),
    );

    pipeline.submit(&key, json!(20)); // t=0, first observation
    std::thread::sleep(Duration::from_millis(200));
    pipeline.submit(&key, json!(21)); // t=200, deferred
    std::thread::sleep(Duration::from_millis(200));
    pipeline.submit(&key, json!(22)); // t=400, deferred

    let values = wait_for_count(&pipeline, "temp", 2, Duration::from_secs(2));
    assert_eq!(values.len(), 2, "initial + one periodic emission: {values:?}");
    assert_eq!(values[0], json!(20));
    assert_eq!(values[1], json!(22), "periodic emission carries the latest value");

    // No further emission until the next boundary.
    std::thread::sleep(Duration::from_millis(100));
    assert!(pipeline.drain_values("temp").is_empty());

    pipeline.stop();
}

#[test]
fn test_change_or_period_does_not_double_fire() {
    let pipeline = TestPipeline::start();
    let key = DatapointKey::with_strategy(
        "temp",
        ReportStrategy::on_change_or_report_period(800).expect("strategy"),
    );

    pipeline.submit(&key, json!(20)); // t=0, first observation
    std::thread::sleep(Duration::from_millis(300));
    pipeline.submit(&key, json!(21)); // t=300, change fires and resets the clock

    let values = wait_for_count(&pipeline, "temp", 2, Duration::from_secs(1));
    assert_eq!(values, vec![json!(20), json!(21)]);

    // Without the reset the original boundary would fire around t=750.
    // Observe well past it: nothing may emit before the reset boundary
    // around t=1050.
    std::thread::sleep(Duration::from_millis(550)); // ~t=900
    assert!(
        pipeline.drain_values("temp").is_empty(),
        "periodic clock was not reset by the change emission"
    );

    // The reset boundary does fire, re-carrying the unchanged value.
    let values = wait_for_count(&pipeline, "temp", 1, Duration::from_secs(1));
    assert_eq!(values, vec![json!(21)]);

    pipeline.stop();
}

#[test]
fn test_periodic_reporting_without_new_submissions() {
    let pipeline = TestPipeline::start();
    let key = DatapointKey::with_strategy(
        "level",
        ReportStrategy::on_report_period(150).expect("strategy"),
    );

    pipeline.submit(&key, json!(7)); // single write, then silence

    // Three periods of silence still produce periodic emissions.
    let values = wait_for_count(&pipeline, "level", 3, Duration::from_secs(2));
    assert!(values.len() >= 3, "got {values:?}");
    assert!(values.iter().all(|v| *v == json!(7)));

    pipeline.stop();
}
