// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Normalized device data model.
//!
//! Every protocol adapter converts its protocol-specific reads into a
//! [`ConvertedData`]: one device's update, holding timestamped telemetry
//! entries and last-known attributes keyed by [`DatapointKey`]. Values are
//! `serde_json::Value` so adapters stay free in what they decode.
//!
//! Once handed to the report strategy service a `ConvertedData` is treated
//! as immutable and moves through the pipeline by value.

mod split;

pub use split::SplitError;

use crate::strategy::ReportStrategy;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identity of one reported value: the textual key plus an optional per-key
/// strategy override.
///
/// Equality and hash cover `(key, strategy)` -- the same textual key under
/// different override policies is a distinct identity for caching. On the
/// wire only the bare key is serialized; the policy is local filtering
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatapointKey {
    pub key: String,
    pub strategy: Option<ReportStrategy>,
}

impl DatapointKey {
    /// Key with no per-key override.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            strategy: None,
        }
    }

    /// Key with a per-key strategy override.
    pub fn with_strategy(key: impl Into<String>, strategy: ReportStrategy) -> Self {
        Self {
            key: key.into(),
            strategy: Some(strategy),
        }
    }
}

impl fmt::Display for DatapointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl Serialize for DatapointKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

/// One timestamped sample set: every value in `values` was observed at `ts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEntry {
    /// Epoch milliseconds.
    pub ts: u64,
    pub values: HashMap<DatapointKey, Value>,
}

impl TelemetryEntry {
    /// Entry at the given timestamp, defaulting to now.
    pub fn new(ts: Option<u64>) -> Self {
        Self {
            ts: ts.unwrap_or_else(now_ms),
            values: HashMap::new(),
        }
    }

    /// Entry pre-filled with values.
    pub fn with_values(ts: Option<u64>, values: HashMap<DatapointKey, Value>) -> Self {
        Self {
            ts: ts.unwrap_or_else(now_ms),
            values,
        }
    }
}

/// One device's normalized update.
///
/// Telemetry entries keep insertion order and are deduplicated by timestamp:
/// adding an entry for a `ts` already present merges it (new keys added,
/// existing keys left at their first-seen value). Attributes overwrite.
#[derive(Debug, Clone)]
pub struct ConvertedData {
    pub device_name: String,
    pub device_type: String,
    telemetry: Vec<TelemetryEntry>,
    /// ts -> index into `telemetry`, for O(1) merge-by-timestamp.
    ts_index: HashMap<u64, usize>,
    attributes: HashMap<DatapointKey, Value>,
    metadata: HashMap<String, Value>,
    /// Distinct (ts, key) pairs across all entries, maintained on insert.
    telemetry_datapoints_count: usize,
}

impl ConvertedData {
    pub fn new(device_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            device_type: device_type.into(),
            telemetry: Vec::new(),
            ts_index: HashMap::new(),
            attributes: HashMap::new(),
            metadata: HashMap::new(),
            telemetry_datapoints_count: 0,
        }
    }

    /// Attach free-form metadata (receive timestamp, source connector, ...).
    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Add a telemetry entry, merging into an existing entry with the same
    /// timestamp. Within one conversion the first write per (ts, key) wins.
    pub fn add_telemetry(&mut self, entry: TelemetryEntry) {
        match self.ts_index.get(&entry.ts) {
            Some(&idx) => {
                let existing = &mut self.telemetry[idx];
                for (key, value) in entry.values {
                    if !existing.values.contains_key(&key) {
                        existing.values.insert(key, value);
                        self.telemetry_datapoints_count += 1;
                    }
                }
            }
            None => {
                self.ts_index.insert(entry.ts, self.telemetry.len());
                self.telemetry_datapoints_count += entry.values.len();
                self.telemetry.push(entry);
            }
        }
    }

    /// Add a single telemetry value at the given timestamp (now if absent).
    pub fn add_telemetry_datapoint(&mut self, ts: Option<u64>, key: DatapointKey, value: Value) {
        let mut entry = TelemetryEntry::new(ts);
        entry.values.insert(key, value);
        self.add_telemetry(entry);
    }

    /// Set a last-known attribute; later writes for the same key overwrite.
    pub fn add_attribute(&mut self, key: DatapointKey, value: Value) {
        self.attributes.insert(key, value);
    }

    pub fn telemetry(&self) -> &[TelemetryEntry] {
        &self.telemetry
    }

    pub fn attributes(&self) -> &HashMap<DatapointKey, Value> {
        &self.attributes
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Sum of distinct keys across all telemetry entries.
    pub fn telemetry_datapoints_count(&self) -> usize {
        self.telemetry_datapoints_count
    }

    pub fn attributes_count(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the update carries neither telemetry nor attributes.
    pub fn is_empty(&self) -> bool {
        self.telemetry_datapoints_count == 0 && self.attributes.is_empty()
    }

    /// Wire form as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Size of the wire form in bytes.
    pub fn serialized_size(&self) -> Result<usize, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.len())
    }

    /// Copy of the header only: device identity and metadata, no datapoints.
    pub(crate) fn clone_shell(&self) -> Self {
        Self {
            device_name: self.device_name.clone(),
            device_type: self.device_type.clone(),
            telemetry: Vec::new(),
            ts_index: HashMap::new(),
            attributes: HashMap::new(),
            metadata: self.metadata.clone(),
            telemetry_datapoints_count: 0,
        }
    }
}

impl Serialize for ConvertedData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ConvertedData", 5)?;
        state.serialize_field("deviceName", &self.device_name)?;
        state.serialize_field("deviceType", &self.device_type)?;
        state.serialize_field("telemetry", &self.telemetry)?;
        state.serialize_field("attributes", &self.attributes)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.end()
    }
}
