// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size-bounded payload splitting.
//!
//! Downstream transports impose a maximum payload size; the pipeline must
//! never hand them an unsendable frame. [`ConvertedData::split_by_size`]
//! repacks one update into an ordered sequence of chunks, each guaranteed
//! to serialize to at most the caller's byte budget.
//!
//! Costs are measured, not estimated: the header is the serialized size of
//! the datapoint-free shell, and every key/value pair is charged its exact
//! serialized length plus JSON framing, so the accounted size equals the
//! real serialized size byte for byte.

use super::{ConvertedData, TelemetryEntry};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Splitting errors.
#[derive(Debug, Error)]
pub enum SplitError {
    /// The budget cannot even fit the device header; no chunk is sendable.
    #[error("byte budget {budget} cannot fit the {header}-byte header for device '{device}'")]
    HeaderTooLarge {
        device: String,
        header: usize,
        budget: usize,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn json_len<T: Serialize>(value: &T) -> Result<usize, serde_json::Error> {
    Ok(serde_json::to_vec(value)?.len())
}

/// Serialized cost of one `"key":value` pair, excluding the separator.
fn pair_cost(key: &str, value: &Value) -> Result<usize, serde_json::Error> {
    Ok(json_len(&key)? + 1 + json_len(value)?)
}

impl ConvertedData {
    /// Split into chunks of at most `max_bytes` serialized bytes each.
    ///
    /// The header (device name/type/metadata) is charged to every chunk;
    /// key/value pairs pack greedily in iteration order, and a telemetry
    /// entry's `{"ts":..,"values":{}}` overhead is charged once per chunk
    /// that carries any of its values. A single datapoint too large for a
    /// fresh chunk is dropped with an error log -- losing one value beats
    /// producing a frame the transport will reject.
    ///
    /// Returns an error when the header alone exceeds the budget.
    pub fn split_by_size(&self, max_bytes: usize) -> Result<Vec<ConvertedData>, SplitError> {
        let header = self.clone_shell().serialized_size()?;
        if header > max_bytes {
            return Err(SplitError::HeaderTooLarge {
                device: self.device_name.clone(),
                header,
                budget: max_bytes,
            });
        }
        if self.serialized_size()? <= max_bytes {
            return Ok(vec![self.clone()]);
        }

        let mut chunks: Vec<ConvertedData> = Vec::new();
        let mut current = self.clone_shell();
        let mut used = header;

        for entry in self.telemetry() {
            let entry_overhead = json_len(&TelemetryEntry {
                ts: entry.ts,
                values: HashMap::new(),
            })?;
            // Whether the current chunk already carries this entry's ts.
            let mut started = false;

            for (key, value) in &entry.values {
                let pair = pair_cost(&key.key, value)?;
                let cost = if started {
                    1 + pair
                } else {
                    let array_sep = usize::from(!current.telemetry().is_empty());
                    array_sep + entry_overhead + pair
                };

                if used + cost <= max_bytes {
                    current.add_telemetry_datapoint(Some(entry.ts), key.clone(), value.clone());
                    used += cost;
                    started = true;
                    continue;
                }

                // Does the pair fit a fresh chunk at all?
                if header + entry_overhead + pair > max_bytes {
                    tracing::error!(
                        "dropping oversized telemetry datapoint '{}' for device '{}': \
                         {} bytes exceed the {} byte payload budget",
                        key.key,
                        self.device_name,
                        pair,
                        max_bytes
                    );
                    continue;
                }

                chunks.push(current);
                current = self.clone_shell();
                current.add_telemetry_datapoint(Some(entry.ts), key.clone(), value.clone());
                used = header + entry_overhead + pair;
                started = true;
            }
        }

        for (key, value) in self.attributes() {
            let pair = pair_cost(&key.key, value)?;
            let sep = usize::from(current.attributes_count() > 0);

            if used + sep + pair <= max_bytes {
                current.add_attribute(key.clone(), value.clone());
                used += sep + pair;
                continue;
            }

            if header + pair > max_bytes {
                tracing::error!(
                    "dropping oversized attribute '{}' for device '{}': \
                     {} bytes exceed the {} byte payload budget",
                    key.key,
                    self.device_name,
                    pair,
                    max_bytes
                );
                continue;
            }

            chunks.push(current);
            current = self.clone_shell();
            current.add_attribute(key.clone(), value.clone());
            used = header + pair;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(chunks)
    }
}
