// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report strategies.
//!
//! A report strategy decides *when* a datapoint's value is actually
//! transmitted. Strategies resolve per key, per connector or process-wide
//! (in that precedence order) and are value-comparable so identical
//! policies collapse to a single cache identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Strategy validation errors. Surfaced at construction time; an invalid
/// strategy is never silently replaced by a default.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("report strategy {0} requires a report period greater than zero")]
    MissingReportPeriod(ReportStrategyType),

    #[error("unknown report strategy '{0}'")]
    UnknownStrategy(String),

    #[error("unknown aggregation function '{0}'")]
    UnknownAggregation(String),
}

/// When a datapoint is reported. Closed set: the filtering decision table
/// matches exhaustively over these four variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStrategyType {
    /// Every received value is reported, including unchanged ones.
    #[serde(rename = "ON_RECEIVED")]
    OnReceived,

    /// Only changed values are reported (plus the first observation).
    #[serde(rename = "ON_CHANGE")]
    OnChange,

    /// The latest value is reported on a clock, never more often than the
    /// report period.
    #[serde(rename = "ON_REPORT_PERIOD")]
    OnReportPeriod,

    /// Reported on change or on the clock, whichever fires first; a
    /// change-triggered report resets the clock.
    #[serde(rename = "ON_CHANGE_OR_REPORT_PERIOD")]
    OnChangeOrReportPeriod,
}

impl ReportStrategyType {
    /// Whether this strategy emits on a timer and therefore needs a report
    /// period and an entry in the periodic-report set.
    pub fn is_period_based(self) -> bool {
        matches!(self, Self::OnReportPeriod | Self::OnChangeOrReportPeriod)
    }

    /// Configuration-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnReceived => "ON_RECEIVED",
            Self::OnChange => "ON_CHANGE",
            Self::OnReportPeriod => "ON_REPORT_PERIOD",
            Self::OnChangeOrReportPeriod => "ON_CHANGE_OR_REPORT_PERIOD",
        }
    }
}

impl fmt::Display for ReportStrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStrategyType {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON_RECEIVED" => Ok(Self::OnReceived),
            "ON_CHANGE" => Ok(Self::OnChange),
            "ON_REPORT_PERIOD" => Ok(Self::OnReportPeriod),
            "ON_CHANGE_OR_REPORT_PERIOD" => Ok(Self::OnChangeOrReportPeriod),
            other => Err(StrategyError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Aggregation applied to values buffered within a report period.
///
/// Parsed and validated, reserved for a later release; the per-value fast
/// path reports raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationFunction {
    #[serde(rename = "MIN")]
    Min,
    #[serde(rename = "MAX")]
    Max,
    #[serde(rename = "AVG")]
    Avg,
    #[serde(rename = "SUM")]
    Sum,
    #[serde(rename = "COUNT")]
    Count,
    #[serde(rename = "LATEST")]
    Latest,
}

impl FromStr for AggregationFunction {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "AVG" => Ok(Self::Avg),
            "SUM" => Ok(Self::Sum),
            "COUNT" => Ok(Self::Count),
            "LATEST" => Ok(Self::Latest),
            other => Err(StrategyError::UnknownAggregation(other.to_string())),
        }
    }
}

/// One filtering policy.
///
/// `Eq`/`Hash` are value-based: two identical policies are one cache key,
/// which matters because [`crate::data::DatapointKey`] hashes the policy it
/// carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportStrategy {
    /// Strategy kind.
    #[serde(rename = "type")]
    pub report_type: ReportStrategyType,

    /// Report period in milliseconds. Required (> 0) for the period-based
    /// kinds, unused otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_period: Option<u64>,

    /// Reserved aggregation over the report period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_function: Option<AggregationFunction>,

    /// Time-to-live in milliseconds: forces re-emission of an otherwise
    /// unchanged cached value once the record expires. 0 or absent = never
    /// expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl ReportStrategy {
    /// Create and validate a strategy.
    pub fn new(
        report_type: ReportStrategyType,
        report_period: Option<u64>,
    ) -> Result<Self, StrategyError> {
        let strategy = Self {
            report_type,
            report_period,
            aggregation_function: None,
            ttl: None,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    /// Report every received value.
    pub fn on_received() -> Self {
        Self {
            report_type: ReportStrategyType::OnReceived,
            report_period: None,
            aggregation_function: None,
            ttl: None,
        }
    }

    /// Report only deltas.
    pub fn on_change() -> Self {
        Self {
            report_type: ReportStrategyType::OnChange,
            report_period: None,
            aggregation_function: None,
            ttl: None,
        }
    }

    /// Report the latest value every `period_ms`.
    pub fn on_report_period(period_ms: u64) -> Result<Self, StrategyError> {
        Self::new(ReportStrategyType::OnReportPeriod, Some(period_ms))
    }

    /// Report on change or every `period_ms`, whichever comes first.
    pub fn on_change_or_report_period(period_ms: u64) -> Result<Self, StrategyError> {
        Self::new(ReportStrategyType::OnChangeOrReportPeriod, Some(period_ms))
    }

    /// Set the record time-to-live in milliseconds.
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    /// Set the reserved aggregation function.
    pub fn with_aggregation(mut self, aggregation: AggregationFunction) -> Self {
        self.aggregation_function = Some(aggregation);
        self
    }

    /// Check the period requirement. Deserialized strategies must be
    /// validated before use; the typed constructors already are.
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.report_type.is_period_based() && !matches!(self.report_period, Some(p) if p > 0) {
            return Err(StrategyError::MissingReportPeriod(self.report_type));
        }
        Ok(())
    }

    /// Report period as a `Duration`, when period-based.
    pub fn period(&self) -> Option<Duration> {
        if self.report_type.is_period_based() {
            self.report_period.map(Duration::from_millis)
        } else {
            None
        }
    }

    /// Effective TTL in milliseconds; `Some(0)` normalizes to "never".
    pub fn effective_ttl_ms(&self) -> Option<u64> {
        match self.ttl {
            Some(0) | None => None,
            Some(ttl) => Some(ttl),
        }
    }
}
