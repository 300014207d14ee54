//! Backing time-series store seam
//!
//! Select stages hand a [`MetricsQuery`] to a [`TimeSeriesStore`] and wrap
//! whatever comes back. The engine never retries; retry and rate limiting
//! belong to the store implementation.

pub mod memory;

pub use memory::InMemoryStore;

use crate::query::result::{Query, TimeSeriesResult};
use crate::types::TimeRange;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by a backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be reached or refused the request
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store rejected the query shape
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Store-side failure while evaluating the query
    #[error("backend failure: {0}")]
    Backend(String),
}

// ============================================================================
// Query model
// ============================================================================

/// Unit of a sampling period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingUnit {
    /// Milliseconds
    Milliseconds,
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
}

/// Bucket size of a sampling aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sampling {
    /// Number of units
    pub value: i64,
    /// Unit
    pub unit: SamplingUnit,
}

impl Sampling {
    /// Express a period in the largest unit that divides it evenly
    pub fn from_duration(period: Duration) -> Self {
        let millis = period.num_milliseconds();
        let units = [
            (SamplingUnit::Days, 86_400_000),
            (SamplingUnit::Hours, 3_600_000),
            (SamplingUnit::Minutes, 60_000),
            (SamplingUnit::Seconds, 1_000),
        ];
        for (unit, size) in units {
            if millis != 0 && millis % size == 0 {
                return Self {
                    value: millis / size,
                    unit,
                };
            }
        }
        Self {
            value: millis,
            unit: SamplingUnit::Milliseconds,
        }
    }

    /// Bucket size as a duration
    pub fn to_duration(&self) -> Duration {
        match self.unit {
            SamplingUnit::Milliseconds => Duration::milliseconds(self.value),
            SamplingUnit::Seconds => Duration::seconds(self.value),
            SamplingUnit::Minutes => Duration::minutes(self.value),
            SamplingUnit::Hours => Duration::hours(self.value),
            SamplingUnit::Days => Duration::days(self.value),
        }
    }
}

/// Aggregator attached to a metric in a backend query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregator {
    /// Lowercase aggregator name (`max`, `percentile`, `diff`, ...)
    pub name: String,
    /// Bucket size, absent for sampling-less aggregators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Sampling>,
    /// Aggregator-specific arguments (e.g. `percentile`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One metric of a backend query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    pub name: String,
    /// Tag filter: a series matches when, for every key, one of its values is listed
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
    /// Tag keys to group by
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Aggregators applied in order
    #[serde(default)]
    pub aggregators: Vec<Aggregator>,
}

impl Metric {
    /// Create a metric with no filter, grouping or aggregation
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            group_by: Vec::new(),
            aggregators: Vec::new(),
        }
    }
}

/// Query sent to the backing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsQuery {
    /// Time window
    pub range: TimeRange,
    /// Metrics to read
    pub metrics: Vec<Metric>,
}

impl MetricsQuery {
    /// Copy of this query with `aggregator` appended to every metric
    pub fn with_aggregator(&self, aggregator: Aggregator) -> Self {
        let metrics = self
            .metrics
            .iter()
            .cloned()
            .map(|mut metric| {
                metric.aggregators.push(aggregator.clone());
                metric
            })
            .collect();
        Self {
            range: self.range,
            metrics,
        }
    }
}

/// Raw store response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsQueryResponse {
    /// One entry per requested metric
    pub queries: Vec<Query>,
    /// Non-fatal backend errors
    #[serde(default)]
    pub errors: Vec<String>,
}

impl From<MetricsQueryResponse> for TimeSeriesResult {
    fn from(response: MetricsQueryResponse) -> Self {
        TimeSeriesResult::new(response.queries).with_errors(response.errors)
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Backing time-series store
#[async_trait]
pub trait TimeSeriesStore: Send + Sync + 'static {
    /// Execute one query
    async fn query_metrics(&self, query: &MetricsQuery) -> Result<MetricsQueryResponse, StoreError>;
}
