//! Time-series result model
//!
//! A program run produces one [`TimeSeriesResult`]: a list of [`Query`]
//! results, each holding per-series [`SeriesResult`]s, plus the warnings and
//! errors collected while building and running the graph.
//!
//! Values are immutable once built. Operators derive new results with the
//! consuming `with_*` methods instead of mutating shared data, which is what
//! lets several consumers share one upstream result by reference.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Data Points
// ============================================================================

/// Value of a single sample
///
/// Backends may return non-numeric payloads (histograms, strings); those are
/// carried through untouched and ignored by numeric operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Numeric sample
    Number(f64),
    /// Anything else the backend returned
    Opaque(serde_json::Value),
}

impl DataValue {
    /// Numeric view of the value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Number(v) => Some(*v),
            DataValue::Opaque(v) => v.as_f64(),
        }
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Number(v)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Number(v) => write!(f, "{}", v),
            DataValue::Opaque(v) => write!(f, "{}", v),
        }
    }
}

/// One timestamped sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Sample time
    pub time: DateTime<Utc>,
    /// Sample value
    pub value: DataValue,
}

impl DataPoint {
    /// Create a numeric data point
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self {
            time,
            value: DataValue::Number(value),
        }
    }

    /// Create a data point with an arbitrary value
    pub fn with_value(time: DateTime<Utc>, value: DataValue) -> Self {
        Self { time, value }
    }

    /// Numeric view of the value
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

// ============================================================================
// Group-by descriptors
// ============================================================================

/// Describes which grouping produced a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupBy {
    /// Grouped by tag values
    Tag {
        /// Tag keys the query grouped on
        tags: Vec<String>,
        /// Concrete tag values of this group
        group: BTreeMap<String, String>,
    },
    /// Grouped by data type
    Type {
        /// Data type name
        #[serde(rename = "type")]
        data_type: String,
    },
}

// ============================================================================
// Alert triggers
// ============================================================================

/// A firing window `[time, end_time)` detected on one series
///
/// `end_time == None` means the alert is still active at the evaluation
/// instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTrigger {
    /// Window start
    pub time: DateTime<Utc>,
    /// Window end, absent while ongoing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Human-readable reason
    pub message: String,
    /// Series name plus single-valued tags
    pub args: BTreeMap<String, String>,
    /// Group values that distinguish this trigger from its siblings
    pub group_by: BTreeMap<String, String>,
}

impl AlertTrigger {
    /// Whether the window has no end yet
    pub fn is_ongoing(&self) -> bool {
        self.end_time.is_none()
    }

    /// Stable key for notification deduplication
    ///
    /// `k:v` pairs over `args` in key order, joined with `;`. Slashes are
    /// replaced so the key is usable as a path segment.
    pub fn notification_key(&self) -> String {
        self.args
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join(";")
            .replace('/', ".")
    }
}

// ============================================================================
// Series
// ============================================================================

/// One series of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    values: Vec<DataPoint>,
    #[serde(default)]
    alerts: Vec<AlertTrigger>,
    #[serde(default)]
    group_by: Vec<GroupBy>,
}

impl SeriesResult {
    /// Create an empty series
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            values: Vec::new(),
            alerts: Vec::new(),
            group_by: Vec::new(),
        }
    }

    /// Replace the data points
    ///
    /// Points are sorted ascending by time. When two points share a
    /// timestamp the later one in the input wins.
    pub fn with_values(mut self, values: Vec<DataPoint>) -> Self {
        self.values = normalize_points(values);
        self
    }

    /// Replace the tag multimap
    pub fn with_tags(mut self, tags: BTreeMap<String, Vec<String>>) -> Self {
        self.tags = tags;
        self
    }

    /// Add one tag value
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let values = self.tags.entry(key.into()).or_default();
        let value = value.into();
        if !values.contains(&value) {
            values.push(value);
        }
        self
    }

    /// Replace the alert triggers
    pub fn with_alerts(mut self, alerts: Vec<AlertTrigger>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Replace the group-by descriptors
    pub fn with_group_by(mut self, group_by: Vec<GroupBy>) -> Self {
        self.group_by = group_by;
        self
    }

    /// Series name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag multimap
    pub fn tags(&self) -> &BTreeMap<String, Vec<String>> {
        &self.tags
    }

    /// Data points, ascending by time
    pub fn values(&self) -> &[DataPoint] {
        &self.values
    }

    /// Alert triggers detected on this series
    pub fn alerts(&self) -> &[AlertTrigger] {
        &self.alerts
    }

    /// Group-by descriptors
    pub fn group_by(&self) -> &[GroupBy] {
        &self.group_by
    }

    /// Sum of the numeric values
    pub fn value_sum(&self) -> f64 {
        self.values.iter().filter_map(DataPoint::as_f64).sum()
    }
}

fn normalize_points(mut values: Vec<DataPoint>) -> Vec<DataPoint> {
    values.sort_by_key(|p| p.time);
    let mut out: Vec<DataPoint> = Vec::with_capacity(values.len());
    for point in values {
        match out.last_mut() {
            Some(last) if last.time == point.time => *last = point,
            _ => out.push(point),
        }
    }
    out
}

// ============================================================================
// Query and TimeSeriesResult
// ============================================================================

/// Result set for one metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    sample_size: u64,
    #[serde(default)]
    results: Vec<SeriesResult>,
}

impl Query {
    /// Create a query result
    pub fn new(results: Vec<SeriesResult>) -> Self {
        let sample_size = results.iter().map(|r| r.values().len() as u64).sum();
        Self {
            sample_size,
            results,
        }
    }

    /// Override the backend-reported sample size
    pub fn with_sample_size(mut self, sample_size: u64) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Replace the series, keeping the sample size
    pub fn with_results(mut self, results: Vec<SeriesResult>) -> Self {
        self.results = results;
        self
    }

    /// Number of samples the backend read
    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    /// Per-series results
    pub fn results(&self) -> &[SeriesResult] {
        &self.results
    }

    /// Consume into the series list
    pub fn into_results(self) -> Vec<SeriesResult> {
        self.results
    }
}

/// Result of one program execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesResult {
    #[serde(default)]
    queries: Vec<Query>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl TimeSeriesResult {
    /// Create a result from query results
    pub fn new(queries: Vec<Query>) -> Self {
        Self {
            queries,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Append warnings
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Append errors
    pub fn with_errors(mut self, errors: impl IntoIterator<Item = String>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Query results
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Warnings collected while building and running
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Non-fatal errors reported by the backend
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Iterate every series across all queries
    pub fn series(&self) -> impl Iterator<Item = &SeriesResult> {
        self.queries.iter().flat_map(|q| q.results().iter())
    }

    /// Total number of alert triggers
    pub fn alert_count(&self) -> usize {
        self.series().map(|s| s.alerts().len()).sum()
    }

    /// Triggers that are old enough to act on
    ///
    /// A trigger that started within `freshness` of `now` may still be
    /// revised once late data arrives, so it is held back.
    pub fn active_alerts(&self, now: DateTime<Utc>, freshness: Duration) -> Vec<&AlertTrigger> {
        self.series()
            .flat_map(|s| s.alerts().iter())
            .filter(|alert| now.signed_duration_since(alert.time) > freshness)
            .collect()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
