//! Alert evaluation summary
//!
//! Alert executors run a program whose final stage is an alert and only
//! need to know which groups fired. [`AlertEvaluationSummary`] condenses a
//! [`TimeSeriesResult`] into that view and rejects result shapes an alert
//! cannot be evaluated against.

use crate::query::result::{GroupBy, SeriesResult, TimeSeriesResult};
use crate::types::TimeRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result shapes that can't be summarised
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SummaryError {
    /// Result did not hold exactly one query
    #[error("Expected exactly one query, got {0}")]
    QueryCount(usize),

    /// Query held no series
    #[error("Expected at least one result")]
    NoResults,

    /// Series came from different metrics
    #[error("All result metric names must be identical")]
    MixedSeriesNames,

    /// Several series without a tag group-by to tell them apart
    #[error("All results must contain a tag group-by if there are multiple results")]
    MissingGroupBy,
}

/// One group that has at least one trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiringSeries {
    /// Tag values of the group, empty for an ungrouped series
    pub group: BTreeMap<String, String>,
    /// Number of trigger windows on the series
    pub triggers: usize,
    /// Whether one of the windows is still open
    pub ongoing: bool,
}

/// What an alert program reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvaluationSummary {
    /// Metric name shared by every series
    pub series_name: String,
    /// Tag keys the query grouped on
    pub group_bys: Vec<String>,
    /// Firing groups, in result order
    pub firing: Vec<FiringSeries>,
    /// Window the program selected, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_window: Option<TimeRange>,
}

impl AlertEvaluationSummary {
    /// Summarise a single-query result
    pub fn from_result(result: &TimeSeriesResult) -> Result<Self, SummaryError> {
        let query = match result.queries() {
            [only] => only,
            queries => return Err(SummaryError::QueryCount(queries.len())),
        };
        let results = query.results();
        let first = results.first().ok_or(SummaryError::NoResults)?;

        if results.iter().any(|r| r.name() != first.name()) {
            return Err(SummaryError::MixedSeriesNames);
        }
        if results.len() > 1 && results.iter().any(|r| tag_group(r).is_none()) {
            return Err(SummaryError::MissingGroupBy);
        }

        let group_bys = results
            .iter()
            .find_map(|r| tag_group(r).map(|(tags, _)| tags.to_vec()))
            .unwrap_or_default();

        let firing = results
            .iter()
            .filter(|r| !r.alerts().is_empty())
            .map(|r| FiringSeries {
                group: tag_group(r).map(|(_, g)| g.clone()).unwrap_or_default(),
                triggers: r.alerts().len(),
                ongoing: r.alerts().iter().any(|a| a.is_ongoing()),
            })
            .collect();

        Ok(Self {
            series_name: first.name().to_string(),
            group_bys,
            firing,
            query_window: None,
        })
    }

    /// Attach the query window
    pub fn with_query_window(mut self, window: TimeRange) -> Self {
        self.query_window = Some(window);
        self
    }

    /// Whether any group fired
    pub fn is_firing(&self) -> bool {
        !self.firing.is_empty()
    }
}

// The first tag group-by; other group-bys (e.g. by data type) may sit beside it
fn tag_group(series: &SeriesResult) -> Option<(&[String], &BTreeMap<String, String>)> {
    series.group_by().iter().find_map(|g| match g {
        GroupBy::Tag { tags, group } => Some((tags.as_slice(), group)),
        GroupBy::Type { .. } => None,
    })
}
