//! Alert evaluation
//!
//! Alert stages walk each series of their inputs and annotate it with
//! [`AlertTrigger`] windows. The walking strategy is a [`SeriesEvaluator`];
//! [`AlertOperator`] adapts any evaluator into a stage operation.
//!
//! - [`threshold`]: value predicate with dwell and recovery hysteresis
//! - [`absence`]: gaps between samples and stale series
//! - [`summary`]: per-series digest of what fired, for alert executors

pub mod absence;
pub mod summary;
pub mod threshold;

pub use absence::DataAbsentEvaluator;
pub use summary::{AlertEvaluationSummary, FiringSeries, SummaryError};
pub use threshold::{Operator, ThresholdEvaluator};

use crate::metrics;
use crate::query::error::ExecutionError;
use crate::query::result::{AlertTrigger, DataPoint, GroupBy, Query, SeriesResult, TimeSeriesResult};
use crate::query::stage::{DependencyResults, StageContext, StageOperation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Trigger metadata: `name` plus every tag with exactly one value
pub fn create_args(series: &SeriesResult) -> BTreeMap<String, String> {
    let mut args: BTreeMap<String, String> = series
        .tags()
        .iter()
        .filter_map(|(key, values)| match values.as_slice() {
            [only] => Some((key.clone(), only.clone())),
            _ => None,
        })
        .collect();
    args.insert("name".to_string(), series.name().to_string());
    args
}

/// Union of the group maps of every tag group-by on the series
pub fn create_group_by(series: &SeriesResult) -> BTreeMap<String, String> {
    series
        .group_by()
        .iter()
        .filter_map(|g| match g {
            GroupBy::Tag { group, .. } => Some(group),
            GroupBy::Type { .. } => None,
        })
        .flat_map(|group| group.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect()
}

/// Builds triggers for one series, sharing the lazily derived metadata
pub(crate) struct TriggerFactory<'a> {
    series: &'a SeriesResult,
    args: Option<BTreeMap<String, String>>,
    group_by: Option<BTreeMap<String, String>>,
}

impl<'a> TriggerFactory<'a> {
    pub(crate) fn new(series: &'a SeriesResult) -> Self {
        Self {
            series,
            args: None,
            group_by: None,
        }
    }

    pub(crate) fn open(&mut self, time: DateTime<Utc>, message: String) -> AlertTrigger {
        let series = self.series;
        AlertTrigger {
            time,
            end_time: None,
            message,
            args: self.args.get_or_insert_with(|| create_args(series)).clone(),
            group_by: self
                .group_by
                .get_or_insert_with(|| create_group_by(series))
                .clone(),
        }
    }
}

/// Per-series alert state machine
pub trait SeriesEvaluator: Send + Sync + fmt::Debug + 'static {
    /// Stage operation name
    fn name(&self) -> &'static str;

    /// Triggers detected on `points`, evaluated at `now`
    ///
    /// `points` are ascending by time with unique timestamps.
    fn evaluate(
        &self,
        series: &SeriesResult,
        points: &[DataPoint],
        now: DateTime<Utc>,
    ) -> Vec<AlertTrigger>;
}

/// Stage operation running a [`SeriesEvaluator`] over every input series
///
/// Output keeps the dependency's query structure. Triggers already present
/// on a series are kept and the new ones appended.
#[derive(Debug)]
pub struct AlertOperator<E> {
    evaluator: E,
}

impl<E: SeriesEvaluator> AlertOperator<E> {
    /// Wrap an evaluator
    pub fn new(evaluator: E) -> Self {
        Self { evaluator }
    }

    /// The wrapped evaluator
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    fn evaluate_series(&self, series: &SeriesResult, now: DateTime<Utc>) -> (SeriesResult, usize) {
        let fresh = self.evaluator.evaluate(series, series.values(), now);
        let count = fresh.len();
        let alerts = series.alerts().iter().cloned().chain(fresh).collect();
        (series.clone().with_alerts(alerts), count)
    }
}

#[async_trait]
impl<E: SeriesEvaluator> StageOperation for AlertOperator<E> {
    fn name(&self) -> &'static str {
        self.evaluator.name()
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError> {
        let now = ctx.clock.now();
        let mut emitted = 0;

        let queries = inputs
            .iter()
            .flat_map(|result| result.queries().iter())
            .map(|query| {
                let series = query
                    .results()
                    .iter()
                    .map(|s| {
                        let (evaluated, count) = self.evaluate_series(s, now);
                        emitted += count;
                        evaluated
                    })
                    .collect();
                Query::clone(query).with_results(series)
            })
            .collect();

        metrics::record_alert_triggers(self.evaluator.name(), emitted);
        debug!(evaluator = self.evaluator.name(), triggers = emitted, "Alert evaluation finished");
        Ok(TimeSeriesResult::new(queries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_use_single_valued_tags() {
        let series = SeriesResult::new("latency")
            .with_tag("host", "a")
            .with_tag("dc", "east")
            .with_tag("dc", "west");
        let args = create_args(&series);
        assert_eq!(
            args,
            BTreeMap::from([
                ("host".to_string(), "a".to_string()),
                ("name".to_string(), "latency".to_string()),
            ])
        );
    }

    #[test]
    fn test_group_by_ignores_type_groups() {
        let series = SeriesResult::new("latency").with_group_by(vec![
            GroupBy::Tag {
                tags: vec!["host".to_string()],
                group: BTreeMap::from([("host".to_string(), "a".to_string())]),
            },
            GroupBy::Type {
                data_type: "number".to_string(),
            },
        ]);
        assert_eq!(
            create_group_by(&series),
            BTreeMap::from([("host".to_string(), "a".to_string())])
        );
    }
}
