//! Aggregation Operator - bucketed statistics over a series
//!
//! The same [`AggregationSpec`] drives both paths an aggregator can take:
//! lifted into a select (serialized as a store [`Aggregator`] and evaluated
//! by the backend) or run in-engine as a dedicated stage. The in-memory store
//! evaluates lifted aggregators with [`AggregationSpec::apply`] as well, so
//! both paths produce identical series.
//!
//! Buckets are aligned to the Unix epoch: a point at `t` falls into the
//! bucket starting at `floor(t / period) * period`, and the aggregated point
//! carries the bucket start as its time.

use crate::query::args::ArgReader;
use crate::query::error::{BuildError, ExecutionError};
use crate::query::operators::diff::pairwise_difference;
use crate::query::operators::numeric::{KahanSum, RunningMean};
use crate::query::registry::AggregatorKind;
use crate::query::result::{DataPoint, DataValue, Query, TimeSeriesResult};
use crate::query::stage::{DependencyResults, StageContext, StageOperation};
use crate::store::{Aggregator, Sampling};
use async_trait::async_trait;
use chrono::{DateTime, Duration};
use std::collections::BTreeMap;

// ============================================================================
// Aggregation functions
// ============================================================================

/// Liftable aggregation function
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregationFunction {
    /// Bucket minimum
    Min,
    /// Bucket maximum
    Max,
    /// Pass samples through unchanged
    Merge,
    /// Bucket percentile (0-100)
    Percentile(f64),
    /// Bucket sample count
    Count,
    /// Bucket mean
    Avg,
    /// Bucket sum
    Sum,
    /// Pairwise difference, no buckets
    Diff,
}

impl AggregationFunction {
    /// Registry kind of this function
    pub fn kind(&self) -> AggregatorKind {
        match self {
            AggregationFunction::Min => AggregatorKind::Min,
            AggregationFunction::Max => AggregatorKind::Max,
            AggregationFunction::Merge => AggregatorKind::Merge,
            AggregationFunction::Percentile(_) => AggregatorKind::Percentile,
            AggregationFunction::Count => AggregatorKind::Count,
            AggregationFunction::Avg => AggregatorKind::Avg,
            AggregationFunction::Sum => AggregatorKind::Sum,
            AggregationFunction::Diff => AggregatorKind::Diff,
        }
    }

    /// Lowercase name
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// A fully validated aggregator: function plus bucket period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationSpec {
    /// What to compute per bucket
    pub function: AggregationFunction,
    /// Bucket size; `None` only for sampling-less functions
    pub period: Option<Duration>,
}

impl AggregationSpec {
    /// Validate stage arguments for a liftable aggregator
    ///
    /// Reads `period` (sampling functions only) and `percentile`.
    pub fn from_args(
        kind: AggregatorKind,
        args: &mut ArgReader<'_>,
        default_period: Duration,
    ) -> Result<Self, BuildError> {
        let function = match kind {
            AggregatorKind::Min => AggregationFunction::Min,
            AggregatorKind::Max => AggregationFunction::Max,
            AggregatorKind::Merge => AggregationFunction::Merge,
            AggregatorKind::Count => AggregationFunction::Count,
            AggregatorKind::Avg => AggregationFunction::Avg,
            AggregatorKind::Sum => AggregationFunction::Sum,
            AggregatorKind::Diff => AggregationFunction::Diff,
            AggregatorKind::Percentile => {
                let p = args.required_f64("percentile")?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(BuildError::invalid_argument(
                        "percentile",
                        format!("must be between 0 and 100, got {}", p),
                    ));
                }
                AggregationFunction::Percentile(p)
            }
            other => return Err(BuildError::UnknownAggregator(other.name().to_string())),
        };

        let period = if kind.has_sampling() {
            let period = args.optional_period("period")?.unwrap_or(default_period);
            if period <= Duration::zero() {
                return Err(BuildError::invalid_argument("period", "must be positive"));
            }
            Some(period)
        } else {
            None
        };

        Ok(Self { function, period })
    }

    /// Backend form of this aggregator
    pub fn to_aggregator(&self) -> Aggregator {
        let mut extra = BTreeMap::new();
        if let AggregationFunction::Percentile(p) = self.function {
            extra.insert("percentile".to_string(), serde_json::json!(p));
        }
        Aggregator {
            name: self.function.name().to_string(),
            sampling: self.period.map(Sampling::from_duration),
            extra,
        }
    }

    /// Parse a backend aggregator
    pub fn from_aggregator(aggregator: &Aggregator) -> Result<Self, String> {
        let kind = AggregatorKind::from_name(&aggregator.name)
            .filter(AggregatorKind::is_liftable)
            .ok_or_else(|| format!("unsupported aggregator '{}'", aggregator.name))?;

        let function = match kind {
            AggregatorKind::Percentile => {
                let p = aggregator
                    .extra
                    .get("percentile")
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| "percentile aggregator requires 'percentile'".to_string())?;
                AggregationFunction::Percentile(p)
            }
            AggregatorKind::Min => AggregationFunction::Min,
            AggregatorKind::Max => AggregationFunction::Max,
            AggregatorKind::Merge => AggregationFunction::Merge,
            AggregatorKind::Count => AggregationFunction::Count,
            AggregatorKind::Avg => AggregationFunction::Avg,
            AggregatorKind::Sum => AggregationFunction::Sum,
            _ => AggregationFunction::Diff,
        };

        let period = match (kind.has_sampling(), aggregator.sampling) {
            (true, Some(sampling)) if sampling.to_duration() > Duration::zero() => {
                Some(sampling.to_duration())
            }
            (true, _) => {
                return Err(format!(
                    "aggregator '{}' requires a positive sampling period",
                    aggregator.name
                ))
            }
            (false, _) => None,
        };

        Ok(Self { function, period })
    }

    /// Aggregate a run of points
    ///
    /// Input need not be sorted and may repeat timestamps (grouped series
    /// do). Output is ascending by time.
    pub fn apply(&self, points: &[DataPoint]) -> Vec<DataPoint> {
        match self.function {
            AggregationFunction::Merge => sorted(points),
            AggregationFunction::Diff => pairwise_difference(&sorted(points)),
            _ => match self.period {
                Some(period) => self.bucketed(points, period),
                None => sorted(points),
            },
        }
    }

    fn bucketed(&self, points: &[DataPoint], period: Duration) -> Vec<DataPoint> {
        let period_ms = period.num_milliseconds().max(1);
        let mut buckets: BTreeMap<i64, AggregationState> = BTreeMap::new();

        // Time order keeps floating-point accumulation independent of input order
        for point in &sorted(points) {
            let start = point.time.timestamp_millis().div_euclid(period_ms) * period_ms;
            if let Some(state) = buckets.get_mut(&start) {
                state.update(&point.value);
            } else if let Some(mut state) = AggregationState::new(&self.function) {
                state.update(&point.value);
                buckets.insert(start, state);
            }
        }

        buckets
            .into_iter()
            .filter_map(|(start, state)| {
                let time = DateTime::from_timestamp_millis(start)?;
                state.finalize().map(|value| DataPoint::new(time, value))
            })
            .collect()
    }
}

fn sorted(points: &[DataPoint]) -> Vec<DataPoint> {
    let mut points = points.to_vec();
    points.sort_by_key(|p| p.time);
    points
}

// ============================================================================
// Aggregation State
// ============================================================================

/// Per-bucket accumulator
#[derive(Debug, Clone)]
enum AggregationState {
    Count(u64),
    Sum(Option<KahanSum>),
    Min(Option<f64>),
    Max(Option<f64>),
    Mean(RunningMean),
    Percentile { target: f64, values: Vec<f64> },
}

impl AggregationState {
    fn new(function: &AggregationFunction) -> Option<Self> {
        let state = match function {
            AggregationFunction::Count => AggregationState::Count(0),
            AggregationFunction::Sum => AggregationState::Sum(None),
            AggregationFunction::Min => AggregationState::Min(None),
            AggregationFunction::Max => AggregationState::Max(None),
            AggregationFunction::Avg => AggregationState::Mean(RunningMean::new()),
            AggregationFunction::Percentile(p) => AggregationState::Percentile {
                target: *p,
                values: Vec::new(),
            },
            AggregationFunction::Merge | AggregationFunction::Diff => return None,
        };
        Some(state)
    }

    fn update(&mut self, value: &DataValue) {
        if let AggregationState::Count(count) = self {
            *count += 1;
            return;
        }

        // Non-numeric samples only count
        let Some(v) = value.as_f64().filter(|v| !v.is_nan()) else {
            return;
        };

        match self {
            AggregationState::Count(_) => {}
            AggregationState::Sum(sum) => sum.get_or_insert_with(KahanSum::new).add(v),
            AggregationState::Min(min) => *min = Some(min.map_or(v, |m| m.min(v))),
            AggregationState::Max(max) => *max = Some(max.map_or(v, |m| m.max(v))),
            AggregationState::Mean(mean) => mean.add(v),
            AggregationState::Percentile { values, .. } => values.push(v),
        }
    }

    fn finalize(self) -> Option<f64> {
        match self {
            AggregationState::Count(count) => Some(count as f64),
            AggregationState::Sum(sum) => sum.map(|s| s.sum()),
            AggregationState::Min(min) => min,
            AggregationState::Max(max) => max,
            AggregationState::Mean(mean) => mean.mean(),
            AggregationState::Percentile { target, mut values } => {
                if values.is_empty() {
                    return None;
                }
                let idx = ((target / 100.0) * (values.len() - 1) as f64).round() as usize;
                let idx = idx.min(values.len() - 1);
                let (_, value, _) = values.select_nth_unstable_by(idx, f64::total_cmp);
                Some(*value)
            }
        }
    }
}

// ============================================================================
// Stage operator
// ============================================================================

/// In-engine aggregation for a liftable aggregator that could not be lifted
#[derive(Debug, Clone)]
pub struct AggregateOperator {
    spec: AggregationSpec,
}

impl AggregateOperator {
    /// Create an operator for a validated spec
    pub fn new(spec: AggregationSpec) -> Self {
        Self { spec }
    }

    /// The aggregation this operator applies
    pub fn spec(&self) -> &AggregationSpec {
        &self.spec
    }
}

#[async_trait]
impl StageOperation for AggregateOperator {
    fn name(&self) -> &'static str {
        self.spec.function.name()
    }

    async fn execute(
        &self,
        _ctx: &StageContext,
        inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError> {
        let queries = inputs
            .iter()
            .flat_map(|result| result.queries().iter())
            .map(|query| {
                let series = query
                    .results()
                    .iter()
                    .map(|s| s.clone().with_values(self.spec.apply(s.values())))
                    .collect();
                Query::clone(query).with_results(series)
            })
            .collect();
        Ok(TimeSeriesResult::new(queries))
    }
}
