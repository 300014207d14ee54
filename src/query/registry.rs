//! Aggregator registry
//!
//! Aggregate stages are looked up by lowercase name. Each [`AggregatorKind`]
//! maps to a constructor that validates the stage's arguments and builds its
//! operation.

use crate::alert::absence::DataAbsentEvaluator;
use crate::alert::threshold::ThresholdEvaluator;
use crate::alert::AlertOperator;
use crate::query::args::ArgReader;
use crate::query::error::BuildError;
use crate::query::operators::aggregation::{AggregateOperator, AggregationSpec};
use crate::query::operators::diff::DiffOperator;
use crate::query::operators::top::TopOperator;
use crate::query::operators::union::UnionOperator;
use crate::query::planner::PlannerConfig;
use crate::query::stage::StageOperation;
use std::fmt;

/// Every aggregator the engine knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregatorKind {
    /// Bucket minimum
    Min,
    /// Bucket maximum
    Max,
    /// Combine samples without reducing them
    Merge,
    /// Bucket percentile
    Percentile,
    /// Bucket sample count
    Count,
    /// Bucket mean
    Avg,
    /// Bucket sum
    Sum,
    /// Pairwise difference
    Diff,
    /// Threshold alert
    Threshold,
    /// Missing-data alert
    DataAbsent,
    /// Concatenate inputs
    Union,
    /// Highest-scoring series
    Top,
    /// Lowest-scoring series
    Bottom,
}

impl AggregatorKind {
    /// Resolve a name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "min" => AggregatorKind::Min,
            "max" => AggregatorKind::Max,
            "merge" => AggregatorKind::Merge,
            "percentile" => AggregatorKind::Percentile,
            "count" => AggregatorKind::Count,
            "avg" => AggregatorKind::Avg,
            "sum" => AggregatorKind::Sum,
            "diff" => AggregatorKind::Diff,
            "threshold" => AggregatorKind::Threshold,
            "dataabsent" => AggregatorKind::DataAbsent,
            "union" => AggregatorKind::Union,
            "top" => AggregatorKind::Top,
            "bottom" => AggregatorKind::Bottom,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            AggregatorKind::Min => "min",
            AggregatorKind::Max => "max",
            AggregatorKind::Merge => "merge",
            AggregatorKind::Percentile => "percentile",
            AggregatorKind::Count => "count",
            AggregatorKind::Avg => "avg",
            AggregatorKind::Sum => "sum",
            AggregatorKind::Diff => "diff",
            AggregatorKind::Threshold => "threshold",
            AggregatorKind::DataAbsent => "dataabsent",
            AggregatorKind::Union => "union",
            AggregatorKind::Top => "top",
            AggregatorKind::Bottom => "bottom",
        }
    }

    /// Can be folded into a select's backend query
    pub fn is_liftable(&self) -> bool {
        matches!(
            self,
            AggregatorKind::Min
                | AggregatorKind::Max
                | AggregatorKind::Merge
                | AggregatorKind::Percentile
                | AggregatorKind::Count
                | AggregatorKind::Avg
                | AggregatorKind::Sum
                | AggregatorKind::Diff
        )
    }

    /// Carries a bucket period when lifted
    pub fn has_sampling(&self) -> bool {
        self.is_liftable() && *self != AggregatorKind::Diff
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Constructor table
// ============================================================================

/// Builds a dedicated stage operation from validated arguments
pub type StageConstructor = fn(
    AggregatorKind,
    &mut ArgReader<'_>,
    &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError>;

static REGISTRY: &[(AggregatorKind, StageConstructor)] = &[
    (AggregatorKind::Min, build_aggregate),
    (AggregatorKind::Max, build_aggregate),
    (AggregatorKind::Merge, build_aggregate),
    (AggregatorKind::Percentile, build_aggregate),
    (AggregatorKind::Count, build_aggregate),
    (AggregatorKind::Avg, build_aggregate),
    (AggregatorKind::Sum, build_aggregate),
    (AggregatorKind::Diff, build_diff),
    (AggregatorKind::Threshold, build_threshold),
    (AggregatorKind::DataAbsent, build_data_absent),
    (AggregatorKind::Union, build_union),
    (AggregatorKind::Top, build_top),
    (AggregatorKind::Bottom, build_top),
];

/// Resolve an aggregator name to its kind and constructor
pub fn lookup(name: &str) -> Result<(AggregatorKind, StageConstructor), BuildError> {
    let kind = AggregatorKind::from_name(name)
        .ok_or_else(|| BuildError::UnknownAggregator(name.to_string()))?;
    REGISTRY
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(k, ctor)| (*k, *ctor))
        .ok_or_else(|| BuildError::UnknownAggregator(name.to_string()))
}

fn build_aggregate(
    kind: AggregatorKind,
    args: &mut ArgReader<'_>,
    config: &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError> {
    let spec = AggregationSpec::from_args(kind, args, config.default_sampling_period)?;
    Ok(Box::new(AggregateOperator::new(spec)))
}

fn build_diff(
    _kind: AggregatorKind,
    _args: &mut ArgReader<'_>,
    _config: &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError> {
    Ok(Box::new(DiffOperator))
}

fn build_threshold(
    _kind: AggregatorKind,
    args: &mut ArgReader<'_>,
    config: &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError> {
    let evaluator = ThresholdEvaluator::from_args(args, config)?;
    Ok(Box::new(AlertOperator::new(evaluator)))
}

fn build_data_absent(
    _kind: AggregatorKind,
    args: &mut ArgReader<'_>,
    config: &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError> {
    let evaluator = DataAbsentEvaluator::from_args(args, config)?;
    Ok(Box::new(AlertOperator::new(evaluator)))
}

fn build_union(
    _kind: AggregatorKind,
    _args: &mut ArgReader<'_>,
    _config: &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError> {
    Ok(Box::new(UnionOperator))
}

fn build_top(
    kind: AggregatorKind,
    args: &mut ArgReader<'_>,
    _config: &PlannerConfig,
) -> Result<Box<dyn StageOperation>, BuildError> {
    Ok(Box::new(TopOperator::from_args(kind, args)?))
}
