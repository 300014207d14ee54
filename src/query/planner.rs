//! Query Planner - turns stage specifications into a stage graph
//!
//! The planner makes a single forward pass over the program:
//!
//! ```text
//! StageSpec[0..n]
//!     │
//!     ▼
//! ┌──────────────────┐
//! │ Resolve inputs   │  explicit names via the symbol table, else the previous stage
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Lift or build    │  fold liftable aggregators into the input select's query,
//! └────────┬─────────┘  otherwise validate args and build a dedicated stage
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Bind + advance   │  record the binding name, move the previous-stage cursor
//! └──────────────────┘
//! ```
//!
//! The symbol table only ever holds stages that were already built, so a
//! spec can't refer to itself or to anything after it and the result is
//! acyclic without any cycle check.
//!
//! # Lifting
//!
//! `select cpu | max period=5m` would naively need a select stage plus a max
//! stage. Instead the max aggregator is appended to the select's backend
//! query and the pair collapses into one select, which is one store
//! round-trip. A select is lifted into at most once; any later aggregate that
//! reads the same select runs as its own stage.

use crate::config::EngineConfig;
use crate::metrics;
use crate::query::args::ArgReader;
use crate::query::error::BuildError;
use crate::query::operators::aggregation::AggregationSpec;
use crate::query::operators::select::SelectOperator;
use crate::query::registry::{self, AggregatorKind};
use crate::query::spec::{StageSpec, StageSpecKind};
use crate::query::stage::{post_order, unknown_argument_warnings, Stage, StageId, StageRef};
use crate::store::{Metric, MetricsQuery};
use crate::types::{Clock, SystemClock, TimeRange};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Planner Configuration
// ============================================================================

/// Defaults applied while building stages
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Window of a select with no explicit or inherited range (default: 60 minutes)
    pub default_lookback: Duration,

    /// Bucket size of sampling aggregators without `period` (default: 1 minute)
    pub default_sampling_period: Duration,

    /// Alert recovery period when not given (default: 0)
    pub default_recovery_period: Duration,

    /// Threshold dwell period when not given (default: 0)
    pub default_dwell_period: Duration,

    /// Data-absence dwell period when not given (default: 1 minute)
    pub data_absent_dwell: Duration,

    /// Staleness margin for data-absence alerts (default: 120 seconds)
    pub freshness_cutoff: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from_engine_config(&EngineConfig::default())
    }
}

impl PlannerConfig {
    /// Take the planner defaults from the engine configuration
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            default_lookback: config.query.default_lookback(),
            default_sampling_period: config.query.default_sampling_period(),
            default_recovery_period: config.alerts.default_recovery_period(),
            default_dwell_period: config.alerts.default_dwell_period(),
            data_absent_dwell: config.alerts.data_absent_dwell(),
            freshness_cutoff: config.alerts.freshness_cutoff(),
        }
    }
}

// ============================================================================
// Stage Graph
// ============================================================================

/// A built program
#[derive(Debug, Clone)]
pub struct StageGraph {
    root: StageRef,
    stages: Vec<StageRef>,
}

impl StageGraph {
    fn new(root: StageRef) -> Self {
        let stages = post_order(&root);
        Self { root, stages }
    }

    /// Stage whose result is the program's result
    pub fn root(&self) -> &StageRef {
        &self.root
    }

    /// Stages that will run, dependencies first
    pub fn stages(&self) -> &[StageRef] {
        &self.stages
    }

    /// Number of stages that will run
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; a graph has at least its root
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Warnings for unrecognised arguments anywhere in the graph
    pub fn warnings(&self) -> Vec<String> {
        unknown_argument_warnings(&self.stages)
    }
}

// ============================================================================
// Query Planner
// ============================================================================

/// Builds stage graphs from programs
pub struct QueryPlanner {
    config: PlannerConfig,
    clock: Arc<dyn Clock>,
}

impl QueryPlanner {
    /// Create a planner with default configuration
    pub fn new() -> Self {
        Self::with_config(PlannerConfig::default())
    }

    /// Create a planner with custom configuration
    pub fn with_config(config: PlannerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for default select windows
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Planner configuration
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build a program
    ///
    /// Fails on the first invalid spec; no partial graph is returned.
    pub fn build(&self, specs: &[StageSpec]) -> Result<StageGraph, BuildError> {
        let result = self.build_graph(specs);
        metrics::record_graph_build(result.is_ok());
        match &result {
            Ok(graph) => debug!(specs = specs.len(), stages = graph.len(), "Stage graph built"),
            Err(e) => debug!(error = %e, "Stage graph build failed"),
        }
        result
    }

    fn build_graph(&self, specs: &[StageSpec]) -> Result<StageGraph, BuildError> {
        let mut state = BuildState::new(self.clock.now());

        for spec in specs {
            let stage = match spec.kind {
                StageSpecKind::Select => self.build_select(spec, &mut state)?,
                StageSpecKind::Aggregate => self.build_aggregate(spec, &mut state)?,
            };
            state.bind(spec.binding_name.as_deref(), stage)?;
        }

        state.previous.map(StageGraph::new).ok_or(BuildError::EmptyProgram)
    }

    fn build_select(&self, spec: &StageSpec, state: &mut BuildState) -> Result<StageRef, BuildError> {
        if spec.explicit_dependencies.is_some() {
            return Err(BuildError::invalid_argument(
                "dependencies",
                "select stages read from the store and take no inputs",
            ));
        }

        let mut args = ArgReader::new(&spec.args);
        let mut metric = Metric::new(spec.operation_name.clone());
        metric.tags = args.optional_tag_filter("tags")?;
        metric.group_by = args.optional_string_list("group_by")?;

        let range = spec
            .explicit_time_range
            .or(state.time_range)
            .unwrap_or_else(|| TimeRange::ending_at(state.now, self.config.default_lookback));
        state.time_range = Some(range);

        let query = MetricsQuery {
            range,
            metrics: vec![metric],
        };
        let stage = Stage::select(
            spec.binding_name.clone(),
            SelectOperator::new(query),
            args.unknown(),
        );
        debug!(stage = %stage.id(), metric = %spec.operation_name, range = %range, "Built select");
        Ok(Arc::new(stage))
    }

    fn build_aggregate(&self, spec: &StageSpec, state: &mut BuildState) -> Result<StageRef, BuildError> {
        let dependencies = state.resolve_dependencies(spec)?;
        let (kind, constructor) = registry::lookup(&spec.operation_name)?;
        if dependencies.is_empty() {
            return Err(BuildError::NoInputStage {
                aggregator: kind.name().to_string(),
            });
        }

        if let Some((select, query)) = state.liftable_input(kind, &dependencies) {
            return self.lift(spec, kind, select, query, state);
        }

        for dependency in dependencies.iter().filter(|d| d.is_select()) {
            state.consumed.insert(dependency.id());
        }

        let mut args = ArgReader::new(&spec.args);
        let operation = constructor(kind, &mut args, &self.config)?;
        let stage = Stage::aggregate(
            spec.binding_name.clone(),
            kind,
            operation,
            dependencies,
            args.unknown(),
        );
        debug!(
            stage = %stage.id(),
            operation = stage.operation().name(),
            inputs = stage.dependencies().len(),
            "Built aggregate"
        );
        Ok(Arc::new(stage))
    }

    /// Replace `select` with a copy whose backend query also runs `kind`
    fn lift(
        &self,
        spec: &StageSpec,
        kind: AggregatorKind,
        select: &StageRef,
        query: &MetricsQuery,
        state: &mut BuildState,
    ) -> Result<StageRef, BuildError> {
        let mut args = ArgReader::new(&spec.args);
        let aggregation =
            AggregationSpec::from_args(kind, &mut args, self.config.default_sampling_period)?;
        let query = query.with_aggregator(aggregation.to_aggregator());
        state.consumed.insert(select.id());

        let stage = Stage::rewritten_select(
            spec.binding_name.clone(),
            SelectOperator::new(query),
            args.unknown(),
            Arc::clone(select),
        );
        metrics::record_lift(kind.name());
        debug!(
            stage = %stage.id(),
            replaces = %select.id(),
            aggregator = kind.name(),
            "Lifted aggregator into select"
        );
        Ok(Arc::new(stage))
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable state of one build pass
struct BuildState {
    symbols: BTreeMap<String, StageRef>,
    previous: Option<StageRef>,
    time_range: Option<TimeRange>,
    /// Selects something already aggregated; they can't be lifted into again
    consumed: HashSet<StageId>,
    now: DateTime<Utc>,
}

impl BuildState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            symbols: BTreeMap::new(),
            previous: None,
            time_range: None,
            consumed: HashSet::new(),
            now,
        }
    }

    fn resolve_dependencies(&self, spec: &StageSpec) -> Result<Vec<StageRef>, BuildError> {
        match &spec.explicit_dependencies {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.symbols
                        .get(name)
                        .cloned()
                        .ok_or_else(|| BuildError::UndefinedStageReference(name.clone()))
                })
                .collect(),
            None => Ok(self.previous.iter().cloned().collect()),
        }
    }

    /// The single unconsumed select `kind` can be folded into, with its query
    fn liftable_input<'d>(
        &self,
        kind: AggregatorKind,
        dependencies: &'d [StageRef],
    ) -> Option<(&'d StageRef, &'d MetricsQuery)> {
        match dependencies {
            [only] if kind.is_liftable() && !self.consumed.contains(&only.id()) => {
                only.select_query().map(|query| (only, query))
            }
            _ => None,
        }
    }

    fn bind(&mut self, name: Option<&str>, stage: StageRef) -> Result<(), BuildError> {
        if let Some(name) = name {
            if self.symbols.contains_key(name) {
                return Err(BuildError::DuplicateStageName(name.to_string()));
            }
            self.symbols.insert(name.to_string(), Arc::clone(&stage));
        }
        self.previous = Some(stage);
        Ok(())
    }
}
