//! Stages: the nodes of the execution graph
//!
//! A [`Stage`] pairs an operation with the stages it depends on. Dependencies
//! are held as [`StageRef`]s (shared pointers), never names, and a stage can
//! only be built from stages that already exist, so every graph is acyclic by
//! construction.

use crate::query::error::ExecutionError;
use crate::query::operators::select::SelectOperator;
use crate::query::registry::AggregatorKind;
use crate::query::result::TimeSeriesResult;
use crate::store::{MetricsQuery, TimeSeriesStore};
use crate::types::Clock;
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to a built stage
pub type StageRef = Arc<Stage>;

// ============================================================================
// Stage identity
// ============================================================================

static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stage identity
///
/// Execution memoizes by this id, not by structural equality: two selects
/// with identical queries are still two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl StageId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage-{}", self.0)
    }
}

// ============================================================================
// Operation seam
// ============================================================================

/// Everything a stage operation may touch while running
#[derive(Clone)]
pub struct StageContext {
    /// Backing store for select stages
    pub store: Arc<dyn TimeSeriesStore>,
    /// Evaluation instant for alert staleness checks
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext").finish_non_exhaustive()
    }
}

/// Completed results of a stage's dependencies, in declaration order
#[derive(Debug, Default, Clone)]
pub struct DependencyResults {
    order: Vec<StageId>,
    results: HashMap<StageId, Arc<TimeSeriesResult>>,
}

impl DependencyResults {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dependency's result
    ///
    /// A stage listed twice as a dependency is recorded once.
    pub fn insert(&mut self, stage: StageId, result: Arc<TimeSeriesResult>) {
        if let Entry::Vacant(slot) = self.results.entry(stage) {
            slot.insert(result);
            self.order.push(stage);
        }
    }

    /// Result of one dependency
    pub fn get(&self, stage: StageId) -> Option<&TimeSeriesResult> {
        self.results.get(&stage).map(Arc::as_ref)
    }

    /// Results in dependency declaration order
    pub fn iter(&self) -> impl Iterator<Item = &TimeSeriesResult> {
        self.order
            .iter()
            .filter_map(move |id| self.results.get(id).map(Arc::as_ref))
    }

    /// Number of dependencies
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when the stage has no dependencies
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Stage logic
///
/// Implementations are pure functions of their inputs apart from select
/// stages, which call the backing store.
#[async_trait]
pub trait StageOperation: Send + Sync + fmt::Debug {
    /// Short operation name for logs and metrics
    fn name(&self) -> &'static str;

    /// Produce this stage's result from its dependencies' results
    async fn execute(
        &self,
        ctx: &StageContext,
        inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError>;
}

// ============================================================================
// Stage
// ============================================================================

/// What a stage does
#[derive(Debug)]
pub enum StageKind {
    /// Leaf read from the backing store
    Select(SelectOperator),
    /// Any aggregator that runs as its own node
    Aggregate {
        /// Registry kind
        aggregator: AggregatorKind,
        /// Operation built from the stage arguments
        operation: Box<dyn StageOperation>,
    },
}

/// One node of the execution graph
#[derive(Debug)]
pub struct Stage {
    id: StageId,
    name: Option<String>,
    kind: StageKind,
    dependencies: Vec<StageRef>,
    unknown_args: Vec<String>,
    rewritten_from: Option<StageRef>,
}

impl Stage {
    /// Create a select stage
    pub fn select(name: Option<String>, operator: SelectOperator, unknown_args: Vec<String>) -> Self {
        Self {
            id: StageId::next(),
            name,
            kind: StageKind::Select(operator),
            dependencies: Vec::new(),
            unknown_args,
            rewritten_from: None,
        }
    }

    /// Create a select stage that replaces `original` with a rewritten query
    ///
    /// `original` is not a dependency; it is kept so its unknown-argument
    /// warnings still reach the final result.
    pub fn rewritten_select(
        name: Option<String>,
        operator: SelectOperator,
        unknown_args: Vec<String>,
        original: StageRef,
    ) -> Self {
        Self {
            rewritten_from: Some(original),
            ..Self::select(name, operator, unknown_args)
        }
    }

    /// Create a dedicated aggregate stage
    pub fn aggregate(
        name: Option<String>,
        aggregator: AggregatorKind,
        operation: Box<dyn StageOperation>,
        dependencies: Vec<StageRef>,
        unknown_args: Vec<String>,
    ) -> Self {
        Self {
            id: StageId::next(),
            name,
            kind: StageKind::Aggregate {
                aggregator,
                operation,
            },
            dependencies,
            unknown_args,
            rewritten_from: None,
        }
    }

    /// Stage identity
    pub fn id(&self) -> StageId {
        self.id
    }

    /// Binding name, if the program named this stage
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// What this stage does
    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    /// Direct dependencies in declaration order
    pub fn dependencies(&self) -> &[StageRef] {
        &self.dependencies
    }

    /// Argument keys the stage's operation did not recognise
    pub fn unknown_args(&self) -> &[String] {
        &self.unknown_args
    }

    /// Select this stage was rewritten from by lifting
    pub fn rewritten_from(&self) -> Option<&StageRef> {
        self.rewritten_from.as_ref()
    }

    /// Operation to run
    pub fn operation(&self) -> &dyn StageOperation {
        match &self.kind {
            StageKind::Select(select) => select,
            StageKind::Aggregate { operation, .. } => operation.as_ref(),
        }
    }

    /// Backend query for select stages
    pub fn select_query(&self) -> Option<&MetricsQuery> {
        match &self.kind {
            StageKind::Select(select) => Some(select.query()),
            StageKind::Aggregate { .. } => None,
        }
    }

    /// Registry kind for aggregate stages
    pub fn aggregator(&self) -> Option<AggregatorKind> {
        match &self.kind {
            StageKind::Select(_) => None,
            StageKind::Aggregate { aggregator, .. } => Some(*aggregator),
        }
    }

    /// True for leaf selects
    pub fn is_select(&self) -> bool {
        matches!(self.kind, StageKind::Select(_))
    }

    /// Label used in logs
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} '{}'", self.operation().name(), name),
            None => self.operation().name().to_string(),
        }
    }
}

// ============================================================================
// Graph traversal
// ============================================================================

/// Every stage reachable from `root` through dependencies, each once,
/// dependencies before their consumers
pub fn post_order(root: &StageRef) -> Vec<StageRef> {
    fn visit(stage: &StageRef, seen: &mut HashSet<StageId>, out: &mut Vec<StageRef>) {
        if !seen.insert(stage.id()) {
            return;
        }
        for dependency in stage.dependencies() {
            visit(dependency, seen, out);
        }
        out.push(Arc::clone(stage));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(root, &mut seen, &mut out);
    out
}

/// One `Unknown argument <key>` warning per unrecognised key
///
/// Selects replaced by lifting still report the keys they were built with.
pub fn unknown_argument_warnings(stages: &[StageRef]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut warnings = Vec::new();
    for stage in stages {
        let mut current = Some(stage);
        while let Some(s) = current {
            if !seen.insert(s.id()) {
                break;
            }
            warnings.extend(s.unknown_args().iter().map(|key| format!("Unknown argument {}", key)));
            current = s.rewritten_from();
        }
    }
    warnings
}
