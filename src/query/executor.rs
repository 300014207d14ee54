//! Execution Driver - runs a stage graph
//!
//! Every stage reachable from the root runs as its own tokio task, spawned
//! into one [`JoinSet`]. A stage publishes its outcome exactly once on a
//! `watch` channel; consumers wait on the channels of all their
//! dependencies, then run their own operation against the collected results.
//!
//! ```text
//!   select a ─┐
//!             ├─▶ union ─▶ threshold      a, b run concurrently
//!   select b ─┘                           union waits on both
//! ```
//!
//! Properties:
//! - A stage runs at most once per execution, however many consumers it has.
//!   Consumers share its result through an `Arc`.
//! - A failed dependency is forwarded to every transitive consumer without
//!   running their operations; the run fails with the first failure.
//! - Dropping the execution future drops the `JoinSet`, which aborts every
//!   in-flight stage and abandons those not yet started.
//! - The driver has no deadline of its own; see
//!   [`QueryEngine::run_with_timeout`](crate::query::engine::QueryEngine::run_with_timeout).

use crate::config::ExecutorSettings;
use crate::metrics;
use crate::query::error::ExecutionError;
use crate::query::result::TimeSeriesResult;
use crate::query::stage::{
    post_order, unknown_argument_warnings, DependencyResults, StageContext, StageId, StageRef,
};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

type StageOutcome = Result<Arc<TimeSeriesResult>, ExecutionError>;
type OutcomeReceiver = watch::Receiver<Option<StageOutcome>>;

// ============================================================================
// Executor Configuration
// ============================================================================

/// Configuration for graph execution
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Maximum number of stage operations running at once; 0 is unbounded
    pub max_concurrent_stages: usize,
}

impl ExecutorConfig {
    /// Create a new executor config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how many stage operations run at once
    pub fn with_max_concurrent_stages(mut self, limit: usize) -> Self {
        self.max_concurrent_stages = limit;
        self
    }
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(settings: &ExecutorSettings) -> Self {
        Self::new().with_max_concurrent_stages(settings.max_concurrent_stages)
    }
}

// ============================================================================
// Execution Driver
// ============================================================================

/// Runs stage graphs against one store and clock
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    config: ExecutorConfig,
    context: StageContext,
}

impl ExecutionDriver {
    /// Create a driver
    pub fn new(context: StageContext) -> Self {
        Self::with_config(context, ExecutorConfig::default())
    }

    /// Create a driver with custom configuration
    pub fn with_config(context: StageContext, config: ExecutorConfig) -> Self {
        Self { config, context }
    }

    /// Execution context handed to every stage
    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Run `root` and everything it depends on
    ///
    /// Warnings for unrecognised arguments anywhere in the graph are attached
    /// to the returned result.
    pub async fn execute(&self, root: &StageRef) -> Result<TimeSeriesResult, ExecutionError> {
        let stages = post_order(root);
        let span = info_span!("program", root = %root.id(), stages = stages.len());
        let started = Instant::now();

        let result = self.run_stages(root, &stages).instrument(span.clone()).await;

        span.in_scope(|| match result {
            Ok(result) => {
                let warnings = unknown_argument_warnings(&stages);
                for warning in &warnings {
                    debug!(%warning, "Build warning");
                }
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Program finished");
                Ok(TimeSeriesResult::clone(&result).with_warnings(warnings))
            }
            Err(e) => {
                warn!(error = %e, "Program failed");
                Err(e)
            }
        })
    }

    async fn run_stages(&self, root: &StageRef, stages: &[StageRef]) -> StageOutcome {
        let limiter = match self.config.max_concurrent_stages {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };

        let mut receivers: HashMap<StageId, OutcomeReceiver> = HashMap::with_capacity(stages.len());
        let mut tasks = JoinSet::new();

        // Post-order: every dependency's channel exists before its consumers are spawned
        for stage in stages {
            let (sender, receiver) = watch::channel(None);
            let inputs: Vec<(StageId, OutcomeReceiver)> = stage
                .dependencies()
                .iter()
                .filter_map(|d| receivers.get(&d.id()).map(|rx| (d.id(), rx.clone())))
                .collect();
            receivers.insert(stage.id(), receiver);

            let span = info_span!("stage", stage = %stage.id(), operation = stage.operation().name());
            let stage = Arc::clone(stage);
            let context = self.context.clone();
            let limiter = limiter.clone();
            tasks.spawn(
                async move {
                    let outcome = run_stage(&stage, &context, inputs, limiter).await;
                    // Nobody listening means the run is already over
                    let _ = sender.send(Some(outcome));
                }
                .instrument(span),
            );
        }

        let root_receiver = receivers
            .remove(&root.id())
            .ok_or_else(|| ExecutionError::internal("root stage was not scheduled"))?;
        drop(receivers);

        let outcome = wait_for(root_receiver).await;
        // Remaining tasks only exist if the root failed early; stop them
        tasks.abort_all();
        outcome
    }
}

async fn wait_for(mut receiver: OutcomeReceiver) -> StageOutcome {
    let published = match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => {
            return Err(ExecutionError::cancelled(
                "stage stopped before publishing a result",
            ))
        }
    };
    published.unwrap_or_else(|| Err(ExecutionError::internal("stage published an empty outcome")))
}

async fn run_stage(
    stage: &StageRef,
    context: &StageContext,
    inputs: Vec<(StageId, OutcomeReceiver)>,
    limiter: Option<Arc<Semaphore>>,
) -> StageOutcome {
    let operation = stage.operation();

    let completed = try_join_all(
        inputs
            .into_iter()
            .map(|(id, receiver)| async move { wait_for(receiver).await.map(|r| (id, r)) }),
    )
    .await;
    let completed = match completed {
        Ok(completed) => completed,
        Err(e) => {
            debug!(error = %e, "Skipping stage, dependency failed");
            return Err(e);
        }
    };

    let mut dependencies = DependencyResults::new();
    for (id, result) in completed {
        dependencies.insert(id, result);
    }

    let _permit = match &limiter {
        Some(semaphore) => Some(
            Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ExecutionError::cancelled("stage limiter closed"))?,
        ),
        None => None,
    };

    debug!(inputs = dependencies.len(), "Stage started");
    let started = Instant::now();
    let result = operation.execute(context, &dependencies).await;
    let elapsed = started.elapsed();
    metrics::record_stage(operation.name(), elapsed.as_secs_f64(), result.is_ok());

    match result {
        Ok(result) => {
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                series = result.series().count(),
                "Stage finished"
            );
            Ok(Arc::new(result))
        }
        Err(e) => {
            let e = e.with_stage(stage.id(), operation.name());
            warn!(error = %e, "Stage failed");
            Err(e)
        }
    }
}
