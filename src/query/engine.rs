//! Query engine facade
//!
//! Ties the planner and the execution driver to one store, clock and
//! configuration. Callers hand in parsed programs and get results back:
//!
//! ```rust,no_run
//! use kuba_mql::{EngineConfig, InMemoryStore, QueryEngine, StageSpec};
//! use std::sync::Arc;
//!
//! # async fn run() -> kuba_mql::Result<()> {
//! let engine = QueryEngine::new(Arc::new(InMemoryStore::new()), EngineConfig::default())?;
//! let result = engine
//!     .run(&[
//!         StageSpec::select("cpu"),
//!         StageSpec::aggregate("threshold").arg("threshold", 90).arg("operator", ">"),
//!     ])
//!     .await?;
//! println!("{} alerts", result.alert_count());
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::query::error::{BuildError, ExecutionError};
use crate::query::executor::{ExecutionDriver, ExecutorConfig};
use crate::query::planner::{PlannerConfig, QueryPlanner, StageGraph};
use crate::query::result::TimeSeriesResult;
use crate::query::spec::StageSpec;
use crate::query::stage::StageContext;
use crate::store::TimeSeriesStore;
use crate::types::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Builds and runs programs against one backing store
pub struct QueryEngine {
    config: EngineConfig,
    planner: QueryPlanner,
    driver: ExecutionDriver,
}

impl QueryEngine {
    /// Create an engine
    ///
    /// Fails when `config` does not validate.
    pub fn new(store: Arc<dyn TimeSeriesStore>, config: EngineConfig) -> Result<Self> {
        config.validate().map_err(Error::Configuration)?;
        metrics::set_enabled(config.monitoring.metrics_enabled);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let planner = QueryPlanner::with_config(PlannerConfig::from_engine_config(&config))
            .with_clock(Arc::clone(&clock));
        let driver = ExecutionDriver::with_config(
            StageContext { store, clock },
            ExecutorConfig::from(&config.executor),
        );

        info!(
            max_concurrent_stages = config.executor.max_concurrent_stages,
            timeout_secs = config.executor.timeout_secs,
            "Query engine created"
        );
        Ok(Self {
            config,
            planner,
            driver,
        })
    }

    /// Use `clock` for default windows and alert staleness
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        let planner = self.planner.with_clock(Arc::clone(&clock));
        let context = StageContext {
            store: Arc::clone(&self.driver.context().store),
            clock,
        };
        let driver = ExecutionDriver::with_config(context, ExecutorConfig::from(&self.config.executor));
        Self {
            config: self.config,
            planner,
            driver,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build a program into a stage graph
    pub fn build(&self, specs: &[StageSpec]) -> std::result::Result<StageGraph, BuildError> {
        self.planner.build(specs)
    }

    /// Run a built graph
    pub async fn execute(&self, graph: &StageGraph) -> std::result::Result<TimeSeriesResult, ExecutionError> {
        self.driver.execute(graph.root()).await
    }

    /// Build and run a program
    pub async fn run(&self, specs: &[StageSpec]) -> Result<TimeSeriesResult> {
        let graph = self.build(specs)?;
        Ok(self.execute(&graph).await?)
    }

    /// Build and run a program, giving up after `timeout`
    ///
    /// On expiry every in-flight stage is cancelled and no partial result is
    /// returned.
    pub async fn run_with_timeout(&self, specs: &[StageSpec], timeout: Duration) -> Result<TimeSeriesResult> {
        match tokio::time::timeout(timeout, self.run(specs)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Program timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// [`run_with_timeout`](Self::run_with_timeout) with the configured deadline
    pub async fn run_with_config_timeout(&self, specs: &[StageSpec]) -> Result<TimeSeriesResult> {
        let timeout = Duration::from_secs(self.config.executor.timeout_secs);
        self.run_with_timeout(specs, timeout).await
    }
}
