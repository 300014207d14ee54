//! Stage-graph query engine
//!
//! A program is a list of [`StageSpec`]s. The planner turns it into a graph
//! of stages, folding aggregators into selects where it can, and the driver
//! runs that graph concurrently.
//!
//! # Architecture
//!
//! ```text
//! StageSpec list (from the parser)
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Plan      │  Name resolution, argument validation, lifting
//! └─────────────┘
//!      │ StageGraph
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  One task per stage, fan-in on dependency completion
//! └─────────────┘
//!      │
//!      ▼
//! TimeSeriesResult (+ warnings)
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_mql::query::{QueryPlanner, StageSpec};
//!
//! let graph = QueryPlanner::new()
//!     .build(&[
//!         StageSpec::select("cpu").arg("group_by", serde_json::json!(["host"])),
//!         StageSpec::aggregate("max").arg("period", "5m"),
//!     ])
//!     .unwrap();
//!
//! // `max` was lifted into the select: one stage, one store round-trip
//! assert_eq!(graph.len(), 1);
//! assert_eq!(graph.root().select_query().unwrap().metrics[0].aggregators[0].name, "max");
//! ```

pub mod args;
pub mod engine;
pub mod error;
pub mod executor;
pub mod operators;
pub mod planner;
pub mod registry;
pub mod result;
pub mod spec;
pub mod stage;

// Re-export main types
pub use engine::QueryEngine;
pub use error::{BuildError, ExecutionError, ExecutionErrorKind};
pub use executor::{ExecutionDriver, ExecutorConfig};
pub use operators::{
    AggregateOperator, AggregationFunction, AggregationSpec, DiffOperator, SelectOperator,
    TopOperator, UnionOperator,
};
pub use planner::{PlannerConfig, QueryPlanner, StageGraph};
pub use registry::AggregatorKind;
pub use result::{
    AlertTrigger, DataPoint, DataValue, GroupBy, Query, SeriesResult, TimeSeriesResult,
};
pub use spec::{StageSpec, StageSpecKind};
pub use stage::{
    DependencyResults, Stage, StageContext, StageId, StageKind, StageOperation, StageRef,
};
