//! Kuba MQL - stage-graph query engine for metrics alerting
//!
//! This library evaluates metrics query programs against a pluggable
//! time-series store:
//! - Graph building with name resolution and atomic error reporting
//! - Aggregator lifting that folds aggregations into backend queries
//! - Concurrent, memoized stage execution on tokio
//! - Threshold and data-absence alert windows with dwell and recovery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber initialisation
pub mod logging;

/// Backing time-series store seam and the in-memory reference store
pub mod store;

/// Stage graph building and execution
pub mod query;

/// Alert evaluators run as graph stages
pub mod alert;

// Re-export main types
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use query::{QueryEngine, StageGraph, StageSpec, TimeSeriesResult};
pub use store::{InMemoryStore, TimeSeriesStore};
pub use types::TimeRange;
