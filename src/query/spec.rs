//! Stage specifications
//!
//! A program is an ordered list of [`StageSpec`]s produced by the query
//! parser. Specs reference each other by binding name only; the planner
//! resolves names into stage pointers.
//!
//! # Example
//!
//! ```rust
//! use kuba_mql::query::spec::StageSpec;
//!
//! let program = vec![
//!     StageSpec::select("cpu").named("raw").arg("tags", serde_json::json!({"host": "a"})),
//!     StageSpec::aggregate("max").arg("period", "5m"),
//!     StageSpec::aggregate("threshold")
//!         .arg("threshold", 90)
//!         .arg("operator", ">"),
//! ];
//! assert_eq!(program[0].binding_name.as_deref(), Some("raw"));
//! ```

use crate::types::TimeRange;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Whether a spec reads from the store or transforms other stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSpecKind {
    /// Leaf read of a metric
    Select,
    /// Aggregator applied to earlier stages
    Aggregate,
}

/// One stage of a program, as produced by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Name later specs may refer to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_name: Option<String>,
    /// Select or aggregate
    pub kind: StageSpecKind,
    /// Metric name for selects, aggregator name otherwise
    pub operation_name: String,
    /// Operation arguments; unknown keys are kept and reported as warnings
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    /// Names of the stages to read from, instead of the previous stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_dependencies: Option<Vec<String>>,
    /// Select window; inherited from earlier selects when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_time_range: Option<TimeRange>,
}

impl StageSpec {
    fn new(kind: StageSpecKind, operation_name: impl Into<String>) -> Self {
        Self {
            binding_name: None,
            kind,
            operation_name: operation_name.into(),
            args: BTreeMap::new(),
            explicit_dependencies: None,
            explicit_time_range: None,
        }
    }

    /// Select of a metric
    pub fn select(metric: impl Into<String>) -> Self {
        Self::new(StageSpecKind::Select, metric)
    }

    /// Aggregator stage
    pub fn aggregate(aggregator: impl Into<String>) -> Self {
        Self::new(StageSpecKind::Aggregate, aggregator)
    }

    /// Bind a name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.binding_name = Some(name.into());
        self
    }

    /// Add an argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Read from the named stages
    pub fn of<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_dependencies = Some(dependencies.into_iter().map(Into::into).collect());
        self
    }

    /// Set the select window
    pub fn range(mut self, range: TimeRange) -> Self {
        self.explicit_time_range = Some(range);
        self
    }

    /// True for select specs
    pub fn is_select(&self) -> bool {
        self.kind == StageSpecKind::Select
    }
}
