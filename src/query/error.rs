//! Query error types
//!
//! Build-time failures ([`BuildError`]) reject a program atomically before
//! anything runs. Run-time failures ([`ExecutionError`]) carry the identity of
//! the stage that produced them so a failed run can be traced back to one
//! node of the graph.

use crate::query::stage::StageId;
use crate::store::StoreError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Build errors
// ============================================================================

/// Failure turning stage specifications into a stage graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// An explicit dependency names a stage that isn't bound yet
    #[error("undefined stage reference '{0}'")]
    UndefinedStageReference(String),

    /// A binding name was used twice
    #[error("duplicate stage name '{0}'")]
    DuplicateStageName(String),

    /// Aggregate operation not in the registry
    #[error("unknown aggregator '{0}'")]
    UnknownAggregator(String),

    /// Required argument missing or violating its constraint
    #[error("illegal value for field {field}; {reason}")]
    InvalidArgument {
        /// Offending argument name
        field: String,
        /// What was wrong with it
        reason: String,
    },

    /// Aggregate with neither explicit dependencies nor a previous stage
    #[error("aggregator '{aggregator}' does not have any inputs")]
    NoInputStage {
        /// Aggregator name
        aggregator: String,
    },

    /// Program with no stages at all
    #[error("program contains no stages")]
    EmptyProgram,
}

impl BuildError {
    /// Create an invalid-argument error
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BuildError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing-argument error
    pub fn missing_argument(field: impl Into<String>) -> Self {
        Self::invalid_argument(field, "is required")
    }
}

// ============================================================================
// Execution errors
// ============================================================================

/// Categories of execution errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// Backing store call failed
    Store,
    /// Stage logic rejected its input
    Operation,
    /// Run was cancelled before the stage finished
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionErrorKind::Store => write!(f, "StoreError"),
            ExecutionErrorKind::Operation => write!(f, "OperationError"),
            ExecutionErrorKind::Cancelled => write!(f, "Cancelled"),
            ExecutionErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Failure while running a stage graph
///
/// Cloneable: when a shared stage fails, every consumer observes the same
/// error.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    /// Error kind for programmatic handling
    pub kind: ExecutionErrorKind,
    /// Human-readable message
    pub message: String,
    stage: Option<StageId>,
    operation: Option<&'static str>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ExecutionError {
    /// Create a new execution error
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
            operation: None,
            source: None,
        }
    }

    /// Wrap a store failure
    pub fn store(err: StoreError) -> Self {
        let message = err.to_string();
        Self::new(ExecutionErrorKind::Store, message).with_source(err)
    }

    /// Create an operation error
    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Operation, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Cancelled, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Internal, message)
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attach the originating stage, keeping an already attached one
    pub fn with_stage(mut self, stage: StageId, operation: &'static str) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage);
            self.operation = Some(operation);
        }
        self
    }

    /// Stage that produced the error
    pub fn stage(&self) -> Option<StageId> {
        self.stage
    }

    /// Operation name of the stage that produced the error
    pub fn operation_name(&self) -> Option<&'static str> {
        self.operation
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.stage, self.operation) {
            (Some(stage), Some(op)) => {
                write!(f, "{} in {} ({}): {}", self.kind, stage, op, self.message)
            }
            _ => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
