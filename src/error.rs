//! Error types for the query engine

use crate::query::error::{BuildError, ExecutionError};
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Program could not be turned into a stage graph
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Stage graph failed while running
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Backing store failure surfaced outside of a stage
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Program did not finish before the caller's deadline
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_converts() {
        let err: Error = BuildError::DuplicateStageName("cpu".to_string()).into();
        assert!(matches!(err, Error::Build(_)));
        assert!(err.to_string().contains("cpu"));
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Execution timed out after 5s");
    }
}
