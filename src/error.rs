//! Crate-level error type.
//!
//! Each layer keeps its own `thiserror` enum; this type flattens them for
//! callers that only need one error to propagate.

use crate::blob_store::BlobError;
use crate::config::ConfigurationError;
use crate::database::PersistenceError;
use crate::orchestration::{ExecutorError, OrchestrationError};
use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunflowError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Orchestration error: {0}")]
    OrchestrationError(String),
    #[error("Executor error: {0}")]
    ExecutorError(String),
    #[error("Blob storage error: {0}")]
    BlobError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<StateMachineError> for RunflowError {
    fn from(error: StateMachineError) -> Self {
        RunflowError::StateTransitionError(error.to_string())
    }
}

impl From<PersistenceError> for RunflowError {
    fn from(error: PersistenceError) -> Self {
        RunflowError::DatabaseError(error.to_string())
    }
}

impl From<OrchestrationError> for RunflowError {
    fn from(error: OrchestrationError) -> Self {
        match error {
            OrchestrationError::Validation { .. } => {
                RunflowError::ValidationError(error.to_string())
            }
            OrchestrationError::InvalidTransition(inner) => inner.into(),
            OrchestrationError::Persistence(inner) => inner.into(),
            other => RunflowError::OrchestrationError(other.to_string()),
        }
    }
}

impl From<ExecutorError> for RunflowError {
    fn from(error: ExecutorError) -> Self {
        RunflowError::ExecutorError(error.to_string())
    }
}

impl From<BlobError> for RunflowError {
    fn from(error: BlobError) -> Self {
        RunflowError::BlobError(error.to_string())
    }
}

impl From<ConfigurationError> for RunflowError {
    fn from(error: ConfigurationError) -> Self {
        RunflowError::ConfigurationError(error.to_string())
    }
}

impl From<serde_json::Error> for RunflowError {
    fn from(error: serde_json::Error) -> Self {
        RunflowError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for RunflowError {
    fn from(err: sqlx::Error) -> Self {
        RunflowError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RunflowError>;
