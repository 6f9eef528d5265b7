//! # Orchestration Errors
//!
//! Error taxonomy returned by the run and workflow orchestrators.
//!
//! - `NotFound`: the run or its owner is missing or soft-deleted
//! - `InvalidTransition`: illegal or duplicate transition, including any
//!   attempt to leave a terminal state
//! - `Validation`: malformed request or callback
//! - `ExecutorUnavailable`: dispatch failed, was rejected or timed out; the
//!   run keeps its previous state
//! - `WorkflowOwned`: a pipeline-run operation was aimed at a workflow member
//!
//! None of these are fatal. A rejected transition is an expected outcome.

use crate::blob_store::BlobError;
use crate::database::PersistenceError;
use crate::orchestration::run_executor::ExecutorError;
use crate::state_machine::StateMachineError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("{entity} not found: {uuid}")]
    NotFound { entity: &'static str, uuid: Uuid },

    #[error(transparent)]
    InvalidTransition(#[from] StateMachineError),

    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Executor unavailable for run {run_uuid}: {source}")]
    ExecutorUnavailable {
        run_uuid: Uuid,
        #[source]
        source: ExecutorError,
    },

    #[error(
        "Pipeline run {run_uuid} belongs to workflow run {workflow_run_uuid}; \
         use the workflow orchestrator"
    )]
    WorkflowOwned {
        run_uuid: Uuid,
        workflow_run_uuid: Uuid,
    },

    #[error("Gave up updating {entity} {uuid} after {attempts} concurrent modifications")]
    ConcurrencyRetriesExhausted {
        entity: &'static str,
        uuid: Uuid,
        attempts: u32,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),
}

impl OrchestrationError {
    pub fn not_found(entity: &'static str, uuid: Uuid) -> Self {
        Self::NotFound { entity, uuid }
    }

    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn executor_unavailable(run_uuid: Uuid, source: ExecutorError) -> Self {
        Self::ExecutorUnavailable { run_uuid, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition(StateMachineError::InvalidTransition { .. })
        )
    }

    pub fn is_workflow_owned(&self) -> bool {
        matches!(self, Self::WorkflowOwned { .. })
    }

    pub fn is_executor_unavailable(&self) -> bool {
        matches!(self, Self::ExecutorUnavailable { .. })
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
