//! # Run Executor
//!
//! The external system that actually performs a pipeline run. The
//! orchestrator dispatches runs to it and later receives callbacks; the
//! executor's own implementation is outside this crate.

use crate::models::RunInput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Everything an executor needs to start a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub run_uuid: Uuid,
    pub pipeline_uuid: Uuid,
    pub inputs: Vec<RunInput>,
    pub callback_url: String,
    /// Token the executor must present on every callback for this run
    pub status_update_token: String,
}

/// How far the executor got when it accepted a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Accepted into a queue, not yet executing
    Queued,
    /// Execution has started
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    pub accepted: bool,
    /// Executor-side handle, used when signalling cancellation
    pub token: String,
    pub status: DispatchStatus,
}

impl DispatchAck {
    pub fn running(token: impl Into<String>) -> Self {
        Self {
            accepted: true,
            token: token.into(),
            status: DispatchStatus::Running,
        }
    }

    pub fn queued(token: impl Into<String>) -> Self {
        Self {
            accepted: true,
            token: token.into(),
            status: DispatchStatus::Queued,
        }
    }

    pub fn rejected() -> Self {
        Self {
            accepted: false,
            token: String::new(),
            status: DispatchStatus::Queued,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Executor unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Executor rejected run {run_uuid}")]
    Rejected { run_uuid: Uuid },

    #[error("Executor call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Collaborator that performs pipeline runs
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> ExecutorResult<DispatchAck>;

    /// Ask the executor to stop a run. Best-effort: the run is already
    /// `CANCELLED` when this is called.
    async fn cancel(&self, run_uuid: Uuid, executor_token: Option<&str>) -> ExecutorResult<()>;
}
