//! # Workflow Run
//!
//! One execution attempt of a workflow. A workflow run owns one pipeline run
//! per workflow pipeline, linked through [`WorkflowPipelineRun`]. Its own
//! state is the aggregate of those pipeline runs and moves through the same
//! transition engine as any pipeline run.

use crate::models::run_transition::RunKind;
use crate::state_machine::{RunState, Transitionable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub uuid: Uuid,
    pub workflow_uuid: Uuid,
    pub state: RunState,
    pub version: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(workflow_uuid: Uuid) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            workflow_uuid,
            state: RunState::NotStarted,
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

impl Transitionable for WorkflowRun {
    fn run_uuid(&self) -> Uuid {
        self.uuid
    }

    fn run_kind(&self) -> RunKind {
        RunKind::Workflow
    }

    fn state(&self) -> RunState {
        self.state
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_state(&mut self, to: RunState, at: DateTime<Utc>) {
        self.state = to;
        self.updated_at = at;
        self.version += 1;
        if to == RunState::Running && self.started_at.is_none() {
            self.started_at = Some(at);
        }
        if to.in_final_state() {
            self.completed_at = Some(at);
        }
    }
}

/// Link between a workflow run, one of its workflow pipelines, and the
/// pipeline run executing that pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WorkflowPipelineRun {
    pub workflow_run_uuid: Uuid,
    pub workflow_pipeline_uuid: Uuid,
    pub pipeline_run_uuid: Uuid,
}
