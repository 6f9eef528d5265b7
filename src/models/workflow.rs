//! # Workflow
//!
//! A workflow groups pipelines into a DAG. `WorkflowPipeline` places a pipeline
//! in a workflow and `WorkflowPipelineDependency` declares that one workflow
//! pipeline must complete before another may start.
//!
//! Edges are expected to form a DAG. Cycle detection belongs to whoever builds
//! the edges; nothing here validates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Workflow {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Workflow for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    pub description: String,
}

impl Workflow {
    pub fn new(new_workflow: NewWorkflow) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            name: new_workflow.name,
            description: new_workflow.description,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_visible(&self, include_deleted: bool) -> bool {
        include_deleted || !self.is_deleted
    }
}

/// A pipeline placed inside a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowPipeline {
    pub uuid: Uuid,
    pub workflow_uuid: Uuid,
    pub pipeline_uuid: Uuid,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowPipeline {
    pub fn new(workflow_uuid: Uuid, pipeline_uuid: Uuid) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            workflow_uuid,
            pipeline_uuid,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Directed edge: `to_workflow_pipeline_uuid` depends on `from_workflow_pipeline_uuid`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct WorkflowPipelineDependency {
    pub from_workflow_pipeline_uuid: Uuid,
    pub to_workflow_pipeline_uuid: Uuid,
}

impl WorkflowPipelineDependency {
    pub fn new(from: Uuid, to: Uuid) -> Self {
        Self {
            from_workflow_pipeline_uuid: from,
            to_workflow_pipeline_uuid: to,
        }
    }
}
