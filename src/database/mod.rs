//! # Run Persistence
//!
//! The [`RunStore`] trait is the only way the orchestrators touch storage.
//!
//! ## Atomicity
//!
//! Run updates are compare-and-swap operations keyed on `version`: the store
//! writes the new row, and the transition history row that describes it, only
//! if the stored version still equals `expected_version`. Otherwise it returns
//! [`PersistenceError::ConcurrentModification`] and writes nothing. Every
//! successful update stores `expected_version + 1`.
//!
//! ## Soft deletes
//!
//! Every `find_*` takes an explicit `include_deleted` flag. With the flag off
//! a run is hidden when either the run or its owner is soft-deleted.
//!
//! ## Implementations
//!
//! - [`InMemoryRunStore`]: `DashMap` backed, used by tests and embedded setups
//! - [`PgRunStore`]: PostgreSQL through `sqlx` (feature `postgres`)

#[cfg(feature = "postgres")]
pub mod connection;
pub mod errors;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod migrations;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::models::{
    NewRunTransition, Pipeline, PipelineRun, RunTransition, Workflow, WorkflowPipeline,
    WorkflowPipelineDependency, WorkflowPipelineRun, WorkflowRun,
};
use async_trait::async_trait;
use uuid::Uuid;

pub use errors::{PersistenceError, PersistenceResult};
#[cfg(feature = "postgres")]
pub use connection::DatabaseConnection;
pub use memory::InMemoryRunStore;
#[cfg(feature = "postgres")]
pub use postgres::PgRunStore;

/// A pipeline run to create as part of a new workflow run
#[derive(Debug, Clone)]
pub struct WorkflowRunMember {
    pub workflow_pipeline_uuid: Uuid,
    pub pipeline_run: PipelineRun,
}

/// Storage collaborator for runs, their owners and their history
#[async_trait]
pub trait RunStore: Send + Sync {
    // Owners

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> PersistenceResult<()>;

    async fn find_pipeline(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<Pipeline>>;

    /// Returns false when the pipeline does not exist
    async fn soft_delete_pipeline(&self, uuid: Uuid) -> PersistenceResult<bool>;

    async fn insert_workflow(&self, workflow: &Workflow) -> PersistenceResult<()>;

    async fn find_workflow(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<Workflow>>;

    async fn soft_delete_workflow(&self, uuid: Uuid) -> PersistenceResult<bool>;

    async fn insert_workflow_pipeline(
        &self,
        workflow_pipeline: &WorkflowPipeline,
    ) -> PersistenceResult<()>;

    async fn find_workflow_pipelines(
        &self,
        workflow_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<WorkflowPipeline>>;

    async fn insert_workflow_pipeline_dependency(
        &self,
        dependency: &WorkflowPipelineDependency,
    ) -> PersistenceResult<()>;

    /// Edges whose source and destination both belong to the workflow
    async fn find_workflow_pipeline_dependencies(
        &self,
        workflow_uuid: Uuid,
    ) -> PersistenceResult<Vec<WorkflowPipelineDependency>>;

    // Pipeline runs

    /// Insert a new run, assigning its `sequence`. Fails with `Duplicate`
    /// when the owner already has a live run with the same idempotency key.
    /// Soft-deleted runs release their key.
    async fn insert_pipeline_run(&self, run: &PipelineRun) -> PersistenceResult<PipelineRun>;

    async fn find_pipeline_run(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<PipelineRun>>;

    /// Runs of a pipeline ordered by `sequence`
    async fn find_pipeline_runs(
        &self,
        pipeline_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<PipelineRun>>;

    /// The live run holding `idempotency_key` for this pipeline
    async fn find_pipeline_run_by_idempotency_key(
        &self,
        pipeline_uuid: Uuid,
        idempotency_key: &str,
    ) -> PersistenceResult<Option<PipelineRun>>;

    /// Compare-and-swap update, optionally appending a transition row
    async fn update_pipeline_run(
        &self,
        run: &PipelineRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<PipelineRun>;

    async fn soft_delete_pipeline_run(&self, uuid: Uuid) -> PersistenceResult<bool>;

    // Workflow runs

    /// Insert a workflow run together with its pipeline runs and links
    async fn insert_workflow_run(
        &self,
        run: &WorkflowRun,
        members: &[WorkflowRunMember],
    ) -> PersistenceResult<Vec<PipelineRun>>;

    async fn find_workflow_run(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<WorkflowRun>>;

    async fn find_workflow_runs(
        &self,
        workflow_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<WorkflowRun>>;

    async fn find_workflow_pipeline_runs(
        &self,
        workflow_run_uuid: Uuid,
    ) -> PersistenceResult<Vec<WorkflowPipelineRun>>;

    /// Workflow membership of a pipeline run, if it belongs to one
    async fn find_workflow_pipeline_run_for(
        &self,
        pipeline_run_uuid: Uuid,
    ) -> PersistenceResult<Option<WorkflowPipelineRun>>;

    async fn update_workflow_run(
        &self,
        run: &WorkflowRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<WorkflowRun>;

    // History

    /// Transition rows of a run ordered by `sort_key`
    async fn find_run_transitions(&self, run_uuid: Uuid) -> PersistenceResult<Vec<RunTransition>>;
}
