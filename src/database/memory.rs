//! In-process [`RunStore`] backed by `DashMap`.
//!
//! Per-run compare-and-swap happens under the map's shard write lock, so two
//! updates of the same run serialize while updates of different runs proceed
//! in parallel. Inserts that assign a per-pipeline `sequence` take a short
//! store-wide mutex.

use super::{PersistenceError, PersistenceResult, RunStore, WorkflowRunMember};
use crate::models::{
    NewRunTransition, Pipeline, PipelineRun, RunTransition, Workflow, WorkflowPipeline,
    WorkflowPipelineDependency, WorkflowPipelineRun, WorkflowRun,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    pipelines: DashMap<Uuid, Pipeline>,
    workflows: DashMap<Uuid, Workflow>,
    workflow_pipelines: DashMap<Uuid, WorkflowPipeline>,
    dependencies: RwLock<Vec<WorkflowPipelineDependency>>,
    pipeline_runs: DashMap<Uuid, PipelineRun>,
    workflow_runs: DashMap<Uuid, WorkflowRun>,
    workflow_pipeline_runs: RwLock<Vec<WorkflowPipelineRun>>,
    transitions: DashMap<Uuid, Vec<RunTransition>>,
    insert_lock: Mutex<()>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pipeline_visible(&self, pipeline_uuid: Uuid) -> bool {
        self.pipelines
            .get(&pipeline_uuid)
            .map(|pipeline| !pipeline.is_deleted)
            .unwrap_or(false)
    }

    fn workflow_visible(&self, workflow_uuid: Uuid) -> bool {
        self.workflows
            .get(&workflow_uuid)
            .map(|workflow| !workflow.is_deleted)
            .unwrap_or(false)
    }

    fn pipeline_run_visible(&self, run: &PipelineRun, include_deleted: bool) -> bool {
        include_deleted || (!run.is_deleted && self.pipeline_visible(run.pipeline_uuid))
    }

    fn workflow_run_visible(&self, run: &WorkflowRun, include_deleted: bool) -> bool {
        include_deleted || (!run.is_deleted && self.workflow_visible(run.workflow_uuid))
    }

    fn append_transition(&self, transition: NewRunTransition) {
        let mut history = self.transitions.entry(transition.run_uuid).or_default();
        for row in history.iter_mut() {
            row.most_recent = false;
        }
        let sort_key = history.len() as i32 + 1;
        history.push(transition.into_transition(sort_key));
    }

    /// Caller must hold `insert_lock`
    fn insert_pipeline_run_locked(&self, run: &PipelineRun) -> PersistenceResult<PipelineRun> {
        if self.pipeline_runs.contains_key(&run.uuid) {
            return Err(PersistenceError::Duplicate {
                entity: "pipeline_run",
                key: run.uuid.to_string(),
            });
        }

        let mut max_sequence = 0;
        for existing in self.pipeline_runs.iter() {
            if existing.pipeline_uuid != run.pipeline_uuid {
                continue;
            }
            max_sequence = max_sequence.max(existing.sequence);
            if existing.is_deleted {
                // Soft-deleted runs release their idempotency key
                continue;
            }
            if let (Some(key), Some(existing_key)) =
                (&run.idempotency_key, &existing.idempotency_key)
            {
                if key == existing_key {
                    return Err(PersistenceError::Duplicate {
                        entity: "pipeline_run",
                        key: key.clone(),
                    });
                }
            }
        }

        let mut stored = run.clone();
        stored.sequence = max_sequence + 1;
        self.pipeline_runs.insert(stored.uuid, stored.clone());
        Ok(stored)
    }

    fn insert_pipeline_run_sync(&self, run: &PipelineRun) -> PersistenceResult<PipelineRun> {
        let _guard = self.insert_lock.lock();
        self.insert_pipeline_run_locked(run)
    }

    fn insert_workflow_run_sync(
        &self,
        run: &WorkflowRun,
        members: &[WorkflowRunMember],
    ) -> PersistenceResult<Vec<PipelineRun>> {
        let _guard = self.insert_lock.lock();
        if self.workflow_runs.contains_key(&run.uuid) {
            return Err(PersistenceError::Duplicate {
                entity: "workflow_run",
                key: run.uuid.to_string(),
            });
        }

        let mut inserted = Vec::with_capacity(members.len());
        for member in members {
            match self.insert_pipeline_run_locked(&member.pipeline_run) {
                Ok(stored) => inserted.push(stored),
                Err(err) => {
                    // Roll back the members inserted so far
                    for stored in &inserted {
                        self.pipeline_runs.remove(&stored.uuid);
                    }
                    return Err(err);
                }
            }
        }

        self.workflow_runs.insert(run.uuid, run.clone());
        self.workflow_pipeline_runs
            .write()
            .extend(members.iter().map(|member| WorkflowPipelineRun {
                workflow_run_uuid: run.uuid,
                workflow_pipeline_uuid: member.workflow_pipeline_uuid,
                pipeline_run_uuid: member.pipeline_run.uuid,
            }));

        Ok(inserted)
    }

    fn update_pipeline_run_sync(
        &self,
        run: &PipelineRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<PipelineRun> {
        let mut entry =
            self.pipeline_runs
                .get_mut(&run.uuid)
                .ok_or(PersistenceError::RecordNotFound {
                    entity: "pipeline_run",
                    uuid: run.uuid,
                })?;

        if entry.version != expected_version {
            return Err(PersistenceError::ConcurrentModification {
                entity: "pipeline_run",
                uuid: run.uuid,
                expected_version,
            });
        }

        let mut stored = run.clone();
        stored.version = expected_version + 1;
        stored.pipeline_uuid = entry.pipeline_uuid;
        stored.sequence = entry.sequence;
        stored.created_at = entry.created_at;
        stored.is_deleted = entry.is_deleted;

        if let Some(transition) = transition {
            self.append_transition(transition);
        }
        *entry = stored.clone();
        Ok(stored)
    }

    fn update_workflow_run_sync(
        &self,
        run: &WorkflowRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<WorkflowRun> {
        let mut entry =
            self.workflow_runs
                .get_mut(&run.uuid)
                .ok_or(PersistenceError::RecordNotFound {
                    entity: "workflow_run",
                    uuid: run.uuid,
                })?;

        if entry.version != expected_version {
            return Err(PersistenceError::ConcurrentModification {
                entity: "workflow_run",
                uuid: run.uuid,
                expected_version,
            });
        }

        let mut stored = run.clone();
        stored.version = expected_version + 1;
        stored.workflow_uuid = entry.workflow_uuid;
        stored.created_at = entry.created_at;
        stored.is_deleted = entry.is_deleted;

        if let Some(transition) = transition {
            self.append_transition(transition);
        }
        *entry = stored.clone();
        Ok(stored)
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline) -> PersistenceResult<()> {
        if self.pipelines.contains_key(&pipeline.uuid) {
            return Err(PersistenceError::Duplicate {
                entity: "pipeline",
                key: pipeline.uuid.to_string(),
            });
        }
        self.pipelines.insert(pipeline.uuid, pipeline.clone());
        Ok(())
    }

    async fn find_pipeline(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<Pipeline>> {
        Ok(self
            .pipelines
            .get(&uuid)
            .map(|pipeline| pipeline.value().clone())
            .filter(|pipeline| pipeline.is_visible(include_deleted)))
    }

    async fn soft_delete_pipeline(&self, uuid: Uuid) -> PersistenceResult<bool> {
        Ok(match self.pipelines.get_mut(&uuid) {
            Some(mut pipeline) => {
                pipeline.is_deleted = true;
                pipeline.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> PersistenceResult<()> {
        if self.workflows.contains_key(&workflow.uuid) {
            return Err(PersistenceError::Duplicate {
                entity: "workflow",
                key: workflow.uuid.to_string(),
            });
        }
        self.workflows.insert(workflow.uuid, workflow.clone());
        Ok(())
    }

    async fn find_workflow(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<Workflow>> {
        Ok(self
            .workflows
            .get(&uuid)
            .map(|workflow| workflow.value().clone())
            .filter(|workflow| workflow.is_visible(include_deleted)))
    }

    async fn soft_delete_workflow(&self, uuid: Uuid) -> PersistenceResult<bool> {
        Ok(match self.workflows.get_mut(&uuid) {
            Some(mut workflow) => {
                workflow.is_deleted = true;
                workflow.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn insert_workflow_pipeline(
        &self,
        workflow_pipeline: &WorkflowPipeline,
    ) -> PersistenceResult<()> {
        self.workflow_pipelines
            .insert(workflow_pipeline.uuid, workflow_pipeline.clone());
        Ok(())
    }

    async fn find_workflow_pipelines(
        &self,
        workflow_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<WorkflowPipeline>> {
        let mut found: Vec<WorkflowPipeline> = self
            .workflow_pipelines
            .iter()
            .filter(|wp| wp.workflow_uuid == workflow_uuid)
            .filter(|wp| include_deleted || !wp.is_deleted)
            .map(|wp| wp.value().clone())
            .collect();
        found.sort_by_key(|wp| (wp.created_at, wp.uuid));
        Ok(found)
    }

    async fn insert_workflow_pipeline_dependency(
        &self,
        dependency: &WorkflowPipelineDependency,
    ) -> PersistenceResult<()> {
        let mut dependencies = self.dependencies.write();
        if dependencies.contains(dependency) {
            return Err(PersistenceError::Duplicate {
                entity: "workflow_pipeline_dependency",
                key: format!(
                    "{}->{}",
                    dependency.from_workflow_pipeline_uuid, dependency.to_workflow_pipeline_uuid
                ),
            });
        }
        dependencies.push(dependency.clone());
        Ok(())
    }

    async fn find_workflow_pipeline_dependencies(
        &self,
        workflow_uuid: Uuid,
    ) -> PersistenceResult<Vec<WorkflowPipelineDependency>> {
        let belongs = |uuid: &Uuid| {
            self.workflow_pipelines
                .get(uuid)
                .map(|wp| wp.workflow_uuid == workflow_uuid)
                .unwrap_or(false)
        };

        Ok(self
            .dependencies
            .read()
            .iter()
            .filter(|dep| {
                belongs(&dep.from_workflow_pipeline_uuid) && belongs(&dep.to_workflow_pipeline_uuid)
            })
            .cloned()
            .collect())
    }

    async fn insert_pipeline_run(&self, run: &PipelineRun) -> PersistenceResult<PipelineRun> {
        self.insert_pipeline_run_sync(run)
    }

    async fn find_pipeline_run(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<PipelineRun>> {
        let run = self.pipeline_runs.get(&uuid).map(|run| run.value().clone());
        Ok(run.filter(|run| self.pipeline_run_visible(run, include_deleted)))
    }

    async fn find_pipeline_runs(
        &self,
        pipeline_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .pipeline_runs
            .iter()
            .filter(|run| run.pipeline_uuid == pipeline_uuid)
            .map(|run| run.value().clone())
            .collect();
        runs.retain(|run| self.pipeline_run_visible(run, include_deleted));
        runs.sort_by_key(|run| run.sequence);
        Ok(runs)
    }

    async fn find_pipeline_run_by_idempotency_key(
        &self,
        pipeline_uuid: Uuid,
        idempotency_key: &str,
    ) -> PersistenceResult<Option<PipelineRun>> {
        // Soft-deleted runs no longer own their key, so only live runs match
        let run = self
            .pipeline_runs
            .iter()
            .find(|run| {
                run.pipeline_uuid == pipeline_uuid
                    && run.idempotency_key.as_deref() == Some(idempotency_key)
                    && self.pipeline_run_visible(run, false)
            })
            .map(|run| run.value().clone());
        Ok(run)
    }

    async fn update_pipeline_run(
        &self,
        run: &PipelineRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<PipelineRun> {
        self.update_pipeline_run_sync(run, expected_version, transition)
    }

    async fn soft_delete_pipeline_run(&self, uuid: Uuid) -> PersistenceResult<bool> {
        Ok(match self.pipeline_runs.get_mut(&uuid) {
            Some(mut run) => {
                run.is_deleted = true;
                run.updated_at = Utc::now();
                run.version += 1;
                true
            }
            None => false,
        })
    }

    async fn insert_workflow_run(
        &self,
        run: &WorkflowRun,
        members: &[WorkflowRunMember],
    ) -> PersistenceResult<Vec<PipelineRun>> {
        self.insert_workflow_run_sync(run, members)
    }

    async fn find_workflow_run(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<WorkflowRun>> {
        let run = self.workflow_runs.get(&uuid).map(|run| run.value().clone());
        Ok(run.filter(|run| self.workflow_run_visible(run, include_deleted)))
    }

    async fn find_workflow_runs(
        &self,
        workflow_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self
            .workflow_runs
            .iter()
            .filter(|run| run.workflow_uuid == workflow_uuid)
            .map(|run| run.value().clone())
            .collect();
        runs.retain(|run| self.workflow_run_visible(run, include_deleted));
        runs.sort_by_key(|run| (run.created_at, run.uuid));
        Ok(runs)
    }

    async fn find_workflow_pipeline_runs(
        &self,
        workflow_run_uuid: Uuid,
    ) -> PersistenceResult<Vec<WorkflowPipelineRun>> {
        Ok(self
            .workflow_pipeline_runs
            .read()
            .iter()
            .filter(|link| link.workflow_run_uuid == workflow_run_uuid)
            .cloned()
            .collect())
    }

    async fn find_workflow_pipeline_run_for(
        &self,
        pipeline_run_uuid: Uuid,
    ) -> PersistenceResult<Option<WorkflowPipelineRun>> {
        Ok(self
            .workflow_pipeline_runs
            .read()
            .iter()
            .find(|link| link.pipeline_run_uuid == pipeline_run_uuid)
            .cloned())
    }

    async fn update_workflow_run(
        &self,
        run: &WorkflowRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<WorkflowRun> {
        self.update_workflow_run_sync(run, expected_version, transition)
    }

    async fn find_run_transitions(&self, run_uuid: Uuid) -> PersistenceResult<Vec<RunTransition>> {
        Ok(self
            .transitions
            .get(&run_uuid)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }
}
