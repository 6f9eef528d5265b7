//! # Workflow Orchestrator
//!
//! Runs a workflow as a DAG of pipeline runs. Creation materializes one
//! `NOT_STARTED` pipeline run per visible workflow pipeline; root runs get the
//! workflow inputs and are dispatched straight away. Every later pipeline run
//! transition that flows through this orchestrator triggers a re-evaluation
//! of the workflow run once the transition has been committed:
//!
//! 1. cancel pending runs cut off by a failed or cancelled upstream run
//! 2. dispatch runs whose sources have all completed, feeding them the
//!    sources' output artifacts as inputs
//! 3. move the workflow run toward the aggregate state of its pipeline runs
//!
//! Re-evaluation is idempotent, and evaluations of the same workflow run are
//! serialized within this process so a run is never dispatched twice by
//! overlapping callbacks. Dispatch failures during re-evaluation are logged
//! and leave the run `NOT_STARTED`; the next evaluation tries again.

use crate::constants::events;
use crate::database::{PersistenceError, WorkflowRunMember};
use crate::logging::{log_error, log_run_operation};
use crate::models::{
    PipelineRun, RunInput, RunKind, RunTransition, WorkflowPipelineRun, WorkflowRun,
};
use crate::orchestration::dependency_resolver::{DependencyGraph, DependencyResolver};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::run_orchestrator::{
    callback_outcome, validate_inputs, CallbackOutcome, CallbackReport, RunInputFile,
    RunOrchestrator,
};
use crate::state_machine::{RunState, TransitionEngine};
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const WORKFLOW_RUN: &str = "workflow_run";

/// Request to start a workflow run
#[derive(Debug, Clone, Default)]
pub struct CreateWorkflowRunRequest {
    /// Handed to every root pipeline run
    pub inputs: Vec<RunInputFile>,
}

impl CreateWorkflowRunRequest {
    pub fn new(inputs: Vec<RunInputFile>) -> Self {
        Self { inputs }
    }
}

/// A pipeline run together with the workflow pipeline it executes
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPipelineRunState {
    pub workflow_pipeline_uuid: Uuid,
    pub pipeline_run: PipelineRun,
}

/// A workflow run and its visible pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRunSnapshot {
    pub workflow_run: WorkflowRun,
    pub pipeline_runs: Vec<WorkflowPipelineRunState>,
}

impl WorkflowRunSnapshot {
    pub fn pipeline_run_for(&self, workflow_pipeline_uuid: Uuid) -> Option<&PipelineRun> {
        self.pipeline_runs
            .iter()
            .find(|member| member.workflow_pipeline_uuid == workflow_pipeline_uuid)
            .map(|member| &member.pipeline_run)
    }

    /// Pipeline run states keyed by workflow pipeline
    pub fn states(&self) -> HashMap<Uuid, RunState> {
        self.pipeline_runs
            .iter()
            .map(|member| (member.workflow_pipeline_uuid, member.pipeline_run.state))
            .collect()
    }
}

/// Orchestrates workflow runs on top of a [`RunOrchestrator`]
#[derive(Debug)]
pub struct WorkflowOrchestrator {
    runs: Arc<RunOrchestrator>,
    evaluation_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl WorkflowOrchestrator {
    pub fn new(runs: Arc<RunOrchestrator>) -> Self {
        Self {
            runs,
            evaluation_locks: DashMap::new(),
        }
    }

    pub fn run_orchestrator(&self) -> &Arc<RunOrchestrator> {
        &self.runs
    }

    /// Create a workflow run with one pipeline run per visible workflow
    /// pipeline and dispatch the roots.
    #[instrument(skip(self, request), fields(workflow_uuid = %workflow_uuid))]
    pub async fn create_workflow_run(
        &self,
        workflow_uuid: Uuid,
        request: CreateWorkflowRunRequest,
    ) -> OrchestrationResult<WorkflowRunSnapshot> {
        let store = self.runs.store();
        store
            .find_workflow(workflow_uuid, false)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("workflow", workflow_uuid))?;
        validate_inputs(&request.inputs)?;

        let mut workflow_pipelines = Vec::new();
        for workflow_pipeline in store.find_workflow_pipelines(workflow_uuid, false).await? {
            if store
                .find_pipeline(workflow_pipeline.pipeline_uuid, false)
                .await?
                .is_some()
            {
                workflow_pipelines.push(workflow_pipeline);
            } else {
                debug!(
                    workflow_pipeline_uuid = %workflow_pipeline.uuid,
                    "Skipping workflow pipeline whose pipeline is deleted"
                );
            }
        }

        let edges = store.find_workflow_pipeline_dependencies(workflow_uuid).await?;
        let graph = DependencyGraph::new(workflow_pipelines.iter().map(|wp| wp.uuid), &edges);
        let roots: HashSet<Uuid> = graph.roots().into_iter().collect();

        let workflow_run = WorkflowRun::new(workflow_uuid);
        let mut members = Vec::with_capacity(workflow_pipelines.len());
        for workflow_pipeline in &workflow_pipelines {
            let run_uuid = Uuid::new_v4();
            let inputs = if roots.contains(&workflow_pipeline.uuid) {
                self.runs
                    .store_inputs(workflow_pipeline.pipeline_uuid, run_uuid, request.inputs.clone())
                    .await?
            } else {
                Vec::new()
            };
            members.push(WorkflowRunMember {
                workflow_pipeline_uuid: workflow_pipeline.uuid,
                pipeline_run: self.runs.new_pipeline_run(
                    workflow_pipeline.pipeline_uuid,
                    run_uuid,
                    inputs,
                    None,
                    None,
                ),
            });
        }

        let created = store.insert_workflow_run(&workflow_run, &members).await?;

        self.runs.publish(
            events::WORKFLOW_RUN_CREATED,
            workflow_run.uuid,
            RunKind::Workflow,
            None,
            RunState::NotStarted,
            json!({ "workflow_uuid": workflow_uuid, "pipeline_runs": created.len() }),
        );
        for run in &created {
            self.runs.publish(
                events::PIPELINE_RUN_CREATED,
                run.uuid,
                RunKind::Pipeline,
                None,
                RunState::NotStarted,
                json!({ "sequence": run.sequence, "workflow_run_uuid": workflow_run.uuid }),
            );
        }
        log_run_operation(
            "create_workflow_run",
            workflow_run.uuid,
            "workflow",
            RunState::NotStarted.as_str(),
            Some(format!("{} pipeline runs", created.len()).as_str()),
        );

        self.evaluate_workflow_run(workflow_run.uuid).await?;
        self.find_workflow_pipeline_runs(workflow_run.uuid).await
    }

    /// Apply an executor callback, then re-evaluate the owning workflow run.
    /// Standalone runs are accepted too and need no re-evaluation.
    pub async fn record_callback(
        &self,
        pipeline_run_uuid: Uuid,
        report: CallbackReport,
    ) -> OrchestrationResult<PipelineRun> {
        let run = self.runs.apply_callback(pipeline_run_uuid, report).await?;
        self.after_commit(pipeline_run_uuid).await;
        Ok(run)
    }

    /// Executor-facing callback entry point; see [`RunOrchestrator::accept_callback`]
    pub async fn accept_callback(
        &self,
        pipeline_run_uuid: Uuid,
        report: CallbackReport,
    ) -> OrchestrationResult<CallbackOutcome> {
        let result = self.runs.apply_callback(pipeline_run_uuid, report).await;
        let outcome = callback_outcome(pipeline_run_uuid, result)?;
        if outcome.is_applied() {
            self.after_commit(pipeline_run_uuid).await;
        }
        Ok(outcome)
    }

    /// Cancel one pipeline run, then re-evaluate the owning workflow run
    pub async fn cancel_pipeline_run(
        &self,
        pipeline_run_uuid: Uuid,
    ) -> OrchestrationResult<PipelineRun> {
        let run = self.runs.cancel_requested(pipeline_run_uuid).await?;
        self.after_commit(pipeline_run_uuid).await;
        Ok(run)
    }

    /// Cancel a workflow run and every non-terminal pipeline run in it
    #[instrument(skip(self), fields(workflow_run_uuid = %workflow_run_uuid))]
    pub async fn cancel_workflow_run(
        &self,
        workflow_run_uuid: Uuid,
    ) -> OrchestrationResult<WorkflowRun> {
        let guard = self.lock_evaluation(workflow_run_uuid).await;
        let result = self.cancel_locked(workflow_run_uuid).await;
        drop(guard);
        self.release_evaluation_lock(workflow_run_uuid);
        result
    }

    /// Re-evaluate the workflow run owning `pipeline_run_uuid`, if any.
    ///
    /// Idempotent. Callers that committed a transition through
    /// [`RunOrchestrator`] directly use this to catch the workflow up.
    pub async fn on_pipeline_run_transition(
        &self,
        pipeline_run_uuid: Uuid,
    ) -> OrchestrationResult<Option<WorkflowRun>> {
        let link = self
            .runs
            .store()
            .find_workflow_pipeline_run_for(pipeline_run_uuid)
            .await?;
        match link {
            Some(link) => Ok(Some(self.evaluate_workflow_run(link.workflow_run_uuid).await?)),
            None => Ok(None),
        }
    }

    /// Cancel cut-off runs, dispatch eligible ones, then aggregate
    #[instrument(skip(self), fields(workflow_run_uuid = %workflow_run_uuid))]
    pub async fn evaluate_workflow_run(
        &self,
        workflow_run_uuid: Uuid,
    ) -> OrchestrationResult<WorkflowRun> {
        let guard = self.lock_evaluation(workflow_run_uuid).await;
        let result = self.evaluate_locked(workflow_run_uuid).await;
        drop(guard);
        self.release_evaluation_lock(workflow_run_uuid);
        result
    }

    pub async fn find_workflow_run(
        &self,
        workflow_run_uuid: Uuid,
    ) -> OrchestrationResult<WorkflowRun> {
        self.load_workflow_run(workflow_run_uuid).await
    }

    /// Visible runs of a workflow, oldest first
    pub async fn find_workflow_runs(
        &self,
        workflow_uuid: Uuid,
    ) -> OrchestrationResult<Vec<WorkflowRun>> {
        let store = self.runs.store();
        store
            .find_workflow(workflow_uuid, false)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("workflow", workflow_uuid))?;
        Ok(store.find_workflow_runs(workflow_uuid, false).await?)
    }

    /// The workflow run together with its pipeline runs
    pub async fn find_workflow_pipeline_runs(
        &self,
        workflow_run_uuid: Uuid,
    ) -> OrchestrationResult<WorkflowRunSnapshot> {
        let workflow_run = self.load_workflow_run(workflow_run_uuid).await?;
        let pipeline_runs = self.load_members(workflow_run_uuid).await?;
        Ok(WorkflowRunSnapshot {
            workflow_run,
            pipeline_runs,
        })
    }

    pub async fn workflow_run_history(
        &self,
        workflow_run_uuid: Uuid,
    ) -> OrchestrationResult<Vec<RunTransition>> {
        self.load_workflow_run(workflow_run_uuid).await?;
        Ok(self.runs.store().find_run_transitions(workflow_run_uuid).await?)
    }

    async fn after_commit(&self, pipeline_run_uuid: Uuid) {
        if let Err(err) = self.on_pipeline_run_transition(pipeline_run_uuid).await {
            log_error(
                "workflow_orchestrator",
                "re_evaluate",
                &err.to_string(),
                Some(format!("pipeline_run_uuid={pipeline_run_uuid}").as_str()),
            );
        }
    }

    async fn cancel_locked(&self, workflow_run_uuid: Uuid) -> OrchestrationResult<WorkflowRun> {
        let cancelled = self
            .commit_workflow_transition(
                workflow_run_uuid,
                RunState::Cancelled,
                json!({ "source": "cancel_request" }),
            )
            .await?;

        for member in self.load_members(workflow_run_uuid).await? {
            let run = &member.pipeline_run;
            if run.state.in_final_state() {
                continue;
            }
            let metadata = json!({
                "source": "workflow_cancelled",
                "workflow_run_uuid": workflow_run_uuid,
            });
            match self.runs.cancel_with_metadata(run.uuid, metadata, false).await {
                Ok(_) => {}
                Err(err) if err.is_invalid_transition() => {
                    debug!(
                        run_uuid = %run.uuid,
                        "Pipeline run finished before it could be cancelled"
                    );
                }
                Err(err) => {
                    warn!(run_uuid = %run.uuid, error = %err, "Failed to cancel pipeline run");
                }
            }
        }

        Ok(cancelled)
    }

    async fn evaluate_locked(&self, workflow_run_uuid: Uuid) -> OrchestrationResult<WorkflowRun> {
        let workflow_run = self.load_workflow_run(workflow_run_uuid).await?;
        let edges = self
            .runs
            .store()
            .find_workflow_pipeline_dependencies(workflow_run.workflow_uuid)
            .await?;

        let links = self
            .runs
            .store()
            .find_workflow_pipeline_runs(workflow_run_uuid)
            .await?;
        let members = self.visible_members(&links).await?;
        // Hidden members keep their edges and have no state, so their
        // dependents never become eligible
        let graph = DependencyGraph::new(links.iter().map(|l| l.workflow_pipeline_uuid), &edges);
        let runs: HashMap<Uuid, &PipelineRun> = members
            .iter()
            .map(|m| (m.workflow_pipeline_uuid, &m.pipeline_run))
            .collect();
        let states: HashMap<Uuid, RunState> =
            runs.iter().map(|(node, run)| (*node, run.state)).collect();

        for node in DependencyResolver::cancellations(&graph, &states) {
            if let Some(run) = runs.get(&node) {
                let metadata = json!({
                    "source": "upstream_blocked",
                    "workflow_run_uuid": workflow_run_uuid,
                });
                match self.runs.cancel_with_metadata(run.uuid, metadata, false).await {
                    Ok(_) => {
                        info!(run_uuid = %run.uuid, "Cancelled run cut off by upstream failure")
                    }
                    Err(err) if err.is_invalid_transition() => {
                        debug!(run_uuid = %run.uuid, "Run left pending state before cancellation");
                    }
                    Err(err) => {
                        warn!(run_uuid = %run.uuid, error = %err, "Failed to cancel blocked run")
                    }
                }
            }
        }

        if !workflow_run.state.in_final_state() {
            // Queued runs already hold an executor token
            let pending: Vec<(Uuid, &PipelineRun)> = DependencyResolver::eligible(&graph, &states)
                .into_iter()
                .filter_map(|node| runs.get(&node).map(|run| (node, *run)))
                .filter(|(_, run)| run.executor_token.is_none())
                .collect();

            let dispatches = pending
                .iter()
                .map(|(node, run)| self.dispatch_member(&graph, &runs, *node, run));
            for ((_, run), result) in pending.iter().zip(join_all(dispatches).await) {
                if let Err(err) = result {
                    warn!(
                        run_uuid = %run.uuid,
                        error = %err,
                        "Dispatch during workflow evaluation failed, will retry on next evaluation"
                    );
                }
            }
        }

        let current = self.load_members(workflow_run_uuid).await?;
        let aggregate =
            DependencyResolver::aggregate_state(current.iter().map(|m| m.pipeline_run.state));
        self.advance_workflow_run(workflow_run_uuid, aggregate).await
    }

    async fn dispatch_member(
        &self,
        graph: &DependencyGraph,
        runs: &HashMap<Uuid, &PipelineRun>,
        node: Uuid,
        run: &PipelineRun,
    ) -> OrchestrationResult<PipelineRun> {
        let sources = graph.sources_of(node);
        if sources.is_empty() {
            return self.runs.dispatch(run).await;
        }

        let mut seen = HashSet::new();
        let mut inputs = Vec::new();
        for source in sources {
            let Some(source_run) = runs.get(source) else { continue };
            for artifact in &source_run.outputs {
                if seen.insert(artifact.name.clone()) {
                    inputs.push(RunInput {
                        name: artifact.name.clone(),
                        url: artifact.url.clone(),
                    });
                } else {
                    debug!(name = %artifact.name, "Skipping duplicate upstream artifact name");
                }
            }
        }

        let prepared = self
            .runs
            .update_pipeline_run_with(run.uuid, |current| {
                if current.inputs == inputs {
                    return false;
                }
                current.inputs = inputs.clone();
                true
            })
            .await?;
        if prepared.state != RunState::NotStarted || prepared.executor_token.is_some() {
            return Ok(prepared);
        }
        self.runs.dispatch(&prepared).await
    }

    /// Step the workflow run toward `target` along legal transitions
    async fn advance_workflow_run(
        &self,
        workflow_run_uuid: Uuid,
        target: RunState,
    ) -> OrchestrationResult<WorkflowRun> {
        let mut current = self.load_workflow_run(workflow_run_uuid).await?;
        // NOT_STARTED -> RUNNING -> terminal, plus one re-read after a lost race
        for _ in 0..3 {
            let Some(next) = next_aggregate_step(current.state, target) else {
                break;
            };
            let metadata = json!({ "source": "aggregate", "aggregate_state": target.as_str() });
            match self
                .commit_workflow_transition(workflow_run_uuid, next, metadata)
                .await
            {
                Ok(updated) => current = updated,
                Err(err) if err.is_invalid_transition() => {
                    current = self.load_workflow_run(workflow_run_uuid).await?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(current)
    }

    async fn commit_workflow_transition(
        &self,
        workflow_run_uuid: Uuid,
        to: RunState,
        metadata: Value,
    ) -> OrchestrationResult<WorkflowRun> {
        let attempts = self.runs.config().orchestration.max_transition_retries + 1;
        for attempt in 1..=attempts {
            let current = self.load_workflow_run(workflow_run_uuid).await?;
            let outcome = TransitionEngine::apply_with_metadata(&current, to, metadata.clone())?;
            let transition = outcome.transition;

            match self
                .runs
                .store()
                .update_workflow_run(&outcome.run, current.version, Some(transition.clone()))
                .await
            {
                Ok(stored) => {
                    self.runs.publish_transition(&transition);
                    log_run_operation(
                        "transition",
                        workflow_run_uuid,
                        "workflow",
                        stored.state.as_str(),
                        Some(current.state.as_str()),
                    );
                    return Ok(stored);
                }
                Err(err) if err.is_concurrent_modification() => {
                    debug!(
                        workflow_run_uuid = %workflow_run_uuid,
                        attempt,
                        "Version conflict, re-validating transition"
                    );
                }
                Err(PersistenceError::RecordNotFound { .. }) => {
                    return Err(OrchestrationError::not_found(WORKFLOW_RUN, workflow_run_uuid));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(OrchestrationError::ConcurrencyRetriesExhausted {
            entity: WORKFLOW_RUN,
            uuid: workflow_run_uuid,
            attempts,
        })
    }

    async fn load_workflow_run(&self, workflow_run_uuid: Uuid) -> OrchestrationResult<WorkflowRun> {
        self.runs
            .store()
            .find_workflow_run(workflow_run_uuid, false)
            .await?
            .ok_or_else(|| OrchestrationError::not_found(WORKFLOW_RUN, workflow_run_uuid))
    }

    async fn load_members(
        &self,
        workflow_run_uuid: Uuid,
    ) -> OrchestrationResult<Vec<WorkflowPipelineRunState>> {
        let links = self
            .runs
            .store()
            .find_workflow_pipeline_runs(workflow_run_uuid)
            .await?;
        self.visible_members(&links).await
    }

    /// Linked pipeline runs that are still visible
    async fn visible_members(
        &self,
        links: &[WorkflowPipelineRun],
    ) -> OrchestrationResult<Vec<WorkflowPipelineRunState>> {
        let store = self.runs.store();
        let mut members = Vec::with_capacity(links.len());
        for link in links {
            let visible = store.find_pipeline_run(link.pipeline_run_uuid, false).await?;
            if let Some(pipeline_run) = visible {
                members.push(WorkflowPipelineRunState {
                    workflow_pipeline_uuid: link.workflow_pipeline_uuid,
                    pipeline_run,
                });
            }
        }
        Ok(members)
    }

    async fn lock_evaluation(&self, workflow_run_uuid: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .evaluation_locks
            .entry(workflow_run_uuid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn release_evaluation_lock(&self, workflow_run_uuid: Uuid) {
        // Only the map's own handle left means nobody holds or waits on it
        self.evaluation_locks
            .remove_if(&workflow_run_uuid, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Next legal workflow run state on the way to `target`, if any
fn next_aggregate_step(current: RunState, target: RunState) -> Option<RunState> {
    if current == target || current.in_final_state() {
        return None;
    }
    match (current, target) {
        (_, RunState::Cancelled) => Some(RunState::Cancelled),
        (RunState::NotStarted, RunState::Running | RunState::Completed | RunState::Failed) => {
            Some(RunState::Running)
        }
        (RunState::Running, RunState::Completed | RunState::Failed) => Some(target),
        _ => None,
    }
}
