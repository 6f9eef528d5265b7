//! # Run Orchestrator
//!
//! Creates pipeline runs, dispatches them to the executor, applies executor
//! callbacks and handles cancellation.
//!
//! ## Commit protocol
//!
//! Every state change goes through one loop: read the visible run, validate
//! the change with the [`TransitionEngine`], then compare-and-swap it into the
//! store together with its history row. A version conflict means another
//! handler committed first; the loop re-reads and re-validates, so two
//! callbacks racing for the same run cannot both succeed when only one
//! transition is legal. Lifecycle events are published only after the store
//! has accepted the write.
//!
//! ## Dispatch
//!
//! Executor calls are bounded by `executor.dispatch_timeout_ms`. A `Running`
//! acknowledgement moves the run to `RUNNING`. A `Queued` acknowledgement only
//! records the executor token: there is no `NOT_STARTED -> QUEUED` edge, so
//! the run waits in `NOT_STARTED` for the executor's own `RUNNING` callback.
//! Rejections, errors and timeouts leave the run untouched and surface as
//! [`OrchestrationError::ExecutorUnavailable`].

use crate::blob_store::BlobStore;
use crate::config::RunflowConfig;
use crate::constants::{blob_keys, events, system};
use crate::database::{PersistenceError, RunStore};
use crate::events::EventPublisher;
use crate::logging::log_run_operation;
use crate::models::{
    ConsoleOutput, NewPipelineRun, NewRunTransition, PipelineRun, RunArtifact, RunInput, RunKind,
    RunTransition,
};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::run_executor::{
    DispatchAck, DispatchRequest, DispatchStatus, ExecutorError, RunExecutor,
};
use crate::state_machine::{transition_event_name, RunState, StateMachineError, TransitionEngine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const PIPELINE_RUN: &str = "pipeline_run";

/// An input file supplied when creating a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl RunInputFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Request to create a pipeline run
#[derive(Debug, Clone, Default)]
pub struct CreateRunRequest {
    pub inputs: Vec<RunInputFile>,
    /// Overrides the callback URL derived from `executor.callback_base_url`
    pub callback_url: Option<String>,
    /// Client key making repeated creates return the same run
    pub idempotency_key: Option<String>,
}

impl CreateRunRequest {
    pub fn new(inputs: Vec<RunInputFile>) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    pub fn with_callback_url(mut self, callback_url: impl Into<String>) -> Self {
        self.callback_url = Some(callback_url.into());
        self
    }

    pub fn with_idempotency_key(mut self, idempotency_key: impl Into<String>) -> Self {
        self.idempotency_key = Some(idempotency_key.into());
        self
    }
}

/// Status report posted by the executor for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackReport {
    pub state: RunState,
    pub token: String,
    #[serde(default)]
    pub outputs: Vec<RunArtifact>,
    #[serde(default)]
    pub console: Option<ConsoleOutput>,
}

impl CallbackReport {
    pub fn new(state: RunState, token: impl Into<String>) -> Self {
        Self {
            state,
            token: token.into(),
            outputs: Vec::new(),
            console: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<RunArtifact>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_console(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.console = Some(ConsoleOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
        self
    }
}

/// Result of an executor callback as seen by the executor
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied(PipelineRun),
    /// The reported state was not a legal next state; nothing was written
    Ignored { run_uuid: Uuid, reason: String },
}

impl CallbackOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        match self {
            Self::Applied(run) => Some(run),
            Self::Ignored { .. } => None,
        }
    }
}

enum KeyedInsert {
    Created(PipelineRun),
    Existing(PipelineRun),
}

/// Orchestrates the lifecycle of pipeline runs
pub struct RunOrchestrator {
    store: Arc<dyn RunStore>,
    executor: Arc<dyn RunExecutor>,
    blob_store: Arc<dyn BlobStore>,
    event_publisher: EventPublisher,
    config: RunflowConfig,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("event_publisher", &self.event_publisher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    /// Create a new RunOrchestrator with its own event channel
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<dyn RunExecutor>,
        blob_store: Arc<dyn BlobStore>,
        config: RunflowConfig,
    ) -> Self {
        let event_publisher = EventPublisher::new(config.events.channel_capacity);
        Self::with_event_publisher(store, executor, blob_store, config, event_publisher)
    }

    /// Create a new RunOrchestrator publishing to an existing channel
    pub fn with_event_publisher(
        store: Arc<dyn RunStore>,
        executor: Arc<dyn RunExecutor>,
        blob_store: Arc<dyn BlobStore>,
        config: RunflowConfig,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            executor,
            blob_store,
            event_publisher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn event_publisher(&self) -> &EventPublisher {
        &self.event_publisher
    }

    pub fn config(&self) -> &RunflowConfig {
        &self.config
    }

    /// Create a run of `pipeline_uuid`, store its inputs and dispatch it.
    ///
    /// With an idempotency key already used for this pipeline the existing run
    /// is returned instead; if that run was never acknowledged by an executor
    /// it is dispatched again.
    #[instrument(skip(self, request), fields(pipeline_uuid = %pipeline_uuid))]
    pub async fn create_run(
        &self,
        pipeline_uuid: Uuid,
        request: CreateRunRequest,
    ) -> OrchestrationResult<PipelineRun> {
        self.ensure_pipeline_visible(pipeline_uuid).await?;
        validate_inputs(&request.inputs)?;
        if let Some(callback_url) = &request.callback_url {
            validate_callback_url(callback_url)?;
        }
        if let Some(key) = &request.idempotency_key {
            validate_idempotency_key(key)?;
            if let Some(existing) = self
                .store
                .find_pipeline_run_by_idempotency_key(pipeline_uuid, key)
                .await?
            {
                debug!(run_uuid = %existing.uuid, "Idempotency key already used, reusing run");
                return self.resume_existing(existing).await;
            }
        }

        let run_uuid = Uuid::new_v4();
        let inputs = self
            .store_inputs(pipeline_uuid, run_uuid, request.inputs)
            .await?;
        let run = self.new_pipeline_run(
            pipeline_uuid,
            run_uuid,
            inputs,
            request.callback_url,
            request.idempotency_key.clone(),
        );

        let created = match self.insert_keyed_run(&run).await? {
            KeyedInsert::Created(created) => created,
            KeyedInsert::Existing(existing) => return self.resume_existing(existing).await,
        };

        self.publish(
            events::PIPELINE_RUN_CREATED,
            created.uuid,
            RunKind::Pipeline,
            None,
            RunState::NotStarted,
            json!({ "sequence": created.sequence, "inputs": created.inputs.len() }),
        );
        log_run_operation(
            "create_run",
            created.uuid,
            "pipeline",
            created.state.as_str(),
            None,
        );

        self.dispatch(&created).await
    }

    /// Apply an executor status report to a standalone run.
    ///
    /// Runs that belong to a workflow run are refused with
    /// [`OrchestrationError::WorkflowOwned`]; their callbacks go through
    /// `WorkflowOrchestrator` so dependents are re-evaluated after the commit.
    #[instrument(skip(self, report), fields(run_uuid = %run_uuid, to = %report.state))]
    pub async fn record_callback(
        &self,
        run_uuid: Uuid,
        report: CallbackReport,
    ) -> OrchestrationResult<PipelineRun> {
        self.ensure_standalone(run_uuid).await?;
        self.apply_callback(run_uuid, report).await
    }

    pub(crate) async fn apply_callback(
        &self,
        run_uuid: Uuid,
        report: CallbackReport,
    ) -> OrchestrationResult<PipelineRun> {
        validate_artifacts(&report.outputs)?;

        let CallbackReport {
            state,
            token,
            outputs,
            console,
        } = report;
        let metadata = json!({
            "source": "executor_callback",
            "outputs": outputs.len(),
        });

        self.commit_pipeline_transition(
            run_uuid,
            state,
            metadata,
            |current| {
                if current.accepts_status_token(&token, Utc::now()) {
                    Ok(())
                } else {
                    Err(OrchestrationError::validation(
                        "token",
                        "status update token is invalid or expired",
                    ))
                }
            },
            |updated| {
                if !outputs.is_empty() {
                    updated.outputs = outputs.clone();
                }
                if let Some(console) = &console {
                    updated.console = console.clone();
                }
            },
        )
        .await
    }

    /// Executor-facing wrapper around [`record_callback`](Self::record_callback).
    ///
    /// Illegal transitions, such as a duplicate terminal report, are logged and
    /// answered with [`CallbackOutcome::Ignored`]. Every other error is returned.
    pub async fn accept_callback(
        &self,
        run_uuid: Uuid,
        report: CallbackReport,
    ) -> OrchestrationResult<CallbackOutcome> {
        callback_outcome(run_uuid, self.record_callback(run_uuid, report).await)
    }

    /// Cancel a non-terminal standalone run, then ask the executor to stop it
    #[instrument(skip(self), fields(run_uuid = %run_uuid))]
    pub async fn cancel_run(&self, run_uuid: Uuid) -> OrchestrationResult<PipelineRun> {
        self.ensure_standalone(run_uuid).await?;
        self.cancel_requested(run_uuid).await
    }

    pub(crate) async fn cancel_requested(
        &self,
        run_uuid: Uuid,
    ) -> OrchestrationResult<PipelineRun> {
        self.cancel_with_metadata(run_uuid, json!({ "source": "cancel_request" }), true)
            .await
    }

    /// Retry dispatch of a standalone run the executor never acknowledged.
    /// Workflow members are re-dispatched by workflow evaluation instead.
    #[instrument(skip(self), fields(run_uuid = %run_uuid))]
    pub async fn dispatch_run(&self, run_uuid: Uuid) -> OrchestrationResult<PipelineRun> {
        self.ensure_standalone(run_uuid).await?;
        let run = self.load_pipeline_run(run_uuid).await?;
        if run.state != RunState::NotStarted {
            let err = StateMachineError::invalid_transition(run.uuid, run.state, RunState::Running);
            return Err(err.into());
        }
        if run.executor_token.is_some() {
            return Err(OrchestrationError::validation(
                "executor_token",
                "run is already queued with an executor",
            ));
        }
        self.dispatch(&run).await
    }

    pub async fn find_run(&self, run_uuid: Uuid) -> OrchestrationResult<PipelineRun> {
        self.load_pipeline_run(run_uuid).await
    }

    /// Visible runs of a pipeline ordered by `sequence`
    pub async fn find_runs(&self, pipeline_uuid: Uuid) -> OrchestrationResult<Vec<PipelineRun>> {
        self.ensure_pipeline_visible(pipeline_uuid).await?;
        Ok(self.store.find_pipeline_runs(pipeline_uuid, false).await?)
    }

    /// Committed transitions of a run, oldest first
    pub async fn run_history(&self, run_uuid: Uuid) -> OrchestrationResult<Vec<RunTransition>> {
        self.load_pipeline_run(run_uuid).await?;
        Ok(self.store.find_run_transitions(run_uuid).await?)
    }

    // Internals shared with the workflow orchestrator

    pub(crate) async fn load_pipeline_run(
        &self,
        run_uuid: Uuid,
    ) -> OrchestrationResult<PipelineRun> {
        self.store
            .find_pipeline_run(run_uuid, false)
            .await?
            .ok_or_else(|| OrchestrationError::not_found(PIPELINE_RUN, run_uuid))
    }

    /// Refuse runs owned by a workflow run
    async fn ensure_standalone(&self, run_uuid: Uuid) -> OrchestrationResult<()> {
        match self.store.find_workflow_pipeline_run_for(run_uuid).await? {
            Some(link) => Err(OrchestrationError::WorkflowOwned {
                run_uuid,
                workflow_run_uuid: link.workflow_run_uuid,
            }),
            None => Ok(()),
        }
    }

    async fn ensure_pipeline_visible(&self, pipeline_uuid: Uuid) -> OrchestrationResult<()> {
        self.store
            .find_pipeline(pipeline_uuid, false)
            .await?
            .map(|_| ())
            .ok_or_else(|| OrchestrationError::not_found("pipeline", pipeline_uuid))
    }

    /// Build an unsaved `NOT_STARTED` run with a fresh status update token
    pub(crate) fn new_pipeline_run(
        &self,
        pipeline_uuid: Uuid,
        run_uuid: Uuid,
        inputs: Vec<RunInput>,
        callback_url: Option<String>,
        idempotency_key: Option<String>,
    ) -> PipelineRun {
        PipelineRun::new(NewPipelineRun {
            uuid: run_uuid,
            pipeline_uuid,
            inputs,
            callback_url: callback_url
                .unwrap_or_else(|| self.config.executor.callback_url_for(run_uuid)),
            status_update_token: generate_status_token(),
            status_update_token_expires_at: Utc::now()
                + self.config.orchestration.status_update_token_ttl(),
            idempotency_key,
        })
    }

    pub(crate) async fn store_inputs(
        &self,
        pipeline_uuid: Uuid,
        run_uuid: Uuid,
        files: Vec<RunInputFile>,
    ) -> OrchestrationResult<Vec<RunInput>> {
        let mut inputs = Vec::with_capacity(files.len());
        for file in files {
            let key = blob_keys::run_input(pipeline_uuid, run_uuid, &file.name);
            let url = self.blob_store.put(&key, file.content).await?;
            inputs.push(RunInput {
                name: file.name,
                url,
            });
        }
        Ok(inputs)
    }

    /// Insert `run`, or hand back the live run that already holds its key.
    ///
    /// A `Duplicate` with no live holder means the holder was soft-deleted
    /// after the insert checked; the key is free again, so the insert is retried.
    async fn insert_keyed_run(&self, run: &PipelineRun) -> OrchestrationResult<KeyedInsert> {
        let attempts = self.config.orchestration.max_transition_retries + 1;
        for attempt in 1..=attempts {
            let err = match self.store.insert_pipeline_run(run).await {
                Ok(created) => return Ok(KeyedInsert::Created(created)),
                Err(err) => err,
            };
            let key = match run.idempotency_key.as_deref() {
                Some(key) if matches!(err, PersistenceError::Duplicate { .. }) => key,
                _ => return Err(err.into()),
            };

            // Lost the insert race to a request carrying the same key
            if let Some(existing) = self
                .store
                .find_pipeline_run_by_idempotency_key(run.pipeline_uuid, key)
                .await?
            {
                return Ok(KeyedInsert::Existing(existing));
            }
            debug!(
                run_uuid = %run.uuid,
                attempt,
                "Idempotency key released concurrently, retrying insert"
            );
        }

        Err(OrchestrationError::ConcurrencyRetriesExhausted {
            entity: PIPELINE_RUN,
            uuid: run.uuid,
            attempts,
        })
    }

    async fn resume_existing(&self, existing: PipelineRun) -> OrchestrationResult<PipelineRun> {
        if existing.state == RunState::NotStarted && existing.executor_token.is_none() {
            self.dispatch(&existing).await
        } else {
            Ok(existing)
        }
    }

    /// Hand a `NOT_STARTED` run to the executor and record the acknowledgement
    pub(crate) async fn dispatch(&self, run: &PipelineRun) -> OrchestrationResult<PipelineRun> {
        let request = DispatchRequest {
            run_uuid: run.uuid,
            pipeline_uuid: run.pipeline_uuid,
            inputs: run.inputs.clone(),
            callback_url: run.callback_url.clone(),
            status_update_token: run.status_update_token.clone(),
        };
        let limit = self.config.executor.dispatch_timeout();

        let acknowledged: Result<DispatchAck, ExecutorError> =
            match timeout(limit, self.executor.dispatch(request)).await {
                Ok(Ok(ack)) if ack.accepted => Ok(ack),
                Ok(Ok(_)) => Err(ExecutorError::Rejected { run_uuid: run.uuid }),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ExecutorError::Timeout {
                    timeout_ms: self.config.executor.dispatch_timeout_ms,
                }),
            };

        let ack = match acknowledged {
            Ok(ack) => ack,
            Err(err) => {
                warn!(run_uuid = %run.uuid, error = %err, "Dispatch failed, run stays NOT_STARTED");
                return Err(OrchestrationError::executor_unavailable(run.uuid, err));
            }
        };

        match ack.status {
            DispatchStatus::Running => {
                let token = ack.token.clone();
                let result = self
                    .commit_pipeline_transition(
                        run.uuid,
                        RunState::Running,
                        json!({ "source": "dispatch", "executor_token": ack.token }),
                        |_| Ok(()),
                        |updated| updated.executor_token = Some(token.clone()),
                    )
                    .await;
                match result {
                    // A callback already moved the run; keep the token for cancellation
                    Err(err) if err.is_invalid_transition() => {
                        self.record_executor_token(run.uuid, &ack.token).await
                    }
                    other => other,
                }
            }
            DispatchStatus::Queued => {
                info!(run_uuid = %run.uuid, "Executor queued run");
                self.record_executor_token(run.uuid, &ack.token).await
            }
        }
    }

    pub(crate) async fn record_executor_token(
        &self,
        run_uuid: Uuid,
        executor_token: &str,
    ) -> OrchestrationResult<PipelineRun> {
        self.update_pipeline_run_with(run_uuid, |run| {
            if run.executor_token.as_deref() == Some(executor_token) {
                return false;
            }
            run.executor_token = Some(executor_token.to_string());
            true
        })
        .await
    }

    /// CAS-update fields that are not part of the state machine.
    /// `edit` returns false when the run already holds the wanted values.
    pub(crate) async fn update_pipeline_run_with<E>(
        &self,
        run_uuid: Uuid,
        edit: E,
    ) -> OrchestrationResult<PipelineRun>
    where
        E: Fn(&mut PipelineRun) -> bool + Send + Sync,
    {
        let attempts = self.config.orchestration.max_transition_retries + 1;
        for attempt in 1..=attempts {
            let current = self.load_pipeline_run(run_uuid).await?;
            let mut updated = current.clone();
            if !edit(&mut updated) {
                return Ok(current);
            }
            updated.updated_at = Utc::now();

            match self
                .store
                .update_pipeline_run(&updated, current.version, None)
                .await
            {
                Ok(stored) => return Ok(stored),
                Err(err) if err.is_concurrent_modification() => {
                    debug!(run_uuid = %run_uuid, attempt, "Version conflict, re-reading run");
                }
                Err(err) => return Err(persistence_error(run_uuid, err)),
            }
        }

        Err(OrchestrationError::ConcurrencyRetriesExhausted {
            entity: PIPELINE_RUN,
            uuid: run_uuid,
            attempts,
        })
    }

    /// Read, validate and compare-and-swap one transition, retrying on conflicts.
    ///
    /// `check` runs against the freshly read run before the engine, `edit`
    /// against the transitioned copy before it is written.
    pub(crate) async fn commit_pipeline_transition<C, E>(
        &self,
        run_uuid: Uuid,
        to: RunState,
        metadata: Value,
        check: C,
        edit: E,
    ) -> OrchestrationResult<PipelineRun>
    where
        C: Fn(&PipelineRun) -> OrchestrationResult<()> + Send + Sync,
        E: Fn(&mut PipelineRun) + Send + Sync,
    {
        let attempts = self.config.orchestration.max_transition_retries + 1;
        for attempt in 1..=attempts {
            let current = self.load_pipeline_run(run_uuid).await?;
            check(&current)?;

            let outcome = TransitionEngine::apply_with_metadata(&current, to, metadata.clone())?;
            let mut updated = outcome.run;
            edit(&mut updated);
            let transition = outcome.transition;

            match self
                .store
                .update_pipeline_run(&updated, current.version, Some(transition.clone()))
                .await
            {
                Ok(stored) => {
                    self.publish_transition(&transition);
                    log_run_operation(
                        "transition",
                        run_uuid,
                        "pipeline",
                        stored.state.as_str(),
                        Some(current.state.as_str()),
                    );
                    return Ok(stored);
                }
                Err(err) if err.is_concurrent_modification() => {
                    debug!(
                        run_uuid = %run_uuid,
                        attempt,
                        "Version conflict, re-validating transition"
                    );
                }
                Err(err) => return Err(persistence_error(run_uuid, err)),
            }
        }

        warn!(run_uuid = %run_uuid, attempts, "Transition abandoned after repeated conflicts");
        Err(OrchestrationError::ConcurrencyRetriesExhausted {
            entity: PIPELINE_RUN,
            uuid: run_uuid,
            attempts,
        })
    }

    /// Commit `CANCELLED`, then signal the executor.
    ///
    /// With `always_signal` off the executor is only told about runs it has
    /// acknowledged.
    pub(crate) async fn cancel_with_metadata(
        &self,
        run_uuid: Uuid,
        metadata: Value,
        always_signal: bool,
    ) -> OrchestrationResult<PipelineRun> {
        let cancelled = self
            .commit_pipeline_transition(run_uuid, RunState::Cancelled, metadata, |_| Ok(()), |_| {})
            .await?;

        if always_signal || cancelled.executor_token.is_some() || cancelled.started_at.is_some() {
            self.signal_cancel(&cancelled).await;
        }
        Ok(cancelled)
    }

    async fn signal_cancel(&self, run: &PipelineRun) {
        let limit = self.config.executor.cancel_timeout();
        match timeout(
            limit,
            self.executor.cancel(run.uuid, run.executor_token.as_deref()),
        )
        .await
        {
            Ok(Ok(())) => debug!(run_uuid = %run.uuid, "Executor acknowledged cancellation"),
            Ok(Err(err)) => {
                warn!(run_uuid = %run.uuid, error = %err, "Executor cancel signal failed")
            }
            Err(_) => warn!(
                run_uuid = %run.uuid,
                timeout_ms = self.config.executor.cancel_timeout_ms,
                "Executor cancel signal timed out"
            ),
        }
    }

    pub(crate) fn publish_transition(&self, transition: &NewRunTransition) {
        self.publish(
            transition_event_name(transition.run_kind, transition.to_state),
            transition.run_uuid,
            transition.run_kind,
            Some(transition.from_state),
            transition.to_state,
            transition.metadata.clone(),
        );
    }

    pub(crate) fn publish(
        &self,
        name: &str,
        run_uuid: Uuid,
        run_kind: RunKind,
        from_state: Option<RunState>,
        new_state: RunState,
        context: Value,
    ) {
        let delivered = self
            .event_publisher
            .publish(name, run_uuid, run_kind, from_state, new_state, context);
        debug!(event = name, run_uuid = %run_uuid, delivered, "Published lifecycle event");
    }
}

/// Downgrade an illegal transition to an ignored callback
pub(crate) fn callback_outcome(
    run_uuid: Uuid,
    result: OrchestrationResult<PipelineRun>,
) -> OrchestrationResult<CallbackOutcome> {
    match result {
        Ok(run) => Ok(CallbackOutcome::Applied(run)),
        Err(err) if err.is_invalid_transition() => {
            warn!(run_uuid = %run_uuid, error = %err, "Ignoring callback");
            Ok(CallbackOutcome::Ignored {
                run_uuid,
                reason: err.to_string(),
            })
        }
        Err(err) => Err(err),
    }
}

fn persistence_error(run_uuid: Uuid, err: PersistenceError) -> OrchestrationError {
    match err {
        // Soft-deleted or removed between read and write
        PersistenceError::RecordNotFound { .. } => {
            OrchestrationError::not_found(PIPELINE_RUN, run_uuid)
        }
        other => other.into(),
    }
}

fn generate_status_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Reject empty, duplicate, oversized or path-like input names
pub(crate) fn validate_inputs(inputs: &[RunInputFile]) -> OrchestrationResult<()> {
    let mut names = HashSet::with_capacity(inputs.len());
    for input in inputs {
        let name = input.name.as_str();
        if name.trim().is_empty() {
            return Err(OrchestrationError::validation("inputs", "input name is empty"));
        }
        if name.len() > system::MAX_INPUT_NAME_LENGTH {
            return Err(OrchestrationError::validation(
                "inputs",
                format!(
                    "input name exceeds {} characters",
                    system::MAX_INPUT_NAME_LENGTH
                ),
            ));
        }
        if is_path_like(name) {
            return Err(OrchestrationError::validation(
                "inputs",
                format!("input name '{name}' must be a plain file name"),
            ));
        }
        if !names.insert(name) {
            return Err(OrchestrationError::validation(
                "inputs",
                format!("duplicate input name '{name}'"),
            ));
        }
    }
    Ok(())
}

fn is_path_like(name: &str) -> bool {
    name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
}

pub(crate) fn validate_callback_url(url: &str) -> OrchestrationResult<()> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(OrchestrationError::validation(
            "callback_url",
            "must be an absolute http or https URL",
        )),
    }
}

fn validate_idempotency_key(key: &str) -> OrchestrationResult<()> {
    if key.trim().is_empty() {
        return Err(OrchestrationError::validation(
            "idempotency_key",
            "must not be empty",
        ));
    }
    if key.len() > system::MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(OrchestrationError::validation(
            "idempotency_key",
            format!(
                "must be at most {} characters",
                system::MAX_IDEMPOTENCY_KEY_LENGTH
            ),
        ));
    }
    Ok(())
}

fn validate_artifacts(outputs: &[RunArtifact]) -> OrchestrationResult<()> {
    for artifact in outputs {
        if artifact.name.trim().is_empty() || artifact.url.trim().is_empty() {
            return Err(OrchestrationError::validation(
                "outputs",
                "artifacts need a name and a url",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_name_validation() {
        assert!(validate_inputs(&[RunInputFile::new("data.csv", b"x".to_vec())]).is_ok());
        assert!(validate_inputs(&[]).is_ok());

        for bad in ["", "  ", ".", "..", "a/b.csv", "..\\evil", "nul\0byte"] {
            let err = validate_inputs(&[RunInputFile::new(bad, Vec::new())]).unwrap_err();
            assert!(
                matches!(
                    err,
                    OrchestrationError::Validation { ref field, .. } if field == "inputs"
                ),
                "expected validation error for {bad:?}"
            );
        }

        let long = "a".repeat(system::MAX_INPUT_NAME_LENGTH + 1);
        assert!(validate_inputs(&[RunInputFile::new(long, Vec::new())]).is_err());
    }

    #[test]
    fn test_duplicate_input_names_rejected() {
        let err = validate_inputs(&[
            RunInputFile::new("a.csv", b"1".to_vec()),
            RunInputFile::new("a.csv", b"2".to_vec()),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate input name 'a.csv'"));
    }

    #[test]
    fn test_callback_url_validation() {
        assert!(validate_callback_url("http://localhost:8000/cb").is_ok());
        assert!(validate_callback_url("https://example.com").is_ok());
        assert!(validate_callback_url("ftp://example.com").is_err());
        assert!(validate_callback_url("http://").is_err());
        assert!(validate_callback_url("example.com/callback").is_err());
    }

    #[test]
    fn test_idempotency_key_validation() {
        assert!(validate_idempotency_key("req-1").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key(&"k".repeat(129)).is_err());
    }

    #[test]
    fn test_status_tokens_are_unique() {
        let a = generate_status_token();
        let b = generate_status_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_callback_report_deserializes_without_optional_fields() {
        let report: CallbackReport =
            serde_json::from_value(json!({ "state": "COMPLETED", "token": "t" })).unwrap();
        assert_eq!(report, CallbackReport::new(RunState::Completed, "t"));

        let outcome = CallbackOutcome::Ignored {
            run_uuid: Uuid::nil(),
            reason: "duplicate".to_string(),
        };
        assert!(!outcome.is_applied());
        assert!(outcome.run().is_none());
    }
}
