//! Shared fixtures for the integration tests: a scripted executor, a harness
//! wiring orchestrators to in-memory collaborators, and workflow builders.
#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use parking_lot::Mutex;
use runflow_core::blob_store::InMemoryBlobStore;
use runflow_core::config::RunflowConfig;
use runflow_core::database::{InMemoryRunStore, RunStore};
use runflow_core::models::{
    NewPipeline, NewWorkflow, Pipeline, RunArtifact, Workflow, WorkflowPipeline,
    WorkflowPipelineDependency,
};
use runflow_core::orchestration::{
    DispatchAck, DispatchRequest, ExecutorError, ExecutorResult, RunExecutor, RunOrchestrator,
    WorkflowOrchestrator,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What the mock executor answers to one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedDispatch {
    Running,
    Queued,
    Reject,
    Fail(String),
    /// Never answers within any sane timeout
    Hang,
}

/// Executor double with scripted answers and recorded calls
#[derive(Debug)]
pub struct MockExecutor {
    default_answer: Mutex<ScriptedDispatch>,
    script: Mutex<VecDeque<ScriptedDispatch>>,
    dispatched: Mutex<Vec<DispatchRequest>>,
    cancelled: Mutex<Vec<(Uuid, Option<String>)>>,
    fail_cancel: Mutex<bool>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            default_answer: Mutex::new(ScriptedDispatch::Running),
            script: Mutex::new(VecDeque::new()),
            dispatched: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fail_cancel: Mutex::new(false),
        }
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer used once the script is exhausted
    pub fn answer_by_default(&self, answer: ScriptedDispatch) {
        *self.default_answer.lock() = answer;
    }

    /// Queue answers for the next dispatches, in order
    pub fn script(&self, answers: impl IntoIterator<Item = ScriptedDispatch>) {
        self.script.lock().extend(answers);
    }

    pub fn fail_cancellations(&self) {
        *self.fail_cancel.lock() = true;
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().clone()
    }

    pub fn dispatch_count_for(&self, run_uuid: Uuid) -> usize {
        self.dispatched
            .lock()
            .iter()
            .filter(|request| request.run_uuid == run_uuid)
            .count()
    }

    pub fn was_dispatched(&self, run_uuid: Uuid) -> bool {
        self.dispatch_count_for(run_uuid) > 0
    }

    pub fn last_dispatch_for(&self, run_uuid: Uuid) -> Option<DispatchRequest> {
        self.dispatched
            .lock()
            .iter()
            .rev()
            .find(|request| request.run_uuid == run_uuid)
            .cloned()
    }

    pub fn cancelled(&self) -> Vec<(Uuid, Option<String>)> {
        self.cancelled.lock().clone()
    }

    pub fn was_cancelled(&self, run_uuid: Uuid) -> bool {
        self.cancelled.lock().iter().any(|(uuid, _)| *uuid == run_uuid)
    }

    pub fn token_for(run_uuid: Uuid) -> String {
        format!("exec-{}", run_uuid.simple())
    }

    fn next_answer(&self) -> ScriptedDispatch {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_answer.lock().clone())
    }
}

#[async_trait]
impl RunExecutor for MockExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> ExecutorResult<DispatchAck> {
        let run_uuid = request.run_uuid;
        self.dispatched.lock().push(request);

        match self.next_answer() {
            ScriptedDispatch::Running => Ok(DispatchAck::running(Self::token_for(run_uuid))),
            ScriptedDispatch::Queued => Ok(DispatchAck::queued(Self::token_for(run_uuid))),
            ScriptedDispatch::Reject => Ok(DispatchAck::rejected()),
            ScriptedDispatch::Fail(reason) => Err(ExecutorError::Unreachable { reason }),
            ScriptedDispatch::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(DispatchAck::running(Self::token_for(run_uuid)))
            }
        }
    }

    async fn cancel(&self, run_uuid: Uuid, executor_token: Option<&str>) -> ExecutorResult<()> {
        self.cancelled
            .lock()
            .push((run_uuid, executor_token.map(str::to_string)));
        if *self.fail_cancel.lock() {
            return Err(ExecutorError::Unreachable {
                reason: "executor offline".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration with short executor timeouts
pub fn test_config() -> RunflowConfig {
    let mut config = RunflowConfig::default();
    config.executor.dispatch_timeout_ms = 100;
    config.executor.cancel_timeout_ms = 100;
    config
}

/// Orchestrators wired to in-memory collaborators
pub struct TestHarness {
    pub store: Arc<InMemoryRunStore>,
    pub executor: Arc<MockExecutor>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub runs: Arc<RunOrchestrator>,
    pub workflows: WorkflowOrchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: RunflowConfig) -> Self {
        let store = Arc::new(InMemoryRunStore::new());
        let executor = Arc::new(MockExecutor::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let runs = Arc::new(RunOrchestrator::new(
            store.clone(),
            executor.clone(),
            blobs.clone(),
            config,
        ));
        let workflows = WorkflowOrchestrator::new(runs.clone());

        Self {
            store,
            executor,
            blobs,
            runs,
            workflows,
        }
    }

    pub async fn create_pipeline(&self, name: &str) -> Pipeline {
        let pipeline = Pipeline::new(NewPipeline {
            name: name.to_string(),
            description: format!("{name} test pipeline"),
        });
        self.store
            .insert_pipeline(&pipeline)
            .await
            .expect("insert pipeline");
        pipeline
    }

    /// Workflow with one pipeline per node name and the given edges
    pub async fn create_workflow(&self, nodes: &[&str], edges: &[(&str, &str)]) -> WorkflowFixture {
        let workflow = Workflow::new(NewWorkflow {
            name: format!("workflow-{}", nodes.join("-")),
            description: String::new(),
        });
        self.store
            .insert_workflow(&workflow)
            .await
            .expect("insert workflow");

        let mut fixture = WorkflowFixture {
            workflow,
            nodes: HashMap::new(),
        };
        for name in nodes {
            let pipeline = self.create_pipeline(name).await;
            let workflow_pipeline = WorkflowPipeline::new(fixture.workflow.uuid, pipeline.uuid);
            self.store
                .insert_workflow_pipeline(&workflow_pipeline)
                .await
                .expect("insert workflow pipeline");
            fixture.nodes.insert(name.to_string(), workflow_pipeline);
        }
        for (from, to) in edges {
            let dependency = WorkflowPipelineDependency::new(fixture.node(from), fixture.node(to));
            self.store
                .insert_workflow_pipeline_dependency(&dependency)
                .await
                .expect("insert dependency");
        }

        fixture
    }
}

pub struct WorkflowFixture {
    pub workflow: Workflow,
    pub nodes: HashMap<String, WorkflowPipeline>,
}

impl WorkflowFixture {
    /// Workflow pipeline uuid of a node
    pub fn node(&self, name: &str) -> Uuid {
        self.nodes[name].uuid
    }

    pub fn pipeline_uuid(&self, name: &str) -> Uuid {
        self.nodes[name].pipeline_uuid
    }
}

pub fn artifact(name: &str) -> RunArtifact {
    RunArtifact {
        name: name.to_string(),
        url: format!("s3://runflow-artifacts/{name}"),
    }
}
