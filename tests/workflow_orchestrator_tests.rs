mod common;

use common::{artifact, MockExecutor, ScriptedDispatch, TestHarness, WorkflowFixture};
use runflow_core::constants::events;
use runflow_core::database::RunStore;
use runflow_core::models::PipelineRun;
use runflow_core::orchestration::{
    CallbackReport, CreateRunRequest, CreateWorkflowRunRequest, OrchestrationError, RunInputFile,
    WorkflowRunSnapshot,
};
use runflow_core::state_machine::RunState;
use uuid::Uuid;

async fn snapshot(harness: &TestHarness, workflow_run_uuid: Uuid) -> WorkflowRunSnapshot {
    harness
        .workflows
        .find_workflow_pipeline_runs(workflow_run_uuid)
        .await
        .expect("workflow run snapshot")
}

fn run_of<'a>(
    snapshot: &'a WorkflowRunSnapshot,
    fixture: &WorkflowFixture,
    node: &str,
) -> &'a PipelineRun {
    snapshot
        .pipeline_run_for(fixture.node(node))
        .unwrap_or_else(|| panic!("no pipeline run for node {node}"))
}

async fn complete(harness: &TestHarness, run: &PipelineRun, outputs: &[&str]) {
    let report = CallbackReport::new(RunState::Completed, run.status_update_token.clone())
        .with_outputs(outputs.iter().map(|name| artifact(name)).collect());
    harness
        .workflows
        .record_callback(run.uuid, report)
        .await
        .expect("completion callback");
}

#[tokio::test]
async fn test_create_materializes_runs_and_dispatches_roots() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(
            &["extract", "transform", "load"],
            &[("extract", "transform"), ("transform", "load")],
        )
        .await;

    let created = harness
        .workflows
        .create_workflow_run(
            fixture.workflow.uuid,
            CreateWorkflowRunRequest::new(vec![RunInputFile::new("seed.json", b"{}".to_vec())]),
        )
        .await
        .unwrap();

    assert_eq!(created.pipeline_runs.len(), 3);
    assert_eq!(created.workflow_run.state, RunState::Running);

    let extract = run_of(&created, &fixture, "extract");
    let transform = run_of(&created, &fixture, "transform");
    let load = run_of(&created, &fixture, "load");

    assert_eq!(extract.state, RunState::Running);
    assert_eq!(extract.pipeline_uuid, fixture.pipeline_uuid("extract"));
    assert_eq!(extract.inputs.len(), 1);
    assert_eq!(extract.inputs[0].name, "seed.json");
    assert_eq!(transform.state, RunState::NotStarted);
    assert!(transform.inputs.is_empty());
    assert_eq!(load.state, RunState::NotStarted);

    assert!(harness.executor.was_dispatched(extract.uuid));
    assert!(!harness.executor.was_dispatched(transform.uuid));
    assert!(!harness.executor.was_dispatched(load.uuid));
}

#[tokio::test]
async fn test_chain_failure_cancels_downstream_and_fails_workflow() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")])
        .await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let a = run_of(&created, &fixture, "a").clone();

    harness
        .workflows
        .record_callback(
            a.uuid,
            CallbackReport::new(RunState::Failed, a.status_update_token.clone())
                .with_console("", "boom\n"),
        )
        .await
        .unwrap();

    let after = snapshot(&harness, created.workflow_run.uuid).await;
    assert_eq!(run_of(&after, &fixture, "a").state, RunState::Failed);
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::Cancelled);
    assert_eq!(run_of(&after, &fixture, "c").state, RunState::Cancelled);
    assert_eq!(after.workflow_run.state, RunState::Failed);
    assert!(after.workflow_run.completed_at.is_some());

    // Never dispatched, so the executor is not told about the cancellations
    assert_eq!(harness.executor.dispatched().len(), 1);
    assert!(harness.executor.cancelled().is_empty());

    let b = run_of(&after, &fixture, "b");
    let history = harness.runs.run_history(b.uuid).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metadata["source"], "upstream_blocked");
}

#[tokio::test]
async fn test_diamond_completes_with_upstream_outputs_as_inputs() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        )
        .await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let workflow_run_uuid = created.workflow_run.uuid;

    complete(&harness, run_of(&created, &fixture, "a"), &["a.parquet"]).await;

    let after_a = snapshot(&harness, workflow_run_uuid).await;
    let b = run_of(&after_a, &fixture, "b").clone();
    let c = run_of(&after_a, &fixture, "c").clone();
    assert_eq!(b.state, RunState::Running);
    assert_eq!(c.state, RunState::Running);
    assert_eq!(b.inputs, vec![runflow_core::models::RunInput {
        name: "a.parquet".to_string(),
        url: artifact("a.parquet").url,
    }]);
    assert_eq!(run_of(&after_a, &fixture, "d").state, RunState::NotStarted);

    complete(&harness, &b, &["b.parquet"]).await;
    let after_b = snapshot(&harness, workflow_run_uuid).await;
    let d = run_of(&after_b, &fixture, "d").clone();
    assert_eq!(d.state, RunState::NotStarted);
    assert!(!harness.executor.was_dispatched(d.uuid));
    assert_eq!(after_b.workflow_run.state, RunState::Running);

    complete(&harness, &c, &["c.parquet"]).await;
    let after_c = snapshot(&harness, workflow_run_uuid).await;
    let d = run_of(&after_c, &fixture, "d").clone();
    assert_eq!(d.state, RunState::Running);
    assert_eq!(harness.executor.dispatch_count_for(d.uuid), 1);
    let input_names: Vec<String> = harness
        .executor
        .last_dispatch_for(d.uuid)
        .unwrap()
        .inputs
        .into_iter()
        .map(|input| input.name)
        .collect();
    assert_eq!(input_names, vec!["b.parquet", "c.parquet"]);

    let mut lifecycle = harness.runs.event_publisher().subscribe();
    complete(&harness, &d, &["report.pdf"]).await;

    let done = snapshot(&harness, workflow_run_uuid).await;
    assert_eq!(done.workflow_run.state, RunState::Completed);
    assert!(done
        .pipeline_runs
        .iter()
        .all(|member| member.pipeline_run.state == RunState::Completed));

    let names: Vec<String> = std::iter::from_fn(|| lifecycle.try_recv().ok())
        .map(|event| event.name)
        .collect();
    assert_eq!(
        names,
        vec![events::PIPELINE_RUN_COMPLETED, events::WORKFLOW_RUN_COMPLETED]
    );

    let history = harness
        .workflows
        .workflow_run_history(workflow_run_uuid)
        .await
        .unwrap();
    let states: Vec<RunState> = history.iter().map(|row| row.to_state).collect();
    assert_eq!(states, vec![RunState::Running, RunState::Completed]);
}

#[tokio::test]
async fn test_cancel_workflow_run_cancels_constituents() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(&["a", "b"], &[("a", "b")])
        .await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let a = run_of(&created, &fixture, "a").clone();
    let b = run_of(&created, &fixture, "b").clone();

    let cancelled = harness
        .workflows
        .cancel_workflow_run(created.workflow_run.uuid)
        .await
        .unwrap();
    assert_eq!(cancelled.state, RunState::Cancelled);

    let after = snapshot(&harness, created.workflow_run.uuid).await;
    assert_eq!(run_of(&after, &fixture, "a").state, RunState::Cancelled);
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::Cancelled);

    // Only the run the executor knows about gets a cancel signal
    assert_eq!(
        harness.executor.cancelled(),
        vec![(a.uuid, Some(MockExecutor::token_for(a.uuid)))]
    );
    assert!(!harness.executor.was_dispatched(b.uuid));

    let err = harness
        .workflows
        .cancel_workflow_run(created.workflow_run.uuid)
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition());
}

#[tokio::test]
async fn test_cancelled_root_cancels_workflow() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(&["a", "b"], &[("a", "b")])
        .await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let a = run_of(&created, &fixture, "a").clone();

    harness.workflows.cancel_pipeline_run(a.uuid).await.unwrap();

    let after = snapshot(&harness, created.workflow_run.uuid).await;
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::Cancelled);
    assert_eq!(after.workflow_run.state, RunState::Cancelled);
}

#[tokio::test]
async fn test_independent_branch_keeps_running_after_failure() {
    let harness = TestHarness::new();
    // a -> b, c stands alone
    let fixture = harness
        .create_workflow(&["a", "b", "c"], &[("a", "b")])
        .await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let a = run_of(&created, &fixture, "a").clone();
    let c = run_of(&created, &fixture, "c").clone();
    assert_eq!(c.state, RunState::Running);

    harness
        .workflows
        .record_callback(
            a.uuid,
            CallbackReport::new(RunState::Failed, a.status_update_token.clone()),
        )
        .await
        .unwrap();

    let after = snapshot(&harness, created.workflow_run.uuid).await;
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::Cancelled);
    assert_eq!(run_of(&after, &fixture, "c").state, RunState::Running);
    assert_eq!(after.workflow_run.state, RunState::Running);

    complete(&harness, &c, &[]).await;
    let done = snapshot(&harness, created.workflow_run.uuid).await;
    assert_eq!(done.workflow_run.state, RunState::Failed);
}

#[tokio::test]
async fn test_empty_workflow_completes_immediately() {
    let harness = TestHarness::new();
    let fixture = harness.create_workflow(&[], &[]).await;

    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();

    assert!(created.pipeline_runs.is_empty());
    assert_eq!(created.workflow_run.state, RunState::Completed);
}

#[tokio::test]
async fn test_deleted_pipelines_and_workflows_are_excluded() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(&["kept", "dropped"], &[("kept", "dropped")])
        .await;
    harness
        .store
        .soft_delete_pipeline(fixture.pipeline_uuid("dropped"))
        .await
        .unwrap();

    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    assert_eq!(created.pipeline_runs.len(), 1);
    assert!(created.pipeline_run_for(fixture.node("dropped")).is_none());

    harness
        .store
        .soft_delete_workflow(fixture.workflow.uuid)
        .await
        .unwrap();
    let err = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(harness
        .workflows
        .find_workflow_run(created.workflow_run.uuid)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_failed_dispatch_is_retried_on_next_evaluation() {
    let harness = TestHarness::new();
    harness
        .executor
        .script([ScriptedDispatch::Fail("executor restarting".to_string())]);
    let fixture = harness.create_workflow(&["only"], &[]).await;

    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let only = run_of(&created, &fixture, "only").clone();
    assert_eq!(only.state, RunState::NotStarted);
    assert_eq!(created.workflow_run.state, RunState::NotStarted);

    let workflow_run = harness
        .workflows
        .on_pipeline_run_transition(only.uuid)
        .await
        .unwrap()
        .expect("run belongs to a workflow");

    assert_eq!(workflow_run.state, RunState::Running);
    assert_eq!(harness.executor.dispatch_count_for(only.uuid), 2);
    assert_eq!(
        harness.runs.find_run(only.uuid).await.unwrap().state,
        RunState::Running
    );
}

#[tokio::test]
async fn test_queued_root_waits_for_running_callback() {
    let harness = TestHarness::new();
    harness.executor.answer_by_default(ScriptedDispatch::Queued);
    let fixture = harness.create_workflow(&["a", "b"], &[("a", "b")]).await;

    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let a = run_of(&created, &fixture, "a").clone();
    assert_eq!(a.state, RunState::NotStarted);
    assert!(a.executor_token.is_some());
    assert_eq!(created.workflow_run.state, RunState::NotStarted);

    // Re-evaluating must not dispatch the queued run a second time
    harness
        .workflows
        .evaluate_workflow_run(created.workflow_run.uuid)
        .await
        .unwrap();
    assert_eq!(harness.executor.dispatch_count_for(a.uuid), 1);

    harness
        .workflows
        .record_callback(
            a.uuid,
            CallbackReport::new(RunState::Running, a.status_update_token.clone()),
        )
        .await
        .unwrap();
    let after = snapshot(&harness, created.workflow_run.uuid).await;
    assert_eq!(after.workflow_run.state, RunState::Running);
}

#[tokio::test]
async fn test_standalone_run_has_no_workflow() {
    let harness = TestHarness::new();
    let pipeline = harness.create_pipeline("standalone").await;
    let run = harness
        .runs
        .create_run(pipeline.uuid, CreateRunRequest::default())
        .await
        .unwrap();

    assert!(harness
        .workflows
        .on_pipeline_run_transition(run.uuid)
        .await
        .unwrap()
        .is_none());

    // Routing a standalone callback through the workflow orchestrator is harmless
    let completed = harness
        .workflows
        .record_callback(
            run.uuid,
            CallbackReport::new(RunState::Completed, run.status_update_token.clone()),
        )
        .await
        .unwrap();
    assert_eq!(completed.state, RunState::Completed);
}

#[tokio::test]
async fn test_find_workflow_runs_in_creation_order() {
    let harness = TestHarness::new();
    let fixture = harness.create_workflow(&["a"], &[]).await;

    let mut created = Vec::new();
    for _ in 0..3 {
        created.push(
            harness
                .workflows
                .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
                .await
                .unwrap()
                .workflow_run
                .uuid,
        );
    }

    let found: Vec<Uuid> = harness
        .workflows
        .find_workflow_runs(fixture.workflow.uuid)
        .await
        .unwrap()
        .into_iter()
        .map(|run| run.uuid)
        .collect();
    assert_eq!(found, created);

    // Every workflow run has its own pipeline run with its own sequence
    let sequences: Vec<i32> = harness
        .store
        .find_pipeline_runs(fixture.pipeline_uuid("a"), false)
        .await
        .unwrap()
        .iter()
        .map(|run| run.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_hidden_source_keeps_dependents_blocked() {
    let harness = TestHarness::new();
    let fixture = harness.create_workflow(&["a", "b"], &[("a", "b")]).await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let workflow_run_uuid = created.workflow_run.uuid;
    let a = run_of(&created, &fixture, "a").clone();
    let b = run_of(&created, &fixture, "b").clone();
    assert_eq!(a.state, RunState::Running);

    // The source disappears from view without ever completing
    assert!(harness
        .store
        .soft_delete_pipeline(fixture.pipeline_uuid("a"))
        .await
        .unwrap());

    let workflow_run = harness
        .workflows
        .evaluate_workflow_run(workflow_run_uuid)
        .await
        .unwrap();

    let after = snapshot(&harness, workflow_run_uuid).await;
    assert!(after.pipeline_run_for(fixture.node("a")).is_none());
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::NotStarted);
    assert!(!harness.executor.was_dispatched(b.uuid));
    assert_eq!(workflow_run.state, RunState::Running);
}

#[tokio::test]
async fn test_soft_deleted_source_run_blocks_dependents() {
    let harness = TestHarness::new();
    let fixture = harness
        .create_workflow(&["a", "b", "c"], &[("a", "c"), ("b", "c")])
        .await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let workflow_run_uuid = created.workflow_run.uuid;
    let a = run_of(&created, &fixture, "a").clone();
    let b = run_of(&created, &fixture, "b").clone();
    let c = run_of(&created, &fixture, "c").clone();

    assert!(harness.store.soft_delete_pipeline_run(a.uuid).await.unwrap());
    complete(&harness, &b, &["b.csv"]).await;

    // b completing re-evaluates the workflow; c still waits on the hidden a
    let after = snapshot(&harness, workflow_run_uuid).await;
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::Completed);
    assert_eq!(run_of(&after, &fixture, "c").state, RunState::NotStarted);
    assert!(!harness.executor.was_dispatched(c.uuid));
}

#[tokio::test]
async fn test_run_orchestrator_refuses_workflow_members() {
    let harness = TestHarness::new();
    harness.executor.answer_by_default(ScriptedDispatch::Reject);
    let fixture = harness.create_workflow(&["a", "b"], &[("a", "b")]).await;
    let created = harness
        .workflows
        .create_workflow_run(fixture.workflow.uuid, CreateWorkflowRunRequest::default())
        .await
        .unwrap();
    let workflow_run_uuid = created.workflow_run.uuid;
    let a = run_of(&created, &fixture, "a").clone();
    let b = run_of(&created, &fixture, "b").clone();
    assert_eq!(a.state, RunState::NotStarted);

    let err = harness
        .runs
        .record_callback(
            a.uuid,
            CallbackReport::new(RunState::Running, a.status_update_token.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::WorkflowOwned { run_uuid, workflow_run_uuid: owner }
            if run_uuid == a.uuid && owner == workflow_run_uuid
    ));
    assert!(harness
        .runs
        .accept_callback(
            a.uuid,
            CallbackReport::new(RunState::Running, a.status_update_token.clone()),
        )
        .await
        .unwrap_err()
        .is_workflow_owned());
    assert!(harness.runs.cancel_run(b.uuid).await.unwrap_err().is_workflow_owned());
    assert!(harness.runs.dispatch_run(a.uuid).await.unwrap_err().is_workflow_owned());

    // Nothing was committed by the refused calls
    let untouched = snapshot(&harness, workflow_run_uuid).await;
    assert_eq!(run_of(&untouched, &fixture, "a").state, RunState::NotStarted);
    assert_eq!(run_of(&untouched, &fixture, "b").state, RunState::NotStarted);
    assert!(harness.runs.run_history(a.uuid).await.unwrap().is_empty());

    // The workflow path commits and moves the dependent along
    harness.executor.answer_by_default(ScriptedDispatch::Running);
    harness
        .workflows
        .record_callback(
            a.uuid,
            CallbackReport::new(RunState::Running, a.status_update_token.clone()),
        )
        .await
        .unwrap();
    complete(&harness, &a, &["a.json"]).await;

    let after = snapshot(&harness, workflow_run_uuid).await;
    assert_eq!(run_of(&after, &fixture, "a").state, RunState::Completed);
    assert_eq!(run_of(&after, &fixture, "b").state, RunState::Running);
    assert!(harness.executor.was_dispatched(b.uuid));
}
