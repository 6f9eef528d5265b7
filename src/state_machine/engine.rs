use super::errors::{StateMachineError, StateMachineResult};
use super::states::RunState;
use crate::models::run_transition::{NewRunTransition, RunKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A record whose lifecycle is governed by [`RunState`]
pub trait Transitionable: Clone {
    fn run_uuid(&self) -> Uuid;

    fn run_kind(&self) -> RunKind;

    fn state(&self) -> RunState;

    /// Optimistic concurrency token, bumped by every committed transition
    fn version(&self) -> i64;

    /// Unchecked state write. Only the engine calls this.
    fn set_state(&mut self, to: RunState, at: DateTime<Utc>);
}

/// Result of a validated transition: the updated run plus its history row
#[derive(Debug, Clone)]
pub struct TransitionOutcome<T> {
    pub run: T,
    pub transition: NewRunTransition,
}

/// Pure transition validation and application.
///
/// The engine never touches storage. Callers persist `TransitionOutcome`
/// with a compare-and-swap against the version the engine validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionEngine;

impl TransitionEngine {
    pub fn is_valid_transition(from: RunState, to: RunState) -> bool {
        from.is_valid_transition(to)
    }

    pub fn in_final_state(state: RunState) -> bool {
        state.in_final_state()
    }

    /// Reject the transition unless the table allows it
    pub fn check<T: Transitionable>(run: &T, to: RunState) -> StateMachineResult<()> {
        let from = run.state();
        if from.is_valid_transition(to) {
            Ok(())
        } else {
            Err(StateMachineError::invalid_transition(run.run_uuid(), from, to))
        }
    }

    /// Apply a transition, returning the updated run. `run` itself is untouched.
    pub fn apply<T: Transitionable>(run: &T, to: RunState) -> StateMachineResult<T> {
        Self::apply_with_metadata(run, to, Value::Null).map(|outcome| outcome.run)
    }

    /// Apply a transition and build the history row describing it
    pub fn apply_with_metadata<T: Transitionable>(
        run: &T,
        to: RunState,
        metadata: Value,
    ) -> StateMachineResult<TransitionOutcome<T>> {
        Self::check(run, to)?;

        let now = Utc::now();
        let from = run.state();
        let mut updated = run.clone();
        updated.set_state(to, now);

        let metadata = match metadata {
            Value::Null => {
                serde_json::json!({ "event": transition_event_name(run.run_kind(), to) })
            }
            other => other,
        };

        Ok(TransitionOutcome {
            run: updated,
            transition: NewRunTransition {
                run_uuid: run.run_uuid(),
                run_kind: run.run_kind(),
                from_state: from,
                to_state: to,
                metadata,
                created_at: now,
            },
        })
    }
}

/// Lifecycle event name published for a transition into `to`
pub fn transition_event_name(kind: RunKind, to: RunState) -> &'static str {
    use crate::constants::events;

    match (kind, to) {
        (RunKind::Pipeline, RunState::NotStarted) => events::PIPELINE_RUN_RESET,
        (RunKind::Pipeline, RunState::Queued) => events::PIPELINE_RUN_QUEUED,
        (RunKind::Pipeline, RunState::Running) => events::PIPELINE_RUN_STARTED,
        (RunKind::Pipeline, RunState::Failed) => events::PIPELINE_RUN_FAILED,
        (RunKind::Pipeline, RunState::Completed) => events::PIPELINE_RUN_COMPLETED,
        (RunKind::Pipeline, RunState::Cancelled) => events::PIPELINE_RUN_CANCELLED,
        (RunKind::Workflow, RunState::NotStarted) => events::WORKFLOW_RUN_RESET,
        (RunKind::Workflow, RunState::Queued) => events::WORKFLOW_RUN_QUEUED,
        (RunKind::Workflow, RunState::Running) => events::WORKFLOW_RUN_STARTED,
        (RunKind::Workflow, RunState::Failed) => events::WORKFLOW_RUN_FAILED,
        (RunKind::Workflow, RunState::Completed) => events::WORKFLOW_RUN_COMPLETED,
        (RunKind::Workflow, RunState::Cancelled) => events::WORKFLOW_RUN_CANCELLED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowRun;

    #[test]
    fn test_apply_valid_transition() {
        let run = WorkflowRun::new(Uuid::new_v4());
        let running = TransitionEngine::apply(&run, RunState::Running).unwrap();

        assert_eq!(running.state, RunState::Running);
        assert_eq!(running.version, run.version + 1);
        assert!(running.started_at.is_some());
        // The input is never mutated
        assert_eq!(run.state, RunState::NotStarted);
    }

    #[test]
    fn test_apply_invalid_transition_leaves_run_unchanged() {
        let run = WorkflowRun::new(Uuid::new_v4());
        let err = TransitionEngine::apply(&run, RunState::Completed).unwrap_err();

        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                run_uuid: run.uuid,
                from: RunState::NotStarted,
                to: RunState::Completed,
            }
        );
        assert_eq!(run.state, RunState::NotStarted);
        assert_eq!(run.version, 1);
    }

    #[test]
    fn test_terminal_state_rejects_everything() {
        let run = WorkflowRun::new(Uuid::new_v4());
        let running = TransitionEngine::apply(&run, RunState::Running).unwrap();
        let failed = TransitionEngine::apply(&running, RunState::Failed).unwrap();

        for to in RunState::ALL {
            assert!(TransitionEngine::apply(&failed, to).is_err());
        }
    }

    #[test]
    fn test_outcome_carries_history_row() {
        let run = WorkflowRun::new(Uuid::new_v4());
        let outcome =
            TransitionEngine::apply_with_metadata(&run, RunState::Cancelled, Value::Null).unwrap();

        assert_eq!(outcome.transition.run_uuid, run.uuid);
        assert_eq!(outcome.transition.run_kind, RunKind::Workflow);
        assert_eq!(outcome.transition.from_state, RunState::NotStarted);
        assert_eq!(outcome.transition.to_state, RunState::Cancelled);
        assert_eq!(outcome.transition.metadata["event"], "workflow_run.cancelled");
        assert!(outcome.run.completed_at.is_some());
    }

    #[test]
    fn test_custom_metadata_is_kept() {
        let run = WorkflowRun::new(Uuid::new_v4());
        let outcome = TransitionEngine::apply_with_metadata(
            &run,
            RunState::Running,
            serde_json::json!({"reason": "first pipeline dispatched"}),
        )
        .unwrap();

        assert_eq!(outcome.transition.metadata["reason"], "first pipeline dispatched");
    }
}
