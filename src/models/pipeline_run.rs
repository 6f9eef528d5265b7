//! # Pipeline Run
//!
//! One execution attempt of a pipeline.
//!
//! ## Lifecycle
//!
//! A run is created in `NOT_STARTED` and afterwards changes state only through
//! the [`TransitionEngine`](crate::state_machine::TransitionEngine). Each
//! committed change bumps `version`, which the stores use as the optimistic
//! concurrency token for compare-and-swap updates.
//!
//! Inputs and outputs are references (name + URL) into blob storage; the bytes
//! never live on the run itself.

use crate::models::run_transition::RunKind;
use crate::state_machine::{RunState, Transitionable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named reference to an input file in blob storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    pub name: String,
    pub url: String,
}

/// Named reference to an output artifact reported by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub name: String,
    pub url: String,
}

/// Captured console output of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub uuid: Uuid,
    pub pipeline_uuid: Uuid,
    /// 1-based ordinal of this run within its pipeline, assigned by the store on insert
    pub sequence: i32,
    pub state: RunState,
    pub inputs: Vec<RunInput>,
    pub outputs: Vec<RunArtifact>,
    pub console: ConsoleOutput,
    pub callback_url: String,
    pub status_update_token: String,
    pub status_update_token_expires_at: DateTime<Utc>,
    /// Token handed back by the executor when it accepted the run
    pub executor_token: Option<String>,
    pub idempotency_key: Option<String>,
    pub version: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// New PipelineRun for creation
#[derive(Debug, Clone)]
pub struct NewPipelineRun {
    pub uuid: Uuid,
    pub pipeline_uuid: Uuid,
    pub inputs: Vec<RunInput>,
    pub callback_url: String,
    pub status_update_token: String,
    pub status_update_token_expires_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

impl PipelineRun {
    pub fn new(new_run: NewPipelineRun) -> Self {
        let now = Utc::now();
        Self {
            uuid: new_run.uuid,
            pipeline_uuid: new_run.pipeline_uuid,
            sequence: 0,
            state: RunState::NotStarted,
            inputs: new_run.inputs,
            outputs: Vec::new(),
            console: ConsoleOutput::default(),
            callback_url: new_run.callback_url,
            status_update_token: new_run.status_update_token,
            status_update_token_expires_at: new_run.status_update_token_expires_at,
            executor_token: None,
            idempotency_key: new_run.idempotency_key,
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Check the token an executor presents on callback
    pub fn accepts_status_token(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.status_update_token == token && now < self.status_update_token_expires_at
    }

    /// True once an executor has acknowledged the run
    pub fn is_dispatched(&self) -> bool {
        self.executor_token.is_some() || self.state != RunState::NotStarted
    }
}

impl Transitionable for PipelineRun {
    fn run_uuid(&self) -> Uuid {
        self.uuid
    }

    fn run_kind(&self) -> RunKind {
        RunKind::Pipeline
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_run() -> PipelineRun {
        PipelineRun::new(NewPipelineRun {
            uuid: Uuid::new_v4(),
            pipeline_uuid: Uuid::new_v4(),
            inputs: vec![RunInput {
                name: "input.csv".to_string(),
                url: "memory://p/r/inputs/input.csv".to_string(),
            }],
            callback_url: "http://localhost/callback".to_string(),
            status_update_token: "token".to_string(),
            status_update_token_expires_at: Utc::now() + Duration::hours(1),
            idempotency_key: None,
        })
    }

    #[test]
    fn test_new_run_defaults() {
        let run = new_run();
        assert_eq!(run.state, RunState::NotStarted);
        assert_eq!(run.version, 1);
        assert!(run.outputs.is_empty());
        assert!(!run.is_dispatched());
        assert!(run.started_at.is_none());
    }

    #[test]
    fn test_status_token_check() {
        let run = new_run();
        let now = Utc::now();
        assert!(run.accepts_status_token("token", now));
        assert!(!run.accepts_status_token("other", now));
        assert!(!run.accepts_status_token("token", now + Duration::hours(2)));
    }

    #[test]
    fn test_set_state_tracks_timestamps() {
        let mut run = new_run();
        let started = Utc::now();
        run.set_state(RunState::Running, started);
        assert_eq!(run.started_at, Some(started));
        assert_eq!(run.version, 2);
        assert!(run.completed_at.is_none());

        let finished = started + Duration::seconds(5);
        run.set_state(RunState::Completed, finished);
        assert_eq!(run.started_at, Some(started));
        assert_eq!(run.completed_at, Some(finished));
        assert_eq!(run.updated_at, finished);
        assert_eq!(run.version, 3);
    }
}
