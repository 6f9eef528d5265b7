//! # Run Transition
//!
//! Append-only audit trail of committed state changes for pipeline runs and
//! workflow runs.
//!
//! Each committed transition writes one row in the same atomic unit as the run
//! update. `sort_key` numbers the rows of one run from 1 and `most_recent`
//! marks the row describing the run's current state.

use crate::state_machine::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Which kind of run a transition row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Pipeline,
    Workflow,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Workflow => write!(f, "workflow"),
        }
    }
}

impl std::str::FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(Self::Pipeline),
            "workflow" => Ok(Self::Workflow),
            _ => Err(format!("Invalid run kind: {s}")),
        }
    }
}

/// Persisted transition row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTransition {
    pub run_uuid: Uuid,
    pub run_kind: RunKind,
    pub from_state: RunState,
    pub to_state: RunState,
    pub sort_key: i32,
    pub most_recent: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Transition produced by the engine, before the store assigns ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRunTransition {
    pub run_uuid: Uuid,
    pub run_kind: RunKind,
    pub from_state: RunState,
    pub to_state: RunState,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl NewRunTransition {
    /// Materialize into a stored row with the given sort key
    pub fn into_transition(self, sort_key: i32) -> RunTransition {
        RunTransition {
            run_uuid: self.run_uuid,
            run_kind: self.run_kind,
            from_state: self.from_state,
            to_state: self.to_state,
            sort_key,
            most_recent: true,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}
