use super::states::RunState;
use thiserror::Error;
use uuid::Uuid;

/// Error types for state machine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition for run {run_uuid} from {from} to {to}")]
    InvalidTransition {
        run_uuid: Uuid,
        from: RunState,
        to: RunState,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StateMachineError {
    pub fn invalid_transition(run_uuid: Uuid, from: RunState, to: RunState) -> Self {
        Self::InvalidTransition { run_uuid, from, to }
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
