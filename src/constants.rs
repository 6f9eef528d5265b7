//! # System Constants
//!
//! Lifecycle event names, state groupings and storage key layout shared by
//! the orchestrators, the stores and event subscribers.

// Re-export state type for convenience
pub use crate::state_machine::RunState as RunStatus;

/// Lifecycle events published after a committed transition
pub mod events {
    // Pipeline run lifecycle events
    pub const PIPELINE_RUN_CREATED: &str = "pipeline_run.created";
    pub const PIPELINE_RUN_RESET: &str = "pipeline_run.reset";
    pub const PIPELINE_RUN_QUEUED: &str = "pipeline_run.queued";
    pub const PIPELINE_RUN_STARTED: &str = "pipeline_run.started";
    pub const PIPELINE_RUN_FAILED: &str = "pipeline_run.failed";
    pub const PIPELINE_RUN_COMPLETED: &str = "pipeline_run.completed";
    pub const PIPELINE_RUN_CANCELLED: &str = "pipeline_run.cancelled";

    // Workflow run lifecycle events
    pub const WORKFLOW_RUN_CREATED: &str = "workflow_run.created";
    pub const WORKFLOW_RUN_RESET: &str = "workflow_run.reset";
    pub const WORKFLOW_RUN_QUEUED: &str = "workflow_run.queued";
    pub const WORKFLOW_RUN_STARTED: &str = "workflow_run.started";
    pub const WORKFLOW_RUN_FAILED: &str = "workflow_run.failed";
    pub const WORKFLOW_RUN_COMPLETED: &str = "workflow_run.completed";
    pub const WORKFLOW_RUN_CANCELLED: &str = "workflow_run.cancelled";
}

/// State groupings used by queries and the dependency resolver
pub mod status_groups {
    use crate::state_machine::RunState;

    /// States a run can never leave
    pub const FINAL_STATES: [RunState; 3] =
        [RunState::Failed, RunState::Completed, RunState::Cancelled];

    /// States in which a run still waits for an executor
    pub const PENDING_STATES: [RunState; 2] = [RunState::NotStarted, RunState::Queued];

    /// States that cancel every downstream run in a workflow
    pub const BLOCKING_STATES: [RunState; 2] = [RunState::Failed, RunState::Cancelled];
}

/// Blob key layout for run inputs
pub mod blob_keys {
    use uuid::Uuid;

    pub fn run_input(pipeline_uuid: Uuid, run_uuid: Uuid, name: &str) -> String {
        format!(
            "{}/{}/inputs/{}",
            pipeline_uuid.simple(),
            run_uuid.simple(),
            name
        )
    }
}

/// System-wide limits
pub mod system {
    /// Longest accepted input file name
    pub const MAX_INPUT_NAME_LENGTH: usize = 255;

    /// Longest accepted idempotency key
    pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;
}
