//! # Orchestration
//!
//! Drives runs through their lifecycle on top of the state machine.
//!
//! ## Core Components
//!
//! - **RunOrchestrator**: creates, dispatches, updates and cancels pipeline runs
//! - **WorkflowOrchestrator**: materializes workflow runs and re-evaluates
//!   them after every committed pipeline run transition
//! - **DependencyResolver**: pure eligibility, cancellation and aggregation
//!   rules over a workflow's dependency graph
//! - **RunExecutor**: the external executor collaborator
//!
//! Every state change is committed to the [`RunStore`](crate::database::RunStore)
//! before lifecycle events are published or dependencies are re-evaluated.

pub mod dependency_resolver;
pub mod errors;
pub mod run_executor;
pub mod run_orchestrator;
pub mod workflow_orchestrator;

pub use dependency_resolver::{DependencyGraph, DependencyResolver};
pub use errors::{OrchestrationError, OrchestrationResult};
pub use run_executor::{
    DispatchAck, DispatchRequest, DispatchStatus, ExecutorError, ExecutorResult, RunExecutor,
};
pub use run_orchestrator::{
    CallbackOutcome, CallbackReport, CreateRunRequest, RunInputFile, RunOrchestrator,
};
pub use workflow_orchestrator::{
    CreateWorkflowRunRequest, WorkflowOrchestrator, WorkflowPipelineRunState, WorkflowRunSnapshot,
};
