pub mod pipeline;
pub mod pipeline_run;
pub mod run_transition;
pub mod workflow;
pub mod workflow_run;

// Re-export core models for easy access
pub use pipeline::{NewPipeline, Pipeline};
pub use pipeline_run::{ConsoleOutput, NewPipelineRun, PipelineRun, RunArtifact, RunInput};
pub use run_transition::{NewRunTransition, RunKind, RunTransition};
pub use workflow::{NewWorkflow, Workflow, WorkflowPipeline, WorkflowPipelineDependency};
pub use workflow_run::{WorkflowPipelineRun, WorkflowRun};
