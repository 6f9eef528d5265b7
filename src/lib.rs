#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Runflow Core
//!
//! Run-state machine and orchestration core for pipeline and workflow runs.
//!
//! ## Overview
//!
//! A *pipeline run* is one execution attempt of a pipeline, carried out by an
//! external executor. A *workflow run* executes a DAG of pipelines, one
//! pipeline run per node. This crate owns the lifecycle of both: the closed
//! set of run states and legal transitions, creation and dispatch, executor
//! callbacks, cancellation, dependency propagation across a workflow, and the
//! persistence contract that makes every transition atomic.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Run states, transition table and transition engine
//! - [`models`] - Pipelines, workflows, runs and transition history
//! - [`database`] - `RunStore` contract with in-memory and PostgreSQL stores
//! - [`scopes`] - Soft-delete aware query scopes (feature `postgres`)
//! - [`orchestration`] - Run and workflow orchestrators, dependency resolver
//! - [`events`] - Lifecycle event broadcast
//! - [`blob_store`] - Storage for run input bytes
//! - [`config`] - YAML + environment configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runflow_core::blob_store::InMemoryBlobStore;
//! use runflow_core::config::RunflowConfig;
//! use runflow_core::database::{InMemoryRunStore, RunStore};
//! use runflow_core::models::{NewPipeline, Pipeline};
//! use runflow_core::orchestration::{CreateRunRequest, RunExecutor, RunInputFile, RunOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn example(executor: Arc<dyn RunExecutor>) -> runflow_core::Result<()> {
//! let store = Arc::new(InMemoryRunStore::new());
//! let pipeline = Pipeline::new(NewPipeline {
//!     name: "nightly-report".to_string(),
//!     description: String::new(),
//! });
//! store.insert_pipeline(&pipeline).await?;
//!
//! let orchestrator = RunOrchestrator::new(
//!     store,
//!     executor,
//!     Arc::new(InMemoryBlobStore::new()),
//!     RunflowConfig::default(),
//! );
//! let run = orchestrator
//!     .create_run(
//!         pipeline.uuid,
//!         CreateRunRequest::new(vec![RunInputFile::new("data.csv", b"a,b\n".to_vec())]),
//!     )
//!     .await?;
//! println!("run {} is {}", run.uuid, run.state);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                      # Unit and integration tests (in-memory store)
//! cargo test -- --ignored         # PostgreSQL tests, needs DATABASE_URL
//! ```

pub mod blob_store;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
#[cfg(feature = "postgres")]
pub mod scopes;
pub mod state_machine;

pub use blob_store::{BlobError, BlobStore, InMemoryBlobStore};
pub use config::{ConfigManager, ConfigurationError, RunflowConfig};
pub use constants::{blob_keys, status_groups, system};
// Re-export constants events with different name to avoid conflict with the events module
pub use constants::events as lifecycle_events;
pub use database::{InMemoryRunStore, PersistenceError, RunStore};
#[cfg(feature = "postgres")]
pub use database::{DatabaseConnection, PgRunStore};
pub use error::{Result, RunflowError};
pub use events::{EventPublisher, RunLifecycleEvent};
pub use models::{
    Pipeline, PipelineRun, RunKind, RunTransition, Workflow, WorkflowPipeline,
    WorkflowPipelineDependency, WorkflowRun,
};
pub use orchestration::{
    CallbackOutcome, CallbackReport, CreateRunRequest, CreateWorkflowRunRequest,
    OrchestrationError, RunExecutor, RunInputFile, RunOrchestrator, WorkflowOrchestrator,
};
pub use state_machine::{RunState, StateMachineError, TransitionEngine};
