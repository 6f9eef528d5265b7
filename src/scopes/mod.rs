//! # Query Scopes
//!
//! Chainable, parameterized queries over run tables for the PostgreSQL store.
//!
//! Soft-delete filtering is never ambient: every scope is constructed with an
//! explicit `include_deleted` flag. With the flag off, a run row is returned
//! only when neither the run nor its owning pipeline/workflow is soft-deleted.
//!
//! ```rust,no_run
//! use runflow_core::scopes::RunScope;
//! use runflow_core::state_machine::RunState;
//! # fn example(pipeline_uuid: uuid::Uuid) {
//! let scope = RunScope::pipeline_runs(false)
//!     .for_owner(pipeline_uuid)
//!     .in_state(RunState::Running)
//!     .ordered();
//! assert!(scope.sql().contains("ORDER BY"));
//! # }
//! ```

pub mod run;

pub use run::RunScope;
