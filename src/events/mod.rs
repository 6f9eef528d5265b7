//! # Run Lifecycle Events
//!
//! In-process broadcast of run creation and committed transitions. Events are
//! published only after the store accepted the write they describe.

pub mod publisher;

// Re-export key types for convenience
pub use publisher::{EventPublisher, RunLifecycleEvent};
