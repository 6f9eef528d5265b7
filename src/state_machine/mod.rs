// Run state machine
//
// A closed RunState enum with a static transition table, and a pure engine that
// applies validated transitions to pipeline and workflow runs.

pub mod engine;
pub mod errors;
pub mod states;

// Re-export main types for convenient access
pub use engine::{transition_event_name, Transitionable, TransitionEngine, TransitionOutcome};
pub use errors::{StateMachineError, StateMachineResult};
pub use states::{in_final_state, is_valid_transition, RunState};
