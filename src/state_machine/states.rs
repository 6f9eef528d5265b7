use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state shared by pipeline runs and workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Initial state when a run is created
    NotStarted,
    /// Run is waiting in an executor queue
    Queued,
    /// Run is being executed
    Running,
    /// Run finished with an error
    Failed,
    /// Run finished successfully
    Completed,
    /// Run was cancelled before finishing
    Cancelled,
}

/// Adjacency table of legal transitions, indexed by the `from` state.
const TRANSITIONS: [(RunState, &[RunState]); 6] = [
    (
        RunState::NotStarted,
        &[RunState::Running, RunState::Cancelled],
    ),
    (RunState::Queued, &[RunState::NotStarted, RunState::Cancelled]),
    (
        RunState::Running,
        &[RunState::Failed, RunState::Completed, RunState::Cancelled],
    ),
    (RunState::Failed, &[]),
    (RunState::Completed, &[]),
    (RunState::Cancelled, &[]),
];

impl RunState {
    /// Every state, in code order
    pub const ALL: [RunState; 6] = [
        Self::NotStarted,
        Self::Queued,
        Self::Running,
        Self::Failed,
        Self::Completed,
        Self::Cancelled,
    ];

    /// States this state may move to
    pub fn allowed_transitions(&self) -> &'static [RunState] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    /// Whether `self -> next` is a legal transition
    pub fn is_valid_transition(&self, next: RunState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn in_final_state(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed | Self::Cancelled)
    }

    /// Check if the run has been picked up by an executor
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this state satisfies a downstream dependency
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if this state blocks every downstream run for good
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Stable numeric code used in storage
    pub fn code(&self) -> i16 {
        match self {
            Self::NotStarted => 1,
            Self::Queued => 2,
            Self::Running => 3,
            Self::Failed => 4,
            Self::Completed => 5,
            Self::Cancelled => 6,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Module-level form of [`RunState::is_valid_transition`]
pub fn is_valid_transition(from: RunState, to: RunState) -> bool {
    from.is_valid_transition(to)
}

/// Module-level form of [`RunState::in_final_state`]
pub fn in_final_state(state: RunState) -> bool {
    state.in_final_state()
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "FAILED" => Ok(Self::Failed),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}

/// Default state for new runs
impl Default for RunState {
    fn default() -> Self {
        Self::NotStarted
    }
}
