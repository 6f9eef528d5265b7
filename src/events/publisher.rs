use crate::models::RunKind;
use crate::state_machine::RunState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle event for a committed run transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLifecycleEvent {
    pub name: String,
    pub run_uuid: Uuid,
    pub run_kind: RunKind,
    pub from_state: Option<RunState>,
    pub new_state: RunState,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl RunLifecycleEvent {
    pub fn is_terminal(&self) -> bool {
        self.new_state.in_final_state()
    }
}

/// Broadcast publisher for run lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<RunLifecycleEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a run lifecycle event, returning how many subscribers got it.
    /// Zero subscribers is not an error.
    pub fn publish(
        &self,
        name: impl Into<String>,
        run_uuid: Uuid,
        run_kind: RunKind,
        from_state: Option<RunState>,
        new_state: RunState,
        context: Value,
    ) -> usize {
        let event = RunLifecycleEvent {
            name: name.into(),
            run_uuid,
            run_kind,
            from_state,
            new_state,
            context,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when nobody is subscribed
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RunLifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
