//! Event bus for live debate observation.
//!
//! The orchestrator publishes [`DebateEvent`]s over a Tokio broadcast
//! channel. Subscribers (the CLI renderer, tests) only observe; a missing
//! or lagging subscriber never affects orchestration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::agent::AgentRole;
use crate::debate::state::{DebateState, SessionFailure, Stage};
use crate::errors::{BudgetViolationWarning, FailureCause};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Something observable happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    SessionCreated {
        session_id: String,
        topic: String,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        session_id: String,
        from: DebateState,
        to: DebateState,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    TurnStarted {
        session_id: String,
        role: AgentRole,
        speaker: String,
        stage: Stage,
        round: u32,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A streamed fragment. Not transcript content until the turn completes.
    Chunk {
        session_id: String,
        role: AgentRole,
        attempt: u32,
        text: String,
    },
    TurnRetry {
        session_id: String,
        role: AgentRole,
        stage: Stage,
        round: u32,
        attempt: u32,
        cause: FailureCause,
        timestamp: DateTime<Utc>,
    },
    TurnCompleted {
        session_id: String,
        role: AgentRole,
        stage: Stage,
        round: u32,
        sequence: u64,
        token_count: u32,
        timestamp: DateTime<Utc>,
    },
    BudgetWarning {
        session_id: String,
        warning: BudgetViolationWarning,
        timestamp: DateTime<Utc>,
    },
    SessionFailed {
        session_id: String,
        failure: SessionFailure,
    },
}

impl DebateEvent {
    /// Event type name for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::StateChanged { .. } => "state_changed",
            Self::TurnStarted { .. } => "turn_started",
            Self::Chunk { .. } => "chunk",
            Self::TurnRetry { .. } => "turn_retry",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::BudgetWarning { .. } => "budget_warning",
            Self::SessionFailed { .. } => "session_failed",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::TurnStarted { session_id, .. }
            | Self::Chunk { session_id, .. }
            | Self::TurnRetry { session_id, .. }
            | Self::TurnCompleted { session_id, .. }
            | Self::BudgetWarning { session_id, .. }
            | Self::SessionFailed { session_id, .. } => session_id,
        }
    }
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for [`DebateEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<DebateEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all subscribers; returns how many received it.
    pub fn publish(&self, event: DebateEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                trace!(event_type, receivers = count, "Event published");
                count
            }
            // No receivers is fine.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebateEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Matches every event.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &DebateEvent) -> bool {
        if let Some(ref sid) = self.session_id {
            if event.session_id() != sid {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(session: &str, text: &str) -> DebateEvent {
        DebateEvent::Chunk {
            session_id: session.into(),
            role: AgentRole::IndianHistorian,
            attempt: 1,
            text: text.into(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(chunk("s", "x")), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_in_order() {
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(chunk("s", "a"));
        bus.publish(chunk("s", "b"));

        assert_eq!(rx.recv().await.unwrap(), chunk("s", "a"));
        assert_eq!(rx.recv().await.unwrap(), chunk("s", "b"));
    }

    #[test]
    fn test_filter() {
        let filter = EventFilter::new().session("s1").types(vec!["chunk"]);
        assert!(filter.matches(&chunk("s1", "x")));
        assert!(!filter.matches(&chunk("s2", "x")));

        let created = DebateEvent::SessionCreated {
            session_id: "s1".into(),
            topic: "t".into(),
            timestamp: Utc::now(),
        };
        assert!(!filter.matches(&created));
        assert!(EventFilter::new().matches(&created));
    }

    #[test]
    fn test_event_serde_tag() {
        let json = serde_json::to_value(chunk("s", "hi")).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["role"], "indian_historian");
        assert_eq!(chunk("s", "hi").event_type(), "chunk");
    }
}
