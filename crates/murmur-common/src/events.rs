//! Session event bus.
//!
//! The engine publishes `SessionEvent`s on a broadcast channel; any
//! front end (terminal REPL, tests, a future GUI) subscribes without
//! touching session internals.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Message, SessionState, ToolCall, ToolResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Incremental model text.
    TextDelta(String),
    /// Incremental model audio (raw bytes).
    AudioDelta(Vec<u8>),
    /// The model requested tool invocations.
    ToolCallsRequested(Vec<ToolCall>),
    /// One or more tool calls await human approval.
    ApprovalRequired(Vec<ToolCall>),
    ToolResultReady(ToolResult),
    /// A full message was appended to the history.
    MessageAppended(Message),
    TurnComplete,
    Reconnecting { attempt: u32 },
    SessionError(String),
    Closed,
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning the number of subscribers that saw it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::TurnComplete);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::TurnComplete));
    }

    #[tokio::test]
    async fn multiple_subscribers_see_the_same_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(SessionEvent::StateChanged(SessionState::Ready));

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SessionEvent::StateChanged(SessionState::Ready)
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SessionEvent::StateChanged(SessionState::Ready)
        ));
    }

    #[tokio::test]
    async fn deltas_arrive_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::TextDelta("hel".into()));
        bus.publish(SessionEvent::TextDelta("lo".into()));
        bus.publish(SessionEvent::TurnComplete);

        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::TextDelta(t) if t == "hel"));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::TextDelta(t) if t == "lo"));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::TurnComplete));
    }

    #[test]
    fn publish_returns_zero_with_no_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(SessionEvent::Closed), 0);
    }

    #[test]
    fn unknown_event_deserializes() {
        let json = r#"{"type":"SomeFutureEvent","data":null}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, SessionEvent::Unknown));
    }
}
