//! Outbound live events
//!
//! The exchange core never talks to sockets directly. It hands events to an
//! [`EventPublisher`], which the networking layer implements on top of its
//! connection registry. Publishing is fire-and-forget: an offline recipient
//! is covered by the durable notification record instead.

use serde::{Deserialize, Serialize};

use crate::conversations::Message;
use crate::notifications::Notification;

/// Event pushed to a user's live channels
///
/// Serialized as a JSON object with a `type` tag, e.g.
/// `{"type":"typing","conversationId":"c1","userId":"u1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// A notification record was created for the recipient
    Notification {
        /// The persisted notification
        notification: Notification,
    },
    /// A message was posted in one of the recipient's conversations
    NewMessage {
        /// Conversation the message belongs to
        conversation_id: String,
        /// The persisted message
        message: Message,
    },
    /// The other participant is typing
    Typing {
        /// Conversation being typed in
        conversation_id: String,
        /// User who is typing
        user_id: String,
    },
}

impl OutboundEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Notification { .. } => "notification",
            OutboundEvent::NewMessage { .. } => "new_message",
            OutboundEvent::Typing { .. } => "typing",
        }
    }
}

/// Sink for live events addressed to a user
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    /// Deliver `event` to every live channel of `user_id`, best effort
    fn publish(&self, user_id: &str, event: OutboundEvent);
}

/// Publisher that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, user_id: &str, event: OutboundEvent) {
        tracing::trace!(user = user_id, kind = event.kind(), "Dropping live event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typing_wire_format() {
        let event = OutboundEvent::Typing {
            conversation_id: "c1".into(),
            user_id: "u1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "typing", "conversationId": "c1", "userId": "u1"}));
        assert_eq!(event.kind(), "typing");
    }

    #[test]
    fn test_typing_round_trip() {
        let raw = r#"{"type":"typing","conversationId":"c9","userId":"u2"}"#;
        let event: OutboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            OutboundEvent::Typing { conversation_id: "c9".into(), user_id: "u2".into() }
        );
    }

    #[test]
    fn test_noop_publisher_accepts_events() {
        let publisher = NoopPublisher;
        publisher.publish(
            "u1",
            OutboundEvent::Typing { conversation_id: "c1".into(), user_id: "u2".into() },
        );
    }
}
