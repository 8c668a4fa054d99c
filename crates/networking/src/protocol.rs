//! Live channel wire format
//!
//! Frames are JSON text messages with a `type` tag. Inbound parsing is
//! lenient: anything that does not decode into a known frame (unknown type,
//! missing or mistyped fields, invalid JSON) is reported as `None` and the
//! caller simply drops it.

use app_core::OutboundEvent;
use serde::Deserialize;

/// Close code sent when the credential is missing or invalid
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;

/// Close code for a normal shutdown
pub const CLOSE_NORMAL: u16 = 1000;

/// Frame sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Post a message
    Message {
        /// Target conversation
        #[serde(rename = "conversationId", alias = "conversation_id")]
        conversation_id: String,
        /// Message text
        content: String,
    },
    /// The sender is typing
    Typing {
        /// Target conversation
        #[serde(rename = "conversationId", alias = "conversation_id")]
        conversation_id: String,
    },
    /// The sender read the conversation
    Read {
        /// Target conversation
        #[serde(rename = "conversationId", alias = "conversation_id")]
        conversation_id: String,
    },
}

impl InboundFrame {
    /// Conversation the frame refers to
    pub fn conversation_id(&self) -> &str {
        match self {
            InboundFrame::Message { conversation_id, .. }
            | InboundFrame::Typing { conversation_id }
            | InboundFrame::Read { conversation_id } => conversation_id,
        }
    }
}

/// Decode a text frame, returning `None` for anything unusable
pub fn parse_frame(text: &str) -> Option<InboundFrame> {
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) if !frame.conversation_id().trim().is_empty() => Some(frame),
        Ok(_) => None,
        Err(e) => {
            tracing::trace!(error = %e, "Ignoring undecodable frame");
            None
        }
    }
}

/// Encode an outbound event as a text frame
pub fn encode_event(event: &OutboundEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}
