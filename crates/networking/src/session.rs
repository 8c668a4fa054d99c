//! Per-connection live session
//!
//! A [`LiveSession`] turns decoded inbound frames into exchange operations on
//! behalf of one authenticated user. Frame-level failures (unknown
//! conversation, non-participant, blocked sender, bad content) never end the
//! connection; the frame is dropped and the outcome reported as
//! [`FrameOutcome::Dropped`].
//!
//! [`RegistrationGuard`] ties a channel's registry entry to a scope: the
//! channel is unregistered when the guard drops, whichever way the connection
//! task exits.

use app_core::{CoreError, Exchange, Message};
use std::sync::Arc;

use crate::protocol::{parse_frame, InboundFrame};
use crate::registry::{ChannelId, ChannelReceiver, ConnectionRegistry};

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A message was stored and pushed to the other participant
    Posted(Message),
    /// A typing indicator was relayed
    Typed,
    /// Messages were marked read
    Read(usize),
    /// The frame could not be decoded
    Ignored,
    /// The frame decoded but the operation was refused
    Dropped,
}

/// Frame dispatcher for one authenticated connection
pub struct LiveSession {
    user_id: String,
    exchange: Arc<Exchange>,
}

impl LiveSession {
    /// Create a session acting as `user_id`
    pub fn new(user_id: impl Into<String>, exchange: Arc<Exchange>) -> Self {
        Self { user_id: user_id.into(), exchange }
    }

    /// Authenticated user
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Decode and handle a text frame
    pub async fn handle_text(&self, text: &str) -> FrameOutcome {
        match parse_frame(text) {
            Some(frame) => self.handle_frame(frame).await,
            None => FrameOutcome::Ignored,
        }
    }

    /// Handle a decoded frame
    pub async fn handle_frame(&self, frame: InboundFrame) -> FrameOutcome {
        let result = match &frame {
            InboundFrame::Message { conversation_id, content } => self
                .exchange
                .post_message(conversation_id, &self.user_id, content)
                .await
                .map(FrameOutcome::Posted),
            InboundFrame::Typing { conversation_id } => self
                .exchange
                .typing(conversation_id, &self.user_id)
                .await
                .map(|()| FrameOutcome::Typed),
            InboundFrame::Read { conversation_id } => self
                .exchange
                .mark_read(conversation_id, &self.user_id)
                .await
                .map(FrameOutcome::Read),
        };

        result.unwrap_or_else(|e| self.drop_frame(&frame, e))
    }

    fn drop_frame(&self, frame: &InboundFrame, error: CoreError) -> FrameOutcome {
        if matches!(error, CoreError::Storage(_)) {
            tracing::warn!(user = %self.user_id, conversation = frame.conversation_id(), error = %error, "Frame failed");
        } else {
            tracing::debug!(
                user = %self.user_id,
                conversation = frame.conversation_id(),
                kind = %error.kind(),
                "Dropping frame"
            );
        }
        FrameOutcome::Dropped
    }
}

/// Keeps a channel registered for as long as it is alive
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    user_id: String,
    channel_id: ChannelId,
}

impl RegistrationGuard {
    /// Allocate a channel, register it for `user_id`, and return its receiver
    pub fn register(registry: Arc<ConnectionRegistry>, user_id: &str) -> (Self, ChannelReceiver) {
        let (channel, rx) = registry.channel();
        let channel_id = channel.id();
        registry.register(user_id, channel);
        let guard = Self { registry, user_id: user_id.to_string(), channel_id };
        (guard, rx)
    }

    /// Id of the guarded channel
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.user_id, self.channel_id);
    }
}
