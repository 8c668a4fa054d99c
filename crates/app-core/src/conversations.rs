//! Conversations and messages
//!
//! A conversation is the private two-party channel created when an invitation
//! is accepted. Its message history is append-only; the only mutation a
//! message ever sees is its `read` flag.
//!
//! # Creation
//!
//! Creation is keyed by the originating invitation id. The first caller claims
//! a [`ConversationKey`] (insert-if-absent) that fixes the conversation id; the
//! conversation document is then inserted under that id, again
//! insert-if-absent. Any later or concurrent caller reads the key and either
//! finds the conversation or finishes creating it under the same id, so one
//! invitation can never produce two conversations. A key marked terminated is
//! never revived.
//!
//! # Termination
//!
//! The conversation is marked terminated first, then its messages are deleted,
//! then the conversation itself, then its messages once more to catch a post
//! that raced the first sweep. A crash between steps leaves a terminated
//! conversation that reads as absent, and unread counts ignore messages whose
//! conversation is gone or terminated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use storage::{Collection, Document, DocumentStore, Filter, StoreError};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{EventPublisher, OutboundEvent};
use crate::invitations::Invitation;
use crate::notifications::{NotificationCenter, NotificationType};
use crate::profiles::ProfileDirectory;
use moderation::BlockService;

/// Default maximum message length in characters
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// Default length of the last-message preview in characters
pub const PREVIEW_LENGTH: usize = 100;

/// Attempts at updating the conversation summary before giving up
const SUMMARY_RETRIES: usize = 3;

/// Summary of the most recent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    /// Author of the message
    pub sender_id: String,
    /// Truncated content
    pub content: String,
    /// When the message was posted
    pub created_at: DateTime<Utc>,
}

/// A two-party conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id
    pub id: String,
    /// Exactly two participant ids
    pub participants: Vec<String>,
    /// Invitation the conversation was created from
    #[serde(default)]
    pub invitation_id: Option<String>,
    /// Most recent message
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    /// Set once a participant ends the conversation
    #[serde(default)]
    pub terminated_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last activity
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Check whether `user_id` takes part in the conversation
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant who is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if !self.is_participant(user_id) {
            return None;
        }
        self.participants.iter().map(String::as_str).find(|p| *p != user_id)
    }

    /// Check whether a participant has ended the conversation
    pub fn is_terminated(&self) -> bool {
        self.terminated_at.is_some()
    }
}

impl Document for Conversation {
    const COLLECTION: &'static str = "conversations";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A message within a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Author
    pub sender_id: String,
    /// The other participant
    pub recipient_id: String,
    /// Text content
    pub content: String,
    /// Whether the recipient has read it
    pub read: bool,
    /// When the message was posted
    pub created_at: DateTime<Utc>,
    /// Insertion order tie-breaker, continuing from the stored maximum after a restart
    #[serde(default)]
    pub seq: u64,
}

impl Document for Message {
    const COLLECTION: &'static str = "messages";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Idempotency record binding an invitation to its conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Invitation id
    pub id: String,
    /// Conversation created for the invitation
    pub conversation_id: String,
    /// Whether the conversation has been terminated
    #[serde(default)]
    pub terminated: bool,
}

impl Document for ConversationKey {
    const COLLECTION: &'static str = "conversation_keys";

    fn id(&self) -> &str {
        &self.id
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

fn not_found(conversation_id: &str) -> CoreError {
    CoreError::not_found(format!("conversation {conversation_id}"))
}

/// Conversation and message operations
#[derive(Clone)]
pub struct ConversationService {
    conversations: Collection<Conversation>,
    messages: Collection<Message>,
    keys: Collection<ConversationKey>,
    blocks: BlockService,
    profiles: ProfileDirectory,
    notifications: NotificationCenter,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    seq: Arc<AtomicU64>,
    seq_seeded: Arc<OnceCell<()>>,
    max_message_length: usize,
    preview_length: usize,
}

impl ConversationService {
    /// Create a conversation service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blocks: BlockService,
        profiles: ProfileDirectory,
        notifications: NotificationCenter,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        max_message_length: usize,
        preview_length: usize,
    ) -> Self {
        Self {
            conversations: Collection::new(Arc::clone(&store)),
            messages: Collection::new(Arc::clone(&store)),
            keys: Collection::new(store),
            blocks,
            profiles,
            notifications,
            publisher,
            clock,
            seq: Arc::new(AtomicU64::new(0)),
            seq_seeded: Arc::new(OnceCell::new()),
            max_message_length,
            preview_length,
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Get or create the conversation for an accepted invitation
    ///
    /// Returns `None` if the invitation's conversation was already terminated.
    pub async fn open_for_invitation(&self, invitation: &Invitation) -> Result<Option<Conversation>> {
        let claim = ConversationKey {
            id: invitation.id.clone(),
            conversation_id: Uuid::new_v4().to_string(),
            terminated: false,
        };

        let key = match self.keys.insert(&claim).await {
            Ok(()) => claim,
            Err(e) if e.is_duplicate_key() => match self.keys.get(&invitation.id).await? {
                Some(existing) => existing,
                None => return Err(CoreError::not_found(format!("conversation key {}", invitation.id))),
            },
            Err(e) => return Err(e.into()),
        };

        if key.terminated {
            return Ok(None);
        }
        if let Some(existing) = self.conversations.get(&key.conversation_id).await? {
            return Ok((!existing.is_terminated()).then_some(existing));
        }

        let now = self.clock.now();
        let conversation = Conversation {
            id: key.conversation_id.clone(),
            participants: vec![invitation.sender_id.clone(), invitation.receiver_id.clone()],
            invitation_id: Some(invitation.id.clone()),
            last_message: None,
            terminated_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.conversations.insert(&conversation).await {
            Ok(()) => {
                tracing::info!(
                    conversation = %conversation.id,
                    invitation = %invitation.id,
                    "Conversation opened"
                );
                Ok(Some(conversation))
            }
            Err(e) if e.is_duplicate_key() => {
                let existing = self.conversations.get(&key.conversation_id).await?;
                Ok(existing.filter(|c| !c.is_terminated()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Fetch a live (not terminated) conversation
    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .get(conversation_id)
            .await?
            .filter(|c| !c.is_terminated()))
    }

    /// Fetch a conversation `user_id` participates in
    ///
    /// # Errors
    ///
    /// - `NotFound` if the conversation is absent or terminated
    /// - `Forbidden` if `user_id` is not a participant
    pub async fn require_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Conversation> {
        let conversation = self.get(conversation_id).await?.ok_or_else(|| not_found(conversation_id))?;
        if !conversation.is_participant(user_id) {
            return Err(CoreError::forbidden("not a participant of this conversation"));
        }
        Ok(conversation)
    }

    /// Conversation created for an invitation, if any
    pub async fn for_invitation(&self, invitation_id: &str) -> Result<Option<Conversation>> {
        match self.keys.get(invitation_id).await? {
            Some(key) if !key.terminated => self.get(&key.conversation_id).await,
            _ => Ok(None),
        }
    }

    /// Conversations of `user_id`, most recent activity first
    pub async fn list_for(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations = self
            .conversations
            .find(&Filter::new().contains("participants", user_id))
            .await?;
        conversations.retain(|c| !c.is_terminated());
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Message history in posting order; participants only
    pub async fn messages(&self, conversation_id: &str, user_id: &str) -> Result<Vec<Message>> {
        self.require_participant(conversation_id, user_id).await?;
        let mut messages = self
            .messages
            .find(&Filter::new().eq("conversation_id", conversation_id))
            .await?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(messages)
    }

    /// Unread messages addressed to `user_id` across all conversations
    ///
    /// Messages left behind by a terminated or deleted conversation are not
    /// counted.
    pub async fn unread_count(&self, user_id: &str) -> Result<usize> {
        let unread = self
            .messages
            .find(&Filter::new().eq("recipient_id", user_id).eq("read", false))
            .await?;

        let mut live: HashMap<String, bool> = HashMap::new();
        let mut count = 0;
        for message in unread {
            let alive = match live.get(&message.conversation_id) {
                Some(alive) => *alive,
                None => {
                    let alive = self
                        .conversations
                        .get(&message.conversation_id)
                        .await?
                        .is_some_and(|c| !c.is_terminated());
                    live.insert(message.conversation_id, alive);
                    alive
                }
            };
            if alive {
                count += 1;
            }
        }
        Ok(count)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a message to a conversation
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for blank or over-long content
    /// - `NotFound` if the conversation is absent or terminated
    /// - `Forbidden` if the sender is not a participant, or the other
    ///   participant has blocked the sender
    pub async fn post_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(CoreError::InvalidInput("message content is empty".into()));
        }
        let length = content.chars().count();
        if length > self.max_message_length {
            return Err(CoreError::InvalidInput(format!(
                "message too long: {length} exceeds maximum {}",
                self.max_message_length
            )));
        }

        let conversation = self.require_participant(conversation_id, sender_id).await?;
        let recipient_id = conversation
            .other_participant(sender_id)
            .ok_or_else(|| CoreError::forbidden("conversation has no other participant"))?
            .to_string();

        // Only the recipient's block silences the sender
        if self.blocks.has_blocked(&recipient_id, sender_id).await? {
            tracing::debug!(conversation = conversation_id, sender = sender_id, "Message blocked");
            return Err(CoreError::forbidden("you have been blocked by this user"));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.clone(),
            content: content.to_string(),
            read: false,
            created_at: self.clock.now(),
            seq: self.next_seq().await?,
        };
        self.messages.insert(&message).await?;

        if let Err(e) = self.update_summary(conversation, &message).await {
            tracing::warn!(conversation = conversation_id, error = %e, "Failed to update conversation summary");
        }

        self.notifications
            .notify_after_commit(
                &recipient_id,
                "Yeni Mesaj",
                "Size yeni bir mesaj geldi",
                NotificationType::Message,
            )
            .await;
        self.publisher.publish(
            &recipient_id,
            OutboundEvent::NewMessage {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
            },
        );

        Ok(message)
    }

    /// Mark every message addressed to `actor_id` read; returns how many changed
    pub async fn mark_read(&self, conversation_id: &str, actor_id: &str) -> Result<usize> {
        self.require_participant(conversation_id, actor_id).await?;

        let unread = self
            .messages
            .find(
                &Filter::new()
                    .eq("conversation_id", conversation_id)
                    .eq("recipient_id", actor_id)
                    .eq("read", false),
            )
            .await?;

        let mut changed = 0;
        for mut message in unread {
            message.read = true;
            if self.messages.replace(&message).await? {
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::debug!(conversation = conversation_id, reader = actor_id, changed, "Messages marked read");
        }
        Ok(changed)
    }

    /// End a conversation, deleting its history
    pub async fn terminate(&self, conversation_id: &str, actor_id: &str) -> Result<()> {
        let mut conversation = self.require_participant(conversation_id, actor_id).await?;
        let other = conversation.other_participant(actor_id).map(str::to_string);

        if let Some(invitation_id) = conversation.invitation_id.clone() {
            if let Some(mut key) = self.keys.get(&invitation_id).await? {
                key.terminated = true;
                self.keys.replace(&key).await?;
            }
        }

        conversation.terminated_at = Some(self.clock.now());
        self.conversations.replace(&conversation).await?;

        let history = Filter::new().eq("conversation_id", conversation_id);
        let mut removed = self.messages.delete_many(&history).await?;
        self.conversations.delete(conversation_id).await?;
        // A post that read the conversation before it was marked may land late
        removed += self.messages.delete_many(&history).await?;

        tracing::info!(
            conversation = conversation_id,
            actor = actor_id,
            messages = removed,
            "Conversation terminated"
        );

        if let Some(other) = other {
            let name = self.profiles.display_name(actor_id).await.unwrap_or_else(|e| {
                tracing::warn!(user = actor_id, error = %e, "Failed to resolve display name");
                actor_id.to_string()
            });
            self.notifications
                .notify_after_commit(
                    &other,
                    "Sohbet Sonlandırıldı",
                    format!("{name} sohbeti sonlandırdı"),
                    NotificationType::ConversationTerminated,
                )
                .await;
        }
        Ok(())
    }

    /// Next message sequence number
    ///
    /// The first call after startup resumes from the highest stored value.
    async fn next_seq(&self) -> Result<u64> {
        self.seq_seeded
            .get_or_try_init(|| async {
                let stored = self.messages.find(&Filter::new()).await?;
                let stored_max = stored.into_iter().map(|m| m.seq).max();
                if let Some(max) = stored_max {
                    self.seq.fetch_max(max + 1, Ordering::Relaxed);
                    tracing::debug!(next = max + 1, "Resumed message sequence");
                }
                Ok::<_, CoreError>(())
            })
            .await?;
        Ok(self.seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Push a typing indicator to the other participant
    pub async fn typing(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let conversation = self.require_participant(conversation_id, user_id).await?;
        if let Some(other) = conversation.other_participant(user_id) {
            self.publisher.publish(
                other,
                OutboundEvent::Typing {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                },
            );
        }
        Ok(())
    }

    async fn update_summary(&self, mut conversation: Conversation, message: &Message) -> Result<()> {
        for _ in 0..SUMMARY_RETRIES {
            let newer_exists = conversation
                .last_message
                .as_ref()
                .is_some_and(|last| last.created_at > message.created_at);
            if newer_exists {
                return Ok(());
            }

            let expected = Filter::new()
                .eq(
                    "updated_at",
                    serde_json::to_value(conversation.updated_at).map_err(StoreError::from)?,
                )
                .eq("terminated_at", serde_json::Value::Null);

            conversation.last_message = Some(MessagePreview {
                sender_id: message.sender_id.clone(),
                content: preview(&message.content, self.preview_length),
                created_at: message.created_at,
            });
            conversation.updated_at = message.created_at.max(conversation.updated_at);

            if self.conversations.replace_if(&expected, &conversation).await? {
                return Ok(());
            }
            match self.get(&conversation.id).await? {
                Some(current) => conversation = current,
                None => return Ok(()),
            }
        }
        tracing::debug!(conversation = %conversation.id, "Conversation summary contended, skipping");
        Ok(())
    }
}
