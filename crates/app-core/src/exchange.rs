//! Exchange facade
//!
//! [`Exchange`] wires every service of the core over one shared document
//! store, one event publisher and one clock. Adapters (the HTTP routes and
//! the live socket handler) hold an `Arc<Exchange>` and call into it.

use std::sync::Arc;
use storage::DocumentStore;

use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::conversations::{ConversationService, Message};
use crate::eligibility::{Eligibility, EligibilityChecker};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::invitations::{Invitation, InvitationBook, InvitationResponse};
use crate::listings::{Listing, ListingBook};
use crate::notifications::{NotificationCenter, NotificationType};
use crate::profiles::ProfileDirectory;
use crate::rate_limit::RateLimiter;
use moderation::{Block, BlockService};

/// The exchange core
pub struct Exchange {
    config: CoreConfig,
    profiles: ProfileDirectory,
    listings: ListingBook,
    blocks: BlockService,
    notifications: NotificationCenter,
    conversations: ConversationService,
    invitations: InvitationBook,
}

impl Exchange {
    /// Build the core on the wall clock
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn EventPublisher>,
        config: CoreConfig,
    ) -> Self {
        Self::with_clock(store, publisher, Arc::new(SystemClock), config)
    }

    /// Build the core with an explicit clock
    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        let profiles = ProfileDirectory::new(Arc::clone(&store), Arc::clone(&clock));
        let listings =
            ListingBook::new(Arc::clone(&store), Arc::clone(&clock), config.max_open_listings);
        let block_clock = Arc::clone(&clock);
        let blocks =
            BlockService::with_time_source(Arc::clone(&store), Arc::new(move || block_clock.now()));
        let notifications =
            NotificationCenter::new(Arc::clone(&store), Arc::clone(&publisher), Arc::clone(&clock));
        let conversations = ConversationService::new(
            Arc::clone(&store),
            blocks.clone(),
            profiles.clone(),
            notifications.clone(),
            publisher,
            Arc::clone(&clock),
            config.max_message_length,
            config.preview_length,
        );
        let limiter = Arc::new(RateLimiter::new(config.invitation_limit, Arc::clone(&clock)));
        let eligibility = EligibilityChecker::new(
            Arc::clone(&store),
            listings.clone(),
            profiles.clone(),
            blocks.clone(),
            limiter,
        );
        let invitations = InvitationBook::new(
            store,
            eligibility,
            conversations.clone(),
            notifications.clone(),
            clock,
        );

        tracing::debug!(?config, "Exchange core initialized");

        Self { config, profiles, listings, blocks, notifications, conversations, invitations }
    }

    /// Active configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Profile directory
    pub fn profiles(&self) -> &ProfileDirectory {
        &self.profiles
    }

    /// Listing lifecycle
    pub fn listings(&self) -> &ListingBook {
        &self.listings
    }

    /// Block list
    pub fn blocks(&self) -> &BlockService {
        &self.blocks
    }

    /// Notification fan-out
    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Conversations and messages
    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    /// Invitation state machine
    pub fn invitations(&self) -> &InvitationBook {
        &self.invitations
    }

    // ========================================================================
    // Mutating operations
    // ========================================================================

    /// Check whether `sender_id` may invite the owner of `listing_id`
    pub async fn check_invitation(&self, sender_id: &str, listing_id: &str) -> Result<Eligibility> {
        self.invitations.eligibility().check(sender_id, listing_id).await
    }

    /// Send an invitation
    pub async fn send_invitation(&self, sender_id: &str, listing_id: &str) -> Result<Invitation> {
        self.invitations.send(sender_id, listing_id).await
    }

    /// Accept or reject an invitation
    pub async fn respond_to_invitation(
        &self,
        invitation_id: &str,
        actor_id: &str,
        action: &str,
    ) -> Result<InvitationResponse> {
        self.invitations.respond(invitation_id, actor_id, action).await
    }

    /// Post a message
    pub async fn post_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Message> {
        self.conversations.post_message(conversation_id, sender_id, content).await
    }

    /// Mark a conversation read for `actor_id`
    pub async fn mark_read(&self, conversation_id: &str, actor_id: &str) -> Result<usize> {
        self.conversations.mark_read(conversation_id, actor_id).await
    }

    /// Terminate a conversation
    pub async fn terminate_conversation(&self, conversation_id: &str, actor_id: &str) -> Result<()> {
        self.conversations.terminate(conversation_id, actor_id).await
    }

    /// Relay a typing indicator
    pub async fn typing(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.conversations.typing(conversation_id, user_id).await
    }

    /// Block a user
    pub async fn block_user(
        &self,
        blocker_id: &str,
        blocked_id: &str,
        reason: Option<String>,
    ) -> Result<Block> {
        Ok(self.blocks.block(blocker_id, blocked_id, reason).await?)
    }

    /// Remove a block
    pub async fn unblock_user(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        Ok(self.blocks.unblock(blocker_id, blocked_id).await?)
    }

    /// Approve or reject a pending listing and tell its owner
    pub async fn moderate_listing(&self, listing_id: &str, approve: bool) -> Result<Listing> {
        let listing = self.listings.moderate(listing_id, approve).await?;
        let (title, body, kind) = if approve {
            ("İlan Onaylandı", "İlanınız onaylandı ve yayına alındı", NotificationType::ListingApproved)
        } else {
            ("İlan Reddedildi", "İlanınız yayına alınmadı", NotificationType::ListingRejected)
        };
        self.notifications.notify_after_commit(&listing.user_id, title, body, kind).await;
        Ok(listing)
    }
}
