//! Invitation state machine
//!
//! An invitation is a proposal from a sender to swap postings with the owner
//! of a listing. It starts `pending` and moves exactly once, by the receiver's
//! response, to `accepted` or `rejected`. Both are terminal.
//!
//! At most one invitation may ever exist per (sender, listing) pair. The pair
//! is claimed through an [`InvitationKey`] insert-if-absent before the
//! invitation itself is written, so two concurrent sends cannot both succeed.
//! A claim whose invitation was never written (the insert failed, or the
//! process died in between) is released on failure and reclaimed once it is
//! older than [`CLAIM_GRACE_SECS`].
//!
//! Accepting an invitation writes the status first and opens the conversation
//! second. Conversation creation is idempotent per invitation id, so a retry
//! after a partial failure (or a concurrent second accept) never produces a
//! second conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use storage::{Collection, Document, DocumentStore, Filter};
use uuid::Uuid;

use crate::clock::Clock;
use crate::conversations::{Conversation, ConversationService};
use crate::eligibility::EligibilityChecker;
use crate::error::{ConflictKind, CoreError, Result};
use crate::notifications::{NotificationCenter, NotificationType};

/// Lifecycle state of an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    /// Waiting for the receiver
    Pending,
    /// Receiver accepted; a conversation exists
    Accepted,
    /// Receiver declined
    Rejected,
}

impl InvitationStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }

    /// Check whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver's answer to an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationAction {
    /// Accept and open a conversation
    Accept,
    /// Decline
    Reject,
}

impl FromStr for InvitationAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "accept" => Ok(InvitationAction::Accept),
            "reject" => Ok(InvitationAction::Reject),
            other => Err(CoreError::InvalidInput(format!("invalid action: {other:?}"))),
        }
    }
}

/// A persisted invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Invitation id
    pub id: String,
    /// User who sent it
    pub sender_id: String,
    /// Listing owner at creation time
    pub receiver_id: String,
    /// Target listing
    pub listing_id: String,
    /// Lifecycle state
    pub status: InvitationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When the receiver answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Document for Invitation {
    const COLLECTION: &'static str = "invitations";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Seconds after which a claim without an invitation may be taken over
pub const CLAIM_GRACE_SECS: i64 = 30;

/// Uniqueness claim for a (sender, listing) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationKey {
    /// `"{sender_id}:{listing_id}"`
    pub id: String,
    /// Invitation holding the claim
    pub invitation_id: String,
    /// When the claim was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl InvitationKey {
    fn key_for(sender_id: &str, listing_id: &str) -> String {
        format!("{sender_id}:{listing_id}")
    }
}

impl Document for InvitationKey {
    const COLLECTION: &'static str = "invitation_keys";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Result of a successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvitationResponse {
    /// The invitation after the transition
    pub invitation: Invitation,
    /// Conversation opened by an accept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
}

/// A user's invitations, both directions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvitationOverview {
    /// Invitations the user sent, newest first
    pub sent: Vec<Invitation>,
    /// Invitations the user received, newest first
    pub received: Vec<Invitation>,
}

/// Invitation lifecycle operations
#[derive(Clone)]
pub struct InvitationBook {
    invitations: Collection<Invitation>,
    keys: Collection<InvitationKey>,
    eligibility: EligibilityChecker,
    conversations: ConversationService,
    notifications: NotificationCenter,
    clock: Arc<dyn Clock>,
}

impl InvitationBook {
    /// Create an invitation book
    pub fn new(
        store: Arc<dyn DocumentStore>,
        eligibility: EligibilityChecker,
        conversations: ConversationService,
        notifications: NotificationCenter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            invitations: Collection::new(Arc::clone(&store)),
            keys: Collection::new(store),
            eligibility,
            conversations,
            notifications,
            clock,
        }
    }

    /// Eligibility checker used by [`send`](Self::send)
    pub fn eligibility(&self) -> &EligibilityChecker {
        &self.eligibility
    }

    /// Send an invitation for `listing_id`
    ///
    /// Runs the eligibility checks, claims the (sender, listing) pair, stores
    /// the invitation, records it against the sender's daily allowance, and
    /// notifies the listing owner.
    pub async fn send(&self, sender_id: &str, listing_id: &str) -> Result<Invitation> {
        let listing = self.eligibility.check(sender_id, listing_id).await?.into_result()?;

        let invitation = Invitation {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: listing.user_id.clone(),
            listing_id: listing.id.clone(),
            status: InvitationStatus::Pending,
            created_at: self.clock.now(),
            responded_at: None,
        };

        let claim = InvitationKey {
            id: InvitationKey::key_for(sender_id, listing_id),
            invitation_id: invitation.id.clone(),
            claimed_at: Some(invitation.created_at),
        };
        if !self.claim(&claim).await? {
            // Lost a race with a concurrent send for the same pair
            let status = self
                .eligibility
                .existing_status(sender_id, listing_id)
                .await?
                .unwrap_or(InvitationStatus::Pending);
            return Err(ConflictKind::DuplicateInvitation(status).into());
        }

        if let Err(e) = self.invitations.insert(&invitation).await {
            self.release(&claim).await;
            return Err(e.into());
        }

        // A stale-claim takeover may have happened while the insert ran
        let held = self.keys.get(&claim.id).await?;
        if held.as_ref().map(|key| key.invitation_id.as_str()) != Some(invitation.id.as_str()) {
            self.invitations.delete(&invitation.id).await?;
            return Err(ConflictKind::DuplicateInvitation(InvitationStatus::Pending).into());
        }

        self.eligibility.limiter().record(sender_id);

        tracing::info!(
            invitation = %invitation.id,
            sender = sender_id,
            receiver = %invitation.receiver_id,
            listing = listing_id,
            "Invitation sent"
        );

        self.notifications
            .notify_after_commit(
                &invitation.receiver_id,
                "Yeni Davet",
                "İlanınıza yeni bir değişim daveti aldınız",
                NotificationType::Invitation,
            )
            .await;

        Ok(invitation)
    }

    /// Answer an invitation as its receiver
    ///
    /// # Errors
    ///
    /// Checked in this order:
    /// - `NotFound` if the invitation does not exist
    /// - `Forbidden` if `actor_id` is not the receiver
    /// - `Conflict(AlreadyResolved)` if it is no longer pending
    /// - `InvalidInput` if `action` is neither `accept` nor `reject`
    pub async fn respond(
        &self,
        invitation_id: &str,
        actor_id: &str,
        action: &str,
    ) -> Result<InvitationResponse> {
        let invitation = self.require(invitation_id).await?;

        if invitation.receiver_id != actor_id {
            return Err(CoreError::forbidden("only the receiver can respond to an invitation"));
        }
        if invitation.status.is_terminal() {
            return Err(self.already_resolved(&invitation).await);
        }
        let action: InvitationAction = action.parse()?;

        let mut updated = invitation.clone();
        updated.status = match action {
            InvitationAction::Accept => InvitationStatus::Accepted,
            InvitationAction::Reject => InvitationStatus::Rejected,
        };
        updated.responded_at = Some(self.clock.now());

        let pending = Filter::new().eq("status", InvitationStatus::Pending.as_str());
        if !self.invitations.replace_if(&pending, &updated).await? {
            let current = self.require(invitation_id).await?;
            return Err(self.already_resolved(&current).await);
        }

        tracing::info!(
            invitation = invitation_id,
            status = %updated.status,
            "Invitation resolved"
        );

        let conversation = match action {
            InvitationAction::Accept => {
                let conversation = self.conversations.open_for_invitation(&updated).await?;
                self.notifications
                    .notify_after_commit(
                        &updated.sender_id,
                        "Davet Kabul Edildi",
                        "Gönderdiğiniz değişim daveti kabul edildi. Artık mesajlaşabilirsiniz!",
                        NotificationType::InvitationAccepted,
                    )
                    .await;
                conversation
            }
            InvitationAction::Reject => {
                self.notifications
                    .notify_after_commit(
                        &updated.sender_id,
                        "Davet Reddedildi",
                        "Gönderdiğiniz değişim daveti reddedildi",
                        NotificationType::InvitationRejected,
                    )
                    .await;
                None
            }
        };

        Ok(InvitationResponse { invitation: updated, conversation })
    }

    /// Fetch an invitation
    pub async fn get(&self, invitation_id: &str) -> Result<Option<Invitation>> {
        Ok(self.invitations.get(invitation_id).await?)
    }

    /// Fetch an invitation visible to `user_id` (sender or receiver)
    pub async fn get_for(&self, invitation_id: &str, user_id: &str) -> Result<Invitation> {
        let invitation = self.require(invitation_id).await?;
        if invitation.sender_id != user_id && invitation.receiver_id != user_id {
            return Err(CoreError::forbidden("not a party to this invitation"));
        }
        Ok(invitation)
    }

    /// Invitations sent by `user_id`, newest first
    pub async fn sent(&self, user_id: &str) -> Result<Vec<Invitation>> {
        self.find_sorted(Filter::new().eq("sender_id", user_id)).await
    }

    /// Invitations received by `user_id`, newest first
    pub async fn received(&self, user_id: &str) -> Result<Vec<Invitation>> {
        self.find_sorted(Filter::new().eq("receiver_id", user_id)).await
    }

    /// Both directions at once
    pub async fn overview(&self, user_id: &str) -> Result<InvitationOverview> {
        Ok(InvitationOverview {
            sent: self.sent(user_id).await?,
            received: self.received(user_id).await?,
        })
    }

    async fn require(&self, invitation_id: &str) -> Result<Invitation> {
        self.get(invitation_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("invitation {invitation_id}")))
    }

    async fn find_sorted(&self, filter: Filter) -> Result<Vec<Invitation>> {
        let mut items = self.invitations.find(&filter).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    /// Take the (sender, listing) claim, taking over a stale one
    ///
    /// Returns `false` when a live claim is held by another invitation.
    async fn claim(&self, claim: &InvitationKey) -> Result<bool> {
        loop {
            match self.keys.insert(claim).await {
                Ok(()) => return Ok(true),
                Err(e) if e.is_duplicate_key() => {}
                Err(e) => return Err(e.into()),
            }

            let Some(held) = self.keys.get(&claim.id).await? else {
                // Released between our insert and read; try again
                continue;
            };
            if self.invitations.get(&held.invitation_id).await?.is_some() {
                return Ok(false);
            }
            let grace = chrono::Duration::seconds(CLAIM_GRACE_SECS);
            let fresh = held.claimed_at.is_some_and(|at| self.clock.now() - at < grace);
            if fresh {
                // Probably a send still between its claim and its insert
                return Ok(false);
            }

            let stale = Filter::new().eq("invitation_id", held.invitation_id.as_str());
            if self.keys.replace_if(&stale, claim).await? {
                tracing::warn!(
                    key = %claim.id,
                    stale_invitation = %held.invitation_id,
                    "Took over stale invitation claim"
                );
                return Ok(true);
            }
        }
    }

    /// Drop a claim whose invitation could not be written
    async fn release(&self, claim: &InvitationKey) {
        let released = match self.keys.get(&claim.id).await {
            Ok(Some(held)) if held.invitation_id == claim.invitation_id => {
                self.keys.delete(&claim.id).await.map(|_| ())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = released {
            tracing::warn!(key = %claim.id, error = %e, "Failed to release invitation claim");
        }
    }

    /// Build the `AlreadyResolved` error, repairing a missing conversation first
    async fn already_resolved(&self, invitation: &Invitation) -> CoreError {
        if invitation.status == InvitationStatus::Accepted {
            if let Err(e) = self.conversations.open_for_invitation(invitation).await {
                tracing::warn!(
                    invitation = %invitation.id,
                    error = %e,
                    "Failed to repair conversation for accepted invitation"
                );
            }
        }
        ConflictKind::AlreadyResolved.into()
    }
}
