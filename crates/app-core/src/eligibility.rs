//! Invitation eligibility
//!
//! Decides whether a sender may invite the owner of a listing. Checks run in
//! a fixed order and the first failure wins:
//!
//! 1. the listing exists and is not the sender's own
//! 2. no block edge in either direction between sender and owner
//! 3. no earlier invitation from the sender for this listing, in any status
//! 4. the sender's position matches the listing's role
//! 5. the sender is within the daily invitation allowance
//!
//! Everything here is read-only. The rate limiter is only written to by the
//! invitation book after an invitation has actually been stored.

use std::sync::Arc;
use storage::{Collection, DocumentStore, Filter};

use crate::error::{ConflictKind, CoreError, Result};
use crate::invitations::{Invitation, InvitationStatus};
use crate::listings::{Listing, ListingBook};
use crate::profiles::{positions_match, ProfileDirectory};
use crate::rate_limit::RateLimiter;
use moderation::BlockService;

/// Why an invitation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Sender owns the listing
    SelfInvite,
    /// A block edge exists between sender and owner
    Blocked,
    /// An invitation already exists, carrying its status
    DuplicateOrTerminal(InvitationStatus),
    /// Sender's position does not match the listing's role
    PositionMismatch,
    /// Sender exhausted the daily allowance
    RateLimited,
}

impl From<DenyReason> for CoreError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::SelfInvite => ConflictKind::SelfInvite.into(),
            DenyReason::Blocked => CoreError::forbidden("a block exists between you and this user"),
            DenyReason::DuplicateOrTerminal(status) => ConflictKind::DuplicateInvitation(status).into(),
            DenyReason::PositionMismatch => ConflictKind::PositionMismatch.into(),
            DenyReason::RateLimited => ConflictKind::RateLimited.into(),
        }
    }
}

/// Outcome of an eligibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Sender may invite; carries the target listing
    Allow(Listing),
    /// Sender may not invite
    Deny(DenyReason),
}

impl Eligibility {
    /// Convert into a result, mapping a denial to its error
    pub fn into_result(self) -> Result<Listing> {
        match self {
            Eligibility::Allow(listing) => Ok(listing),
            Eligibility::Deny(reason) => Err(reason.into()),
        }
    }
}

/// Invitation eligibility checker
#[derive(Clone)]
pub struct EligibilityChecker {
    listings: ListingBook,
    profiles: ProfileDirectory,
    blocks: BlockService,
    invitations: Collection<Invitation>,
    limiter: Arc<RateLimiter>,
}

impl EligibilityChecker {
    /// Create a checker that owns the given rate limiter
    pub fn new(
        store: Arc<dyn DocumentStore>,
        listings: ListingBook,
        profiles: ProfileDirectory,
        blocks: BlockService,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { listings, profiles, blocks, invitations: Collection::new(store), limiter }
    }

    /// Rate limiter consulted by the last check
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Check whether `sender_id` may invite the owner of `listing_id`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the listing does not exist. Every other refusal
    /// is an [`Eligibility::Deny`].
    pub async fn check(&self, sender_id: &str, listing_id: &str) -> Result<Eligibility> {
        let listing = self.listings.require(listing_id).await?;

        if listing.user_id == sender_id {
            return Ok(Eligibility::Deny(DenyReason::SelfInvite));
        }

        if self.blocks.is_blocked_between(sender_id, &listing.user_id).await? {
            return Ok(Eligibility::Deny(DenyReason::Blocked));
        }

        if let Some(status) = self.existing_status(sender_id, listing_id).await? {
            return Ok(Eligibility::Deny(DenyReason::DuplicateOrTerminal(status)));
        }

        // A sender without a profile has no position to match
        let matches = self
            .profiles
            .get(sender_id)
            .await?
            .is_some_and(|profile| positions_match(&profile.role, &listing.role));
        if !matches {
            return Ok(Eligibility::Deny(DenyReason::PositionMismatch));
        }

        if self.limiter.is_limited(sender_id) {
            return Ok(Eligibility::Deny(DenyReason::RateLimited));
        }

        Ok(Eligibility::Allow(listing))
    }

    /// Status of an earlier invitation from `sender_id` for `listing_id`
    pub async fn existing_status(
        &self,
        sender_id: &str,
        listing_id: &str,
    ) -> Result<Option<InvitationStatus>> {
        let filter = Filter::new().eq("sender_id", sender_id).eq("listing_id", listing_id);
        Ok(self.invitations.find_one(&filter).await?.map(|inv| inv.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::ErrorKind;
    use crate::listings::{NewListing, DEFAULT_MAX_OPEN_LISTINGS};
    use crate::profiles::Profile;
    use crate::rate_limit::RateLimitConfig;
    use chrono::Utc;
    use storage::MemoryStore;

    struct Fixture {
        checker: EligibilityChecker,
        listings: ListingBook,
        blocks: BlockService,
        invitations: Collection<Invitation>,
        limiter: Arc<RateLimiter>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let listings =
            ListingBook::new(Arc::clone(&store), Arc::clone(&clock), DEFAULT_MAX_OPEN_LISTINGS);
        let profiles = ProfileDirectory::new(Arc::clone(&store), Arc::clone(&clock));
        let blocks = BlockService::new(Arc::clone(&store));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default().limit(2), clock));

        profiles.upsert(Profile::new("sender", "Adalet", "Clerk", "Ankara")).await.unwrap();
        profiles.upsert(Profile::new("owner", "Adalet", "Clerk", "İzmir")).await.unwrap();

        let checker = EligibilityChecker::new(
            Arc::clone(&store),
            listings.clone(),
            profiles,
            blocks.clone(),
            Arc::clone(&limiter),
        );
        Fixture { checker, listings, blocks, invitations: Collection::new(store), limiter }
    }

    async fn listing(fx: &Fixture, owner: &str, role: &str) -> Listing {
        fx.listings
            .create(
                owner,
                NewListing {
                    title: "swap".into(),
                    institution: "Adalet".into(),
                    role: role.into(),
                    current_province: "İzmir".into(),
                    desired_province: "Ankara".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    async fn store_invitation(fx: &Fixture, listing: &Listing, status: InvitationStatus) {
        let invitation = Invitation {
            id: "inv".into(),
            sender_id: "sender".into(),
            receiver_id: listing.user_id.clone(),
            listing_id: listing.id.clone(),
            status,
            created_at: Utc::now(),
            responded_at: None,
        };
        fx.invitations.insert(&invitation).await.unwrap();
    }

    #[tokio::test]
    async fn test_allow() {
        let fx = fixture().await;
        let target = listing(&fx, "owner", "clerk ").await;
        let outcome = fx.checker.check("sender", &target.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Allow(target));
    }

    #[tokio::test]
    async fn test_missing_listing() {
        let fx = fixture().await;
        let err = fx.checker.check("sender", "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_self_invite() {
        let fx = fixture().await;
        let own = listing(&fx, "sender", "Clerk").await;
        let outcome = fx.checker.check("sender", &own.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::SelfInvite));
    }

    #[tokio::test]
    async fn test_blocked_either_direction() {
        let fx = fixture().await;
        let target = listing(&fx, "owner", "Clerk").await;

        fx.blocks.block("owner", "sender", None).await.unwrap();
        let outcome = fx.checker.check("sender", &target.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::Blocked));

        fx.blocks.unblock("owner", "sender").await.unwrap();
        fx.blocks.block("sender", "owner", None).await.unwrap();
        let outcome = fx.checker.check("sender", &target.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::Blocked));

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_duplicate_in_any_status() {
        for status in [InvitationStatus::Pending, InvitationStatus::Accepted, InvitationStatus::Rejected] {
            let fx = fixture().await;
            let target = listing(&fx, "owner", "Clerk").await;
            store_invitation(&fx, &target, status).await;

            let outcome = fx.checker.check("sender", &target.id).await.unwrap();
            assert_eq!(outcome, Eligibility::Deny(DenyReason::DuplicateOrTerminal(status)));
        }
    }

    #[tokio::test]
    async fn test_position_mismatch() {
        let fx = fixture().await;
        let target = listing(&fx, "owner", "Usher").await;
        let outcome = fx.checker.check("sender", &target.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::PositionMismatch));

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::PositionMismatch));
    }

    #[tokio::test]
    async fn test_sender_without_profile_cannot_match() {
        let fx = fixture().await;
        let target = listing(&fx, "owner", "Clerk").await;
        let outcome = fx.checker.check("stranger", &target.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::PositionMismatch));
    }

    #[tokio::test]
    async fn test_rate_limited_last() {
        let fx = fixture().await;
        let target = listing(&fx, "owner", "Clerk").await;
        fx.limiter.record("sender");
        fx.limiter.record("sender");

        let outcome = fx.checker.check("sender", &target.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::RateLimited));

        // Earlier checks still take precedence
        let mismatch = listing(&fx, "owner", "Usher").await;
        let outcome = fx.checker.check("sender", &mismatch.id).await.unwrap();
        assert_eq!(outcome, Eligibility::Deny(DenyReason::PositionMismatch));
    }
}
