//! Swap listings
//!
//! A listing advertises a member's current posting and the posting they want
//! in exchange. New listings wait for moderation in `pending_approval`; an
//! owner may hold a limited number of open listings (pending or active) at
//! a time.
//!
//! The open-listing cap is checked with a count followed by an insert. Two
//! concurrent creations at the boundary can both pass; the cap is enforced at
//! creation time only and is never applied retroactively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use storage::{Collection, Document, DocumentStore, Filter};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ConflictKind, CoreError, Result};

/// Default maximum number of open listings per owner
pub const DEFAULT_MAX_OPEN_LISTINGS: usize = 3;

/// Lifecycle state of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    /// Waiting for moderation
    PendingApproval,
    /// Visible and accepting invitations
    Active,
    /// Refused by moderation
    Rejected,
    /// Removed by the owner
    Withdrawn,
}

impl ListingStatus {
    /// Statuses that count toward the open-listing cap
    pub const OPEN: [ListingStatus; 2] = [ListingStatus::PendingApproval, ListingStatus::Active];

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::PendingApproval => "pending_approval",
            ListingStatus::Active => "active",
            ListingStatus::Rejected => "rejected",
            ListingStatus::Withdrawn => "withdrawn",
        }
    }

    /// Check if the status counts toward the cap
    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn open_status_filter() -> Filter {
    Filter::new().any_of("status", ListingStatus::OPEN.iter().map(|s| s.as_str()))
}

/// Fields supplied by the owner when creating a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewListing {
    /// Short headline
    pub title: String,
    /// Employing institution
    pub institution: String,
    /// Position being swapped
    pub role: String,
    /// Current province
    pub current_province: String,
    /// Current district
    #[serde(default)]
    pub current_district: String,
    /// Desired province
    pub desired_province: String,
    /// Desired district
    #[serde(default)]
    pub desired_district: String,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewListing {
    fn validate(&self) -> Result<()> {
        let required = [
            ("title", &self.title),
            ("institution", &self.institution),
            ("role", &self.role),
            ("current_province", &self.current_province),
            ("desired_province", &self.desired_province),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// A persisted listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing id
    pub id: String,
    /// Owner
    pub user_id: String,
    /// Short headline
    pub title: String,
    /// Employing institution
    pub institution: String,
    /// Position being swapped
    pub role: String,
    /// Current province
    pub current_province: String,
    /// Current district
    #[serde(default)]
    pub current_district: String,
    /// Desired province
    pub desired_province: String,
    /// Desired district
    #[serde(default)]
    pub desired_district: String,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Lifecycle state
    pub status: ListingStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Document for Listing {
    const COLLECTION: &'static str = "listings";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Listing lifecycle operations
#[derive(Clone)]
pub struct ListingBook {
    listings: Collection<Listing>,
    clock: Arc<dyn Clock>,
    max_open: usize,
}

impl ListingBook {
    /// Create a listing book with the given open-listing cap
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, max_open: usize) -> Self {
        Self { listings: Collection::new(store), clock, max_open }
    }

    /// Maximum open listings per owner
    pub fn max_open(&self) -> usize {
        self.max_open
    }

    /// Create a listing in `pending_approval`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when a required field is blank
    /// - `Conflict(ListingCap)` when the owner already has `max_open` open listings
    pub async fn create(&self, owner_id: &str, fields: NewListing) -> Result<Listing> {
        fields.validate()?;

        let open = self.count_open(owner_id).await?;
        if open >= self.max_open {
            tracing::debug!(owner = owner_id, open, "Listing cap reached");
            return Err(ConflictKind::ListingCap.into());
        }

        let now = self.clock.now();
        let listing = Listing {
            id: Uuid::new_v4().to_string(),
            user_id: owner_id.to_string(),
            title: fields.title.trim().to_string(),
            institution: fields.institution.trim().to_string(),
            role: fields.role.trim().to_string(),
            current_province: fields.current_province,
            current_district: fields.current_district,
            desired_province: fields.desired_province,
            desired_district: fields.desired_district,
            notes: fields.notes,
            status: ListingStatus::PendingApproval,
            created_at: now,
            updated_at: now,
        };
        self.listings.insert(&listing).await?;

        tracing::info!(listing = %listing.id, owner = owner_id, "Listing created");
        Ok(listing)
    }

    /// Fetch a listing
    pub async fn get(&self, listing_id: &str) -> Result<Option<Listing>> {
        Ok(self.listings.get(listing_id).await?)
    }

    /// Fetch a listing or fail with `NotFound`
    pub async fn require(&self, listing_id: &str) -> Result<Listing> {
        self.get(listing_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("listing {listing_id}")))
    }

    /// All listings of an owner, newest first
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Listing>> {
        let mut listings = self.listings.find(&Filter::new().eq("user_id", owner_id)).await?;
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }

    /// Number of open listings held by an owner
    pub async fn count_open(&self, owner_id: &str) -> Result<usize> {
        Ok(self.listings.count(&open_status_filter().eq("user_id", owner_id)).await?)
    }

    /// Withdraw an open listing; withdrawing twice is a no-op
    pub async fn withdraw(&self, listing_id: &str, actor_id: &str) -> Result<Listing> {
        let listing = self.require(listing_id).await?;
        if listing.user_id != actor_id {
            return Err(CoreError::forbidden("only the owner can withdraw a listing"));
        }
        if listing.status == ListingStatus::Withdrawn {
            return Ok(listing);
        }
        if !listing.status.is_open() {
            return Err(ConflictKind::ListingClosed.into());
        }

        let updated = self.transition(listing, &open_status_filter(), ListingStatus::Withdrawn).await?;
        updated.ok_or_else(|| ConflictKind::ListingClosed.into())
    }

    /// Approve or reject a listing waiting for moderation
    pub async fn moderate(&self, listing_id: &str, approve: bool) -> Result<Listing> {
        let listing = self.require(listing_id).await?;
        if listing.status != ListingStatus::PendingApproval {
            return Err(ConflictKind::AlreadyResolved.into());
        }

        let target = if approve { ListingStatus::Active } else { ListingStatus::Rejected };
        let pending = Filter::new().eq("status", ListingStatus::PendingApproval.as_str());
        let updated = self.transition(listing, &pending, target).await?;
        updated.ok_or_else(|| ConflictKind::AlreadyResolved.into())
    }

    async fn transition(
        &self,
        mut listing: Listing,
        expected: &Filter,
        to: ListingStatus,
    ) -> Result<Option<Listing>> {
        let from = listing.status;
        listing.status = to;
        listing.updated_at = self.clock.now();

        if !self.listings.replace_if(expected, &listing).await? {
            return Ok(None);
        }
        tracing::info!(listing = %listing.id, %from, %to, "Listing status changed");
        Ok(Some(listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::ErrorKind;
    use storage::MemoryStore;

    fn book() -> ListingBook {
        ListingBook::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            DEFAULT_MAX_OPEN_LISTINGS,
        )
    }

    fn fields(role: &str) -> NewListing {
        NewListing {
            title: "Ankara → İzmir".into(),
            institution: "Adalet Bakanlığı".into(),
            role: role.into(),
            current_province: "Ankara".into(),
            desired_province: "İzmir".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(ListingStatus::PendingApproval).unwrap(),
            serde_json::json!("pending_approval")
        );
        assert_eq!(ListingStatus::Active.to_string(), "active");
        assert!(ListingStatus::Active.is_open());
        assert!(!ListingStatus::Withdrawn.is_open());
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let book = book();
        let listing = book.create("owner", fields("Clerk")).await.unwrap();
        assert_eq!(listing.status, ListingStatus::PendingApproval);
        assert_eq!(book.require(&listing.id).await.unwrap(), listing);
    }

    #[tokio::test]
    async fn test_create_validates_fields() {
        let book = book();
        let err = book.create("owner", fields("  ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("role"));
    }

    #[tokio::test]
    async fn test_cap_and_withdraw() {
        let book = book();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(book.create("owner", fields("Clerk")).await.unwrap().id);
        }
        book.moderate(&ids[0], true).await.unwrap();

        let err = book.create("owner", fields("Clerk")).await.unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::ListingCap));

        // Another owner is unaffected
        book.create("other", fields("Clerk")).await.unwrap();

        let withdrawn = book.withdraw(&ids[0], "owner").await.unwrap();
        assert_eq!(withdrawn.status, ListingStatus::Withdrawn);
        assert_eq!(book.count_open("owner").await.unwrap(), 2);

        book.create("owner", fields("Clerk")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_listing_frees_slot() {
        let book = book();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(book.create("owner", fields("Clerk")).await.unwrap().id);
        }
        let rejected = book.moderate(&ids[1], false).await.unwrap();
        assert_eq!(rejected.status, ListingStatus::Rejected);
        book.create("owner", fields("Clerk")).await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_rules() {
        let book = book();
        let listing = book.create("owner", fields("Clerk")).await.unwrap();

        let err = book.withdraw(&listing.id, "intruder").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = book.withdraw("missing", "owner").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        book.withdraw(&listing.id, "owner").await.unwrap();
        let again = book.withdraw(&listing.id, "owner").await.unwrap();
        assert_eq!(again.status, ListingStatus::Withdrawn);
    }

    #[tokio::test]
    async fn test_moderate_only_pending() {
        let book = book();
        let listing = book.create("owner", fields("Clerk")).await.unwrap();
        book.moderate(&listing.id, true).await.unwrap();

        let err = book.moderate(&listing.id, false).await.unwrap_err();
        assert_eq!(err.conflict(), Some(ConflictKind::AlreadyResolved));
    }

    #[tokio::test]
    async fn test_list_for_owner() {
        let book = book();
        book.create("owner", fields("Clerk")).await.unwrap();
        book.create("owner", fields("Usher")).await.unwrap();
        book.create("other", fields("Clerk")).await.unwrap();

        let mine = book.list_for_owner("owner").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|l| l.user_id == "owner"));
    }
}
