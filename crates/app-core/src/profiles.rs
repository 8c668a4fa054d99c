//! Member profiles
//!
//! Profiles are boundary records owned by the account layer. The exchange
//! core reads them for two things: the sender's position during invitation
//! eligibility, and a display name for notification text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{Collection, Document, DocumentStore};

use crate::clock::Clock;
use crate::error::{CoreError, Result};

/// Public profile of a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User id (also the document id)
    pub user_id: String,
    /// Name shown to other members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Employing institution
    pub institution: String,
    /// Position held by the member
    pub role: String,
    /// Current province
    pub current_province: String,
    /// Current district
    #[serde(default)]
    pub current_district: String,
    /// Free-form biography
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Create a profile with the required fields
    pub fn new(
        user_id: impl Into<String>,
        institution: impl Into<String>,
        role: impl Into<String>,
        current_province: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            institution: institution.into(),
            role: role.into(),
            current_province: current_province.into(),
            current_district: String::new(),
            bio: None,
            updated_at: Utc::now(),
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the user id
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.user_id)
    }
}

impl Document for Profile {
    const COLLECTION: &'static str = "profiles";

    fn id(&self) -> &str {
        &self.user_id
    }
}

/// Check whether two position titles denote the same role
///
/// Comparison ignores surrounding whitespace and letter case.
pub fn positions_match(a: &str, b: &str) -> bool {
    let a = a.trim();
    let b = b.trim();
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// Read/write access to profiles
#[derive(Clone)]
pub struct ProfileDirectory {
    profiles: Collection<Profile>,
    clock: Arc<dyn Clock>,
}

impl ProfileDirectory {
    /// Create a directory over a shared store
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { profiles: Collection::new(store), clock }
    }

    /// Create or overwrite a profile
    pub async fn upsert(&self, mut profile: Profile) -> Result<Profile> {
        if profile.user_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("user id is required".into()));
        }
        if profile.role.trim().is_empty() {
            return Err(CoreError::InvalidInput("role is required".into()));
        }
        profile.updated_at = self.clock.now();

        match self.profiles.insert(&profile).await {
            Ok(()) => {}
            Err(e) if e.is_duplicate_key() => {
                self.profiles.replace(&profile).await?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(user = %profile.user_id, "Profile saved");
        Ok(profile)
    }

    /// Fetch a profile
    pub async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.profiles.get(user_id).await?)
    }

    /// Display name for `user_id`, or the id itself when there is no profile
    pub async fn display_name(&self, user_id: &str) -> Result<String> {
        Ok(self
            .get(user_id)
            .await?
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| user_id.to_string()))
    }
}
