//! User block list
//!
//! A block is a directed edge from a blocker to a blocked user. The edge is
//! stored under a deterministic id derived from the pair, so the store's
//! insert-if-absent primitive rejects duplicate blocks without a prior read.
//!
//! # Enforcement
//!
//! - **Invitations** are gated in both directions: either party having blocked
//!   the other prevents a new invitation ([`BlockService::is_blocked_between`]).
//! - **Messages** are gated in one direction only: a user who was blocked by the
//!   other participant cannot post, while the blocker may still speak
//!   ([`BlockService::has_blocked`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use moderation::blocking::BlockService;
//! use storage::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = BlockService::new(Arc::new(MemoryStore::new()));
//!
//!     service.block("alice", "bob", Some("spam".to_string())).await?;
//!     assert!(service.has_blocked("alice", "bob").await?);
//!     assert!(service.is_blocked_between("bob", "alice").await?);
//!
//!     service.unblock("alice", "bob").await?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{Collection, Document, DocumentStore, Filter, StoreError};
use thiserror::Error;

/// Errors that can occur during block operations
#[derive(Debug, Error)]
pub enum BlockError {
    /// Underlying store failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A user tried to block themselves
    #[error("Cannot block yourself")]
    SelfBlock,

    /// The edge already exists
    #[error("User already blocked: {0}")]
    AlreadyBlocked(String),

    /// No block edge to remove
    #[error("Block not found: {0}")]
    NotFound(String),

    /// User id is empty or contains the key separator
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),
}

/// Result type for block operations
pub type Result<T> = std::result::Result<T, BlockError>;

/// Separator between blocker and blocked ids in a block key
const KEY_SEPARATOR: char = ':';

/// Build the deterministic id of the edge `blocker → blocked`
pub fn block_key(blocker_id: &str, blocked_id: &str) -> String {
    format!("{blocker_id}{KEY_SEPARATOR}{blocked_id}")
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() || user_id.contains(KEY_SEPARATOR) {
        return Err(BlockError::InvalidUserId(user_id.to_string()));
    }
    Ok(())
}

/// A directed block edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Deterministic id, see [`block_key`]
    pub id: String,
    /// User who created the block
    pub blocker_id: String,
    /// User being blocked
    pub blocked_id: String,
    /// Optional reason given by the blocker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the block was created
    pub created_at: DateTime<Utc>,
}

impl Document for Block {
    const COLLECTION: &'static str = "blocks";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Source of the current time for `created_at` stamps
pub type TimeSource = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Service for creating, removing and querying block edges
#[derive(Clone)]
pub struct BlockService {
    blocks: Collection<Block>,
    now: TimeSource,
}

impl BlockService {
    /// Create a block service over a shared document store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_time_source(store, Arc::new(Utc::now))
    }

    /// Create a block service that stamps edges with `now`
    pub fn with_time_source(store: Arc<dyn DocumentStore>, now: TimeSource) -> Self {
        Self { blocks: Collection::new(store), now }
    }

    /// Block a user
    ///
    /// # Errors
    ///
    /// - [`BlockError::SelfBlock`] if `blocker_id == blocked_id`
    /// - [`BlockError::AlreadyBlocked`] if the edge already exists
    pub async fn block(
        &self,
        blocker_id: &str,
        blocked_id: &str,
        reason: Option<String>,
    ) -> Result<Block> {
        validate_user_id(blocker_id)?;
        validate_user_id(blocked_id)?;
        if blocker_id == blocked_id {
            return Err(BlockError::SelfBlock);
        }

        let block = Block {
            id: block_key(blocker_id, blocked_id),
            blocker_id: blocker_id.to_string(),
            blocked_id: blocked_id.to_string(),
            reason: reason.filter(|r| !r.trim().is_empty()),
            created_at: (self.now)(),
        };

        match self.blocks.insert(&block).await {
            Ok(()) => {
                tracing::info!(blocker = blocker_id, blocked = blocked_id, "User blocked");
                Ok(block)
            }
            Err(e) if e.is_duplicate_key() => {
                Err(BlockError::AlreadyBlocked(blocked_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the edge `blocker → blocked`
    pub async fn unblock(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        validate_user_id(blocker_id)?;
        validate_user_id(blocked_id)?;

        if !self.blocks.delete(&block_key(blocker_id, blocked_id)).await? {
            return Err(BlockError::NotFound(blocked_id.to_string()));
        }
        tracing::info!(blocker = blocker_id, blocked = blocked_id, "User unblocked");
        Ok(())
    }

    /// List every block created by `blocker_id`, newest first
    pub async fn get_blocks(&self, blocker_id: &str) -> Result<Vec<Block>> {
        let mut blocks = self.blocks.find(&Filter::new().eq("blocker_id", blocker_id)).await?;
        blocks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(blocks)
    }

    /// Check whether `blocker_id` has blocked `blocked_id`
    pub async fn has_blocked(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        Ok(self.blocks.get(&block_key(blocker_id, blocked_id)).await?.is_some())
    }

    /// Check whether a block edge exists in either direction
    pub async fn is_blocked_between(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self.has_blocked(a, b).await? || self.has_blocked(b, a).await?)
    }
}
