//! Error taxonomy for the exchange core
//!
//! Every mutating operation surfaces its failures as a typed [`CoreError`].
//! Adapters (HTTP, live socket) map [`CoreError::kind`] to their own status
//! codes; the core never does that mapping itself.

use moderation::BlockError;
use std::fmt;
use storage::StoreError;
use thiserror::Error;

use crate::invitations::InvitationStatus;

/// Specific reason behind a [`CoreError::Conflict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConflictKind {
    /// Sender owns the listing they tried to invite
    #[error("Cannot invite your own listing")]
    SelfInvite,

    /// An invitation from this sender for this listing already exists
    #[error("An invitation for this listing already exists ({0})")]
    DuplicateInvitation(InvitationStatus),

    /// Sender's position does not match the listing's role
    #[error("Your position does not match this listing")]
    PositionMismatch,

    /// Sender exceeded the daily invitation allowance
    #[error("Daily invitation limit reached")]
    RateLimited,

    /// Owner already has the maximum number of open listings
    #[error("Open listing limit reached")]
    ListingCap,

    /// Listing is no longer open for the requested change
    #[error("Listing is closed")]
    ListingClosed,

    /// Target is no longer pending
    #[error("Already resolved")]
    AlreadyResolved,

    /// Block edge already exists
    #[error("User already blocked")]
    AlreadyBlocked,

    /// Actor referenced themselves where another user is required
    #[error("Cannot target yourself")]
    SelfReference,
}

/// Errors surfaced by exchange operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced entity is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor lacks standing for the entity
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate, terminal-state, or limit violation
    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    /// Malformed action or content
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Credential missing or invalid
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Persistent store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Coarse error category used by adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`CoreError::NotFound`]
    NotFound,
    /// See [`CoreError::Forbidden`]
    Forbidden,
    /// See [`CoreError::Conflict`]
    Conflict,
    /// See [`CoreError::InvalidInput`]
    InvalidInput,
    /// See [`CoreError::Unauthenticated`]
    Unauthenticated,
    /// See [`CoreError::Storage`]
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Storage => "storage",
        };
        f.write_str(name)
    }
}

impl CoreError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Unauthenticated => ErrorKind::Unauthenticated,
            CoreError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Conflict reason, if this is a conflict
    pub fn conflict(&self) -> Option<ConflictKind> {
        match self {
            CoreError::Conflict(kind) => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub(crate) fn forbidden(why: impl Into<String>) -> Self {
        CoreError::Forbidden(why.into())
    }
}

impl From<ConflictKind> for CoreError {
    fn from(kind: ConflictKind) -> Self {
        CoreError::Conflict(kind)
    }
}

impl From<BlockError> for CoreError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::Store(e) => CoreError::Storage(e),
            BlockError::SelfBlock => CoreError::Conflict(ConflictKind::SelfReference),
            BlockError::AlreadyBlocked(_) => CoreError::Conflict(ConflictKind::AlreadyBlocked),
            BlockError::NotFound(id) => CoreError::NotFound(format!("block on {id}")),
            BlockError::InvalidUserId(id) => CoreError::InvalidInput(format!("user id {id:?}")),
        }
    }
}

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, CoreError>;
