//! Exchange core for Becayiş
//!
//! This crate contains the business logic of the job-swap exchange: listing
//! lifecycle, invitation eligibility and state machine, conversations and
//! messages, and notification fan-out. Live delivery is abstracted behind
//! [`events::EventPublisher`]; persistence behind [`storage::DocumentStore`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod conversations;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod exchange;
pub mod invitations;
pub mod listings;
pub mod notifications;
pub mod profiles;
pub mod rate_limit;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use conversations::{Conversation, ConversationService, Message, MessagePreview};
pub use eligibility::{DenyReason, Eligibility, EligibilityChecker};
pub use error::{ConflictKind, CoreError, ErrorKind, Result};
pub use events::{EventPublisher, NoopPublisher, OutboundEvent};
pub use exchange::Exchange;
pub use invitations::{
    Invitation, InvitationAction, InvitationBook, InvitationOverview, InvitationResponse,
    InvitationStatus,
};
pub use listings::{Listing, ListingBook, ListingStatus, NewListing};
pub use notifications::{Notification, NotificationCenter, NotificationType};
pub use profiles::{Profile, ProfileDirectory};
pub use rate_limit::{RateLimitConfig, RateLimiter};
