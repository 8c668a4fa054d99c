//! Moderation for the Becayiş exchange
//!
//! This crate owns the user block list. Block edges gate both new
//! invitations and new messages in the exchange core.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blocking;

pub use blocking::{Block, BlockError, BlockService, TimeSource};
