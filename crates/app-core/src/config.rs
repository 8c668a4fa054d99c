//! Exchange core configuration

use crate::conversations::{MAX_MESSAGE_LENGTH, PREVIEW_LENGTH};
use crate::listings::DEFAULT_MAX_OPEN_LISTINGS;
use crate::rate_limit::RateLimitConfig;

/// Tunables of the exchange core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Invitation allowance per sender
    pub invitation_limit: RateLimitConfig,
    /// Maximum open listings per owner
    pub max_open_listings: usize,
    /// Maximum message length in characters
    pub max_message_length: usize,
    /// Length of the conversation's last-message preview in characters
    pub preview_length: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            invitation_limit: RateLimitConfig::default(),
            max_open_listings: DEFAULT_MAX_OPEN_LISTINGS,
            max_message_length: MAX_MESSAGE_LENGTH,
            preview_length: PREVIEW_LENGTH,
        }
    }
}

impl CoreConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invitation limiter configuration
    pub fn invitation_limit(mut self, limit: RateLimitConfig) -> Self {
        self.invitation_limit = limit;
        self
    }

    /// Set the open-listing cap
    pub fn max_open_listings(mut self, max: usize) -> Self {
        self.max_open_listings = max;
        self
    }

    /// Set the maximum message length
    pub fn max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max;
        self
    }

    /// Set the preview length
    pub fn preview_length(mut self, chars: usize) -> Self {
        self.preview_length = chars;
        self
    }
}
