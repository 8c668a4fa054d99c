//! Live connection registry
//!
//! Maps a user id to the set of live channels (one per connected device) and
//! routes outbound events to all of them. The registry is the only mutable
//! structure shared between connection tasks.
//!
//! # Locking
//!
//! A single coarse mutex guards the whole map. Every operation under the lock
//! is a hash lookup plus non-blocking channel sends, so contention stays low
//! at the expected scale. Sharding the map by user is the knob to turn if it
//! ever shows up in profiles.
//!
//! # Dead channels
//!
//! A channel whose receiving side is gone (the connection task ended) fails
//! its send. [`ConnectionRegistry::send`] drops such channels on the spot and
//! keeps delivering to the user's other channels.

use app_core::{EventPublisher, OutboundEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Process-unique id of a live channel
pub type ChannelId = u64;

/// Receiving side of a live channel, drained by the connection's writer
pub type ChannelReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

/// Sending side of one client connection
#[derive(Debug, Clone)]
pub struct LiveChannel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl LiveChannel {
    /// Create a channel with the given id
    pub fn new(id: ChannelId) -> (Self, ChannelReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Channel id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue an event; false if the receiving side is gone
    fn deliver(&self, event: OutboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Registry of live channels keyed by user id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    users: Mutex<HashMap<String, Vec<LiveChannel>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, unregistered channel
    pub fn channel(&self) -> (LiveChannel, ChannelReceiver) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        LiveChannel::new(id)
    }

    /// Add a channel to the user's live set
    pub fn register(&self, user_id: &str, channel: LiveChannel) {
        let channel_id = channel.id();
        let count = {
            let mut users = self.users.lock();
            let channels = users.entry(user_id.to_string()).or_default();
            channels.push(channel);
            channels.len()
        };
        tracing::debug!(user = user_id, channel = channel_id, channels = count, "Channel registered");
    }

    /// Remove a channel; returns whether it was registered
    ///
    /// The user entry is dropped once its last channel is removed.
    pub fn unregister(&self, user_id: &str, channel_id: ChannelId) -> bool {
        let mut users = self.users.lock();
        let Some(channels) = users.get_mut(user_id) else {
            return false;
        };
        let before = channels.len();
        channels.retain(|c| c.id() != channel_id);
        let removed = channels.len() != before;
        if channels.is_empty() {
            users.remove(user_id);
        }
        drop(users);

        if removed {
            tracing::debug!(user = user_id, channel = channel_id, "Channel unregistered");
        }
        removed
    }

    /// Deliver an event to every live channel of `user_id`
    ///
    /// Returns the number of channels that accepted the event. Channels that
    /// fail are unregistered. A user with no channels is not an error.
    pub fn send(&self, user_id: &str, event: &OutboundEvent) -> usize {
        let mut users = self.users.lock();
        let Some(channels) = users.get_mut(user_id) else {
            return 0;
        };

        let before = channels.len();
        channels.retain(|channel| channel.deliver(event.clone()));
        let delivered = channels.len();
        if channels.is_empty() {
            users.remove(user_id);
        }
        drop(users);

        if delivered < before {
            tracing::debug!(
                user = user_id,
                pruned = before - delivered,
                "Dropped dead channels during send"
            );
        }
        delivered
    }

    /// Check whether `user_id` has at least one live channel
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.lock().contains_key(user_id)
    }

    /// Number of live channels of `user_id`
    pub fn channel_count(&self, user_id: &str) -> usize {
        self.users.lock().get(user_id).map_or(0, Vec::len)
    }

    /// Number of users with at least one live channel
    pub fn online_users(&self) -> usize {
        self.users.lock().len()
    }
}

impl EventPublisher for ConnectionRegistry {
    fn publish(&self, user_id: &str, event: OutboundEvent) {
        self.send(user_id, &event);
    }
}
