//! Registry of active upstream subscriptions.
//!
//! The registry is the source of truth for what the connection should be
//! subscribed to. Each entry remembers the connection generation it was last
//! sent on, so a reconnect re-sends everything exactly once and a subscription
//! added while disconnected is sent as soon as the next connection is up.
//!
//! It also tracks, per channel, when the first and last data message arrived
//! on the current connection.

use crate::message::Subscription;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-channel delivery state on the current connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    /// The exchange acknowledged the subscription.
    pub acked: bool,
    pub first_recv: Option<DateTime<Utc>>,
    pub last_recv: Option<DateTime<Utc>>,
}

impl ChannelState {
    pub fn is_ready(&self) -> bool {
        self.first_recv.is_some()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    subscription: Subscription,
    sent_generation: Option<u64>,
    state: ChannelState,
}

/// Active subscriptions keyed by channel name.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<BTreeMap<&'static str, Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Re-adding an existing channel replaces it and
    /// marks it unsent.
    pub fn add(&self, subscription: Subscription) {
        let channel = subscription.channel();
        self.entries.write().insert(
            channel,
            Entry {
                subscription,
                sent_generation: None,
                state: ChannelState::default(),
            },
        );
        debug!(channel, "Subscription registered");
    }

    /// Remove a subscription, returning it if it was registered.
    pub fn remove(&self, channel: &str) -> Option<Subscription> {
        self.entries
            .write()
            .remove(channel)
            .map(|entry| entry.subscription)
    }

    /// All registered subscriptions.
    pub fn active(&self) -> Vec<Subscription> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.subscription.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Subscriptions not yet sent on connection `generation`.
    pub fn pending(&self, generation: u64) -> Vec<Subscription> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.sent_generation != Some(generation))
            .map(|entry| entry.subscription.clone())
            .collect()
    }

    /// Record that `channel` was sent on connection `generation`.
    pub fn mark_sent(&self, channel: &str, generation: u64) {
        if let Some(entry) = self.entries.write().get_mut(channel) {
            entry.sent_generation = Some(generation);
        }
    }

    /// Record a subscribe acknowledgement for the subscription type `kind`.
    pub fn mark_acked(&self, kind: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.values_mut().find(|e| e.subscription.channel() == kind) {
            entry.state.acked = true;
            debug!(channel = kind, "Subscription acknowledged");
        }
    }

    /// Record a data message on `channel`. Unknown channels are ignored.
    pub fn handle_message(&self, channel: &str) {
        let now = Utc::now();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(channel) {
            if entry.state.first_recv.is_none() {
                entry.state.first_recv = Some(now);
                info!(channel, "First data received");
            }
            entry.state.last_recv = Some(now);
        }
    }

    pub fn channel_state(&self, channel: &str) -> Option<ChannelState> {
        self.entries
            .read()
            .get(channel)
            .map(|entry| entry.state.clone())
    }

    /// Clear delivery state after a disconnect. Subscriptions stay registered.
    pub fn reset_ready_state(&self) {
        for entry in self.entries.write().values_mut() {
            entry.state = ChannelState::default();
        }
    }
}
