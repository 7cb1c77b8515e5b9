//! Subscription registry.
//!
//! Channel membership survives reconnects: on every `Ready` the whole set is
//! resent as one subscribe request.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::debug;

/// Set of subscribed channel names.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: RwLock<BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert channels and return only those that were not present.
    ///
    /// The caller sends one subscribe request for the returned set, or none
    /// if it is empty.
    pub fn ensure_subscribed<I, S>(&self, channels: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.channels.write();
        let added: BTreeSet<String> = channels
            .into_iter()
            .map(Into::into)
            .filter(|c| current.insert(c.clone()))
            .collect();
        if !added.is_empty() {
            debug!(added = ?added, total = current.len(), "Channels registered");
        }
        added
    }

    /// All registered channels.
    pub fn all(&self) -> BTreeSet<String> {
        self.channels.read().clone()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.read().contains(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
