//! Subscription Registry
//!
//! Owns the subscription table and keeps the feed informed of it. Mutations
//! and matching go through one read/write lock, so a tick is matched against
//! either the whole table before a change or the whole table after it.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::error::SubscriptionNotFoundError;
use crate::application::ports::{ControlChannel, ControlMessage, SendError};
use crate::domain::streaming::SecurityKey;
use crate::domain::subscription::{
    Subscription, SubscriptionId, SubscriptionIds, SubscriptionStats, SubscriptionTable,
    TickCallback,
};
use crate::infrastructure::metrics;

/// Registry of active subscriptions.
pub struct SubscriptionRegistry {
    ids: SubscriptionIds,
    table: RwLock<SubscriptionTable>,
    channel: Arc<dyn ControlChannel>,
}

impl SubscriptionRegistry {
    /// Create an empty registry sending control messages over `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn ControlChannel>) -> Self {
        Self {
            ids: SubscriptionIds::new(),
            table: RwLock::new(SubscriptionTable::new()),
            channel,
        }
    }

    /// Register a subscription and announce it to the feed.
    ///
    /// While disconnected the subscription is stored and announced by the
    /// next [`restore_all`](Self::restore_all).
    pub fn add(
        &self,
        securities: Vec<SecurityKey>,
        fields: Vec<String>,
        callback: TickCallback,
    ) -> SubscriptionId {
        let id = self.ids.next_id();
        let subscription = Arc::new(Subscription::new(id, securities, fields, callback));
        let message = subscribe_message(&subscription);

        let count = {
            let mut table = self.table.write();
            table.insert(subscription);
            table.len()
        };
        metrics::set_subscriptions(count);

        tracing::debug!(subscription_id = %id, "Subscription added");
        self.send(message);
        id
    }

    /// Remove a subscription and tell the feed to stop streaming it.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionNotFoundError`] if `id` is not registered, for
    /// example because it was already removed.
    pub fn remove(&self, id: SubscriptionId) -> Result<Arc<Subscription>, SubscriptionNotFoundError> {
        let (removed, count) = {
            let mut table = self.table.write();
            let removed = table.remove(id).ok_or(SubscriptionNotFoundError(id))?;
            (removed, table.len())
        };
        metrics::set_subscriptions(count);

        tracing::debug!(subscription_id = %id, "Subscription removed");
        self.send(ControlMessage::Unsubscribe { id });
        Ok(removed)
    }

    /// Subscriptions interested in `security`, in id order.
    #[must_use]
    pub fn matching(&self, security: &SecurityKey) -> Vec<Arc<Subscription>> {
        self.table.read().matching(security)
    }

    /// Ids of the subscriptions interested in `security`, in id order.
    #[must_use]
    pub fn matches_for(&self, security: &SecurityKey) -> Vec<SubscriptionId> {
        self.table.read().matches_for(security)
    }

    /// Re-announce every subscription to the feed, in id order.
    ///
    /// Returns the number of subscribe messages queued. Stops early if the
    /// connection drops part-way; the next `connected` signal restores again.
    pub fn restore_all(&self) -> usize {
        let subscriptions = self.table.read().all();
        let mut sent = 0;

        for subscription in &subscriptions {
            match self.channel.send(subscribe_message(subscription)) {
                Ok(()) => sent += 1,
                Err(SendError::NotConnected(_)) => {
                    tracing::debug!(
                        restored = sent,
                        remaining = subscriptions.len() - sent,
                        "Connection lost while restoring subscriptions"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %subscription.id(),
                        error = %e,
                        "Failed to restore subscription"
                    );
                }
            }
        }

        if sent > 0 {
            tracing::info!(count = sent, "Subscriptions restored");
        }
        sent
    }

    /// Drop every subscription without notifying the feed.
    pub fn clear(&self) -> usize {
        let count = self.table.write().clear();
        metrics::set_subscriptions(0);
        count
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Table statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.table.read().stats()
    }

    fn send(&self, message: ControlMessage) {
        if !self.channel.is_connected() {
            tracing::debug!(
                subscription_id = %message.id(),
                message_type = message.kind(),
                "Not connected, deferring control message"
            );
            return;
        }

        match self.channel.send(message.clone()) {
            Ok(()) => {}
            Err(SendError::NotConnected(_)) => {
                tracing::debug!(
                    subscription_id = %message.id(),
                    message_type = message.kind(),
                    "Connection dropped, control message discarded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %message.id(),
                    message_type = message.kind(),
                    error = %e,
                    "Failed to send control message"
                );
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn subscribe_message(subscription: &Subscription) -> ControlMessage {
    ControlMessage::Subscribe {
        id: subscription.id(),
        securities: subscription.securities().to_vec(),
        fields: subscription.fields().to_vec(),
    }
}
