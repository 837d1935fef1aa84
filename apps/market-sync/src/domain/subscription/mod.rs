//! Subscription Types
//!
//! Domain types for tracking real-time subscriptions and matching inbound
//! ticks against them.
//!
//! # Design
//!
//! The subscription table tracks:
//! - Each subscription by its opaque, never-reused identifier
//! - An index from ticker to the subscriptions that mention it
//!
//! Matching a tick first narrows candidates through the ticker index and then
//! applies the exchange rule of [`SecurityKey::matches`], so the cost of a
//! match grows with the number of interested subscriptions rather than with
//! the size of the whole table.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{SecurityKey, Tick};

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier of a subscription.
///
/// Issued by [`SubscriptionIds`]; an identifier is never handed out twice
/// within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value, as sent on the wire.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Monotonic generator for subscription identifiers.
#[derive(Debug)]
pub struct SubscriptionIds {
    next: AtomicU64,
}

impl Default for SubscriptionIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionIds {
    /// Create a generator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next identifier.
    pub fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Error returned by a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Delivery callback invoked once per matching tick.
///
/// Callbacks run synchronously on the dispatch task and must not block.
pub type TickCallback = Arc<dyn Fn(&Tick) -> Result<(), CallbackError> + Send + Sync>;

/// A registered interest in real-time updates.
pub struct Subscription {
    id: SubscriptionId,
    securities: Vec<SecurityKey>,
    fields: Vec<String>,
    callback: TickCallback,
}

impl Subscription {
    /// Create a subscription.
    #[must_use]
    pub fn new(
        id: SubscriptionId,
        securities: Vec<SecurityKey>,
        fields: Vec<String>,
        callback: TickCallback,
    ) -> Self {
        Self {
            id,
            securities,
            fields,
            callback,
        }
    }

    /// Subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Securities in the order they were requested.
    #[must_use]
    pub fn securities(&self) -> &[SecurityKey] {
        &self.securities
    }

    /// Requested field names.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Whether a tick for `security` concerns this subscription.
    #[must_use]
    pub fn wants(&self, security: &SecurityKey) -> bool {
        self.securities.iter().any(|key| key.matches(security))
    }

    /// Invoke the delivery callback.
    ///
    /// # Errors
    ///
    /// Returns whatever error the callback reports.
    pub fn deliver(&self, tick: &Tick) -> Result<(), CallbackError> {
        (self.callback)(tick)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("securities", &self.securities)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Subscription Table
// =============================================================================

/// Subscriptions keyed by id, with a ticker index for matching.
///
/// The table itself is not synchronized; the registry wraps it in a lock so
/// a match always sees a whole table.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    /// Subscriptions by id, ordered so iteration is deterministic.
    entries: BTreeMap<SubscriptionId, Arc<Subscription>>,
    /// Map from ticker to the subscriptions mentioning it.
    by_ticker: HashMap<String, BTreeSet<SubscriptionId>>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, replacing any entry with the same id.
    pub fn insert(&mut self, subscription: Arc<Subscription>) {
        let id = subscription.id();
        if self.entries.contains_key(&id) {
            self.remove(id);
        }

        for key in subscription.securities() {
            self.by_ticker
                .entry(key.ticker().to_string())
                .or_default()
                .insert(id);
        }

        self.entries.insert(id, subscription);
    }

    /// Remove a subscription, returning it if it was present.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let subscription = self.entries.remove(&id)?;

        for key in subscription.securities() {
            if let Some(ids) = self.by_ticker.get_mut(key.ticker()) {
                ids.remove(&id);

                // Clean up empty ticker entry
                if ids.is_empty() {
                    self.by_ticker.remove(key.ticker());
                }
            }
        }

        Some(subscription)
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.entries.get(&id).cloned()
    }

    /// Every subscription interested in `security`, each at most once, in id order.
    #[must_use]
    pub fn matching(&self, security: &SecurityKey) -> Vec<Arc<Subscription>> {
        let Some(candidates) = self.by_ticker.get(security.ticker()) else {
            return vec![];
        };

        candidates
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|subscription| subscription.wants(security))
            .cloned()
            .collect()
    }

    /// Identifiers of every subscription interested in `security`.
    #[must_use]
    pub fn matches_for(&self, security: &SecurityKey) -> Vec<SubscriptionId> {
        self.matching(security).iter().map(|s| s.id()).collect()
    }

    /// All subscriptions in id order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Subscription>> {
        self.entries.values().cloned().collect()
    }

    /// Drop every subscription, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.by_ticker.clear();
        count
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Statistics about the table.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            subscription_count: self.entries.len(),
            ticker_count: self.by_ticker.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the subscription table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of active subscriptions.
    pub subscription_count: usize,
    /// Number of distinct tickers referenced.
    pub ticker_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;

    fn noop() -> TickCallback {
        Arc::new(|_| Ok(()))
    }

    fn sub(id: u64, securities: &[SecurityKey]) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            SubscriptionId(id),
            securities.to_vec(),
            vec!["last".to_string()],
            noop(),
        ))
    }

    fn aapl() -> SecurityKey {
        SecurityKey::new("AAPL", "NASDAQ")
    }

    fn msft() -> SecurityKey {
        SecurityKey::new("MSFT", "NASDAQ")
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let ids = SubscriptionIds::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "sub-1");
    }

    #[test]
    fn matching_returns_interested_subscriptions() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl()]));
        table.insert(sub(2, &[msft()]));

        assert_eq!(table.matches_for(&aapl()), vec![SubscriptionId(1)]);
        assert_eq!(table.matches_for(&msft()), vec![SubscriptionId(2)]);
    }

    #[test]
    fn matching_returns_all_matches_in_id_order() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(3, &[aapl()]));
        table.insert(sub(1, &[aapl(), msft()]));
        table.insert(sub(2, &[SecurityKey::ticker_only("AAPL")]));

        assert_eq!(
            table.matches_for(&aapl()),
            vec![SubscriptionId(1), SubscriptionId(2), SubscriptionId(3)]
        );
    }

    #[test]
    fn duplicate_security_matches_once() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl(), aapl(), SecurityKey::ticker_only("AAPL")]));

        assert_eq!(table.matches_for(&aapl()).len(), 1);
    }

    #[test]
    fn exchange_mismatch_does_not_match() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl()]));

        assert!(table.matches_for(&SecurityKey::new("AAPL", "NYSE")).is_empty());
        assert_eq!(table.matches_for(&SecurityKey::ticker_only("AAPL")).len(), 1);
    }

    #[test]
    fn remove_cleans_up_index() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl(), msft()]));

        assert!(table.remove(SubscriptionId(1)).is_some());
        assert!(table.matches_for(&aapl()).is_empty());
        assert_eq!(table.stats(), SubscriptionStats::default());
    }

    #[test]
    fn remove_unknown_returns_none() {
        let mut table = SubscriptionTable::new();
        assert!(table.remove(SubscriptionId(42)).is_none());
    }

    #[test]
    fn remove_preserves_other_subscriptions() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl()]));
        table.insert(sub(2, &[aapl()]));

        table.remove(SubscriptionId(1));

        assert_eq!(table.matches_for(&aapl()), vec![SubscriptionId(2)]);
    }

    #[test]
    fn reinsert_replaces_index_entries() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl()]));
        table.insert(sub(1, &[msft()]));

        assert!(table.matches_for(&aapl()).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stats_are_accurate() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl(), msft()]));
        table.insert(sub(2, &[aapl()]));

        let stats = table.stats();
        assert_eq!(stats.subscription_count, 2);
        assert_eq!(stats.ticker_count, 2);
    }

    #[test]
    fn clear_empties_table() {
        let mut table = SubscriptionTable::new();
        table.insert(sub(1, &[aapl()]));
        table.insert(sub(2, &[msft()]));

        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert!(table.matches_for(&aapl()).is_empty());
    }

    #[test]
    fn deliver_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(
            SubscriptionId(1),
            vec![aapl()],
            vec![],
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let tick = Tick::builder(aapl(), Utc::now()).build();
        subscription.deliver(&tick).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_omits_callback() {
        let debug = format!("{:?}", sub(7, &[aapl()]));
        assert!(debug.contains("SubscriptionId(7)"));
        assert!(debug.contains("AAPL"));
    }

    proptest! {
        #[test]
        fn match_iff_security_listed(
            listed in proptest::collection::vec("[A-D]", 1..4),
            probe in "[A-F]",
        ) {
            let keys: Vec<SecurityKey> = listed.iter().map(SecurityKey::ticker_only).collect();
            let mut table = SubscriptionTable::new();
            table.insert(sub(1, &keys));

            let matches = table.matches_for(&SecurityKey::ticker_only(&probe));
            if listed.contains(&probe) {
                prop_assert_eq!(matches, vec![SubscriptionId(1)]);
            } else {
                prop_assert!(matches.is_empty());
            }
        }
    }
}
