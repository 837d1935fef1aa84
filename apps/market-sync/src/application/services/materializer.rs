//! Live Range Materializer
//!
//! Holds every live range's cell table and keeps the feed subscribed to the
//! data that populates them. Ranges asking for the same securities and fields
//! share one feed subscription, released when the last of them closes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use crate::application::error::RangeError;
use crate::application::services::registry::SubscriptionRegistry;
use crate::application::signal::{EngineSignals, LiveDataUpdate};
use crate::domain::live_range::{LiveRange, RangeId, Snapshot};
use crate::domain::streaming::{SecurityKey, Tick};
use crate::domain::subscription::{SubscriptionId, TickCallback};
use crate::infrastructure::metrics;

/// Identity of a shared feed subscription.
type FeedKey = (Vec<SecurityKey>, Vec<String>);

/// Reference-counted feed subscription.
#[derive(Debug)]
struct FeedLease {
    subscription: SubscriptionId,
    ranges: usize,
}

#[derive(Debug, Default)]
struct MaterializerState {
    ranges: BTreeMap<RangeId, LiveRange>,
    leases: HashMap<FeedKey, FeedLease>,
}

/// Live range state shared by the dispatcher, the flush scheduler and the
/// engine facade.
pub struct Materializer {
    state: RwLock<MaterializerState>,
    registry: Arc<SubscriptionRegistry>,
    signals: Arc<EngineSignals>,
}

impl Materializer {
    /// Create a materializer that subscribes through `registry`.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, signals: Arc<EngineSignals>) -> Self {
        Self {
            state: RwLock::new(MaterializerState::default()),
            registry,
            signals,
        }
    }

    /// Register a live range and the feed subscription that populates it.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::AlreadyExists`] if `id` is taken, or
    /// [`RangeError::Invalid`] if the range has no securities, no fields or
    /// a zero period.
    pub fn create_range(
        &self,
        id: RangeId,
        securities: Vec<SecurityKey>,
        fields: Vec<String>,
        period: Duration,
    ) -> Result<(), RangeError> {
        validate(&id, &securities, &fields, period)?;

        let key: FeedKey = (securities.clone(), fields.clone());
        let mut state = self.state.write();
        if state.ranges.contains_key(&id) {
            return Err(RangeError::AlreadyExists(id));
        }

        let shared = match state.leases.get_mut(&key) {
            Some(lease) => {
                lease.ranges += 1;
                true
            }
            None => {
                // Ticks reach ranges through apply_tick; the feed subscription
                // only has to exist so the feed streams the data.
                let callback: TickCallback = Arc::new(|_| Ok(()));
                let subscription = self.registry.add(securities.clone(), fields.clone(), callback);
                state.leases.insert(
                    key,
                    FeedLease {
                        subscription,
                        ranges: 1,
                    },
                );
                false
            }
        };

        state
            .ranges
            .insert(id.clone(), LiveRange::new(id.clone(), securities, fields, period));
        let count = state.ranges.len();
        drop(state);

        metrics::set_live_ranges(count);
        tracing::info!(
            range_id = %id,
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            shared_subscription = shared,
            "Live range created"
        );
        Ok(())
    }

    /// Apply a tick to every range holding a matching security.
    ///
    /// Emits `liveDataUpdate` once per changed range, after the lock is
    /// released.
    pub fn apply_tick(&self, tick: &Tick) {
        let updates: Vec<LiveDataUpdate> = {
            let mut state = self.state.write();
            state
                .ranges
                .values_mut()
                .filter_map(|range| {
                    let fields = range.apply(tick);
                    (!fields.is_empty()).then(|| LiveDataUpdate {
                        range_id: range.id().clone(),
                        security: tick.security().clone(),
                        fields,
                    })
                })
                .collect()
        };

        for update in &updates {
            self.signals.live_data_update.emit(update);
        }
    }

    /// Point-in-time copy of a range.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::NotFound`] if no range has this id.
    pub fn snapshot(&self, id: &RangeId) -> Result<Snapshot, RangeError> {
        self.state
            .read()
            .ranges
            .get(id)
            .map(|range| range.snapshot(Utc::now()))
            .ok_or_else(|| RangeError::NotFound(id.clone()))
    }

    /// Flush period of a range.
    #[must_use]
    pub fn period(&self, id: &RangeId) -> Option<Duration> {
        self.state.read().ranges.get(id).map(LiveRange::period)
    }

    /// Remove a range, unsubscribing its feed data if no other range shares it.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::NotFound`] if no range has this id.
    pub fn close_range(&self, id: &RangeId) -> Result<(), RangeError> {
        let mut state = self.state.write();
        let range = state
            .ranges
            .remove(id)
            .ok_or_else(|| RangeError::NotFound(id.clone()))?;

        let key: FeedKey = (range.securities().to_vec(), range.fields().to_vec());
        let released = match state.leases.get_mut(&key) {
            Some(lease) if lease.ranges > 1 => {
                lease.ranges -= 1;
                None
            }
            Some(_) => state.leases.remove(&key).map(|lease| lease.subscription),
            None => None,
        };
        let count = state.ranges.len();
        drop(state);

        if let Some(subscription) = released {
            // Removal only fails if the subscription is already gone
            let _ = self.registry.remove(subscription);
        }

        metrics::set_live_ranges(count);
        tracing::info!(range_id = %id, "Live range closed");
        Ok(())
    }

    /// Ids of every range, in id order.
    #[must_use]
    pub fn range_ids(&self) -> Vec<RangeId> {
        self.state.read().ranges.keys().cloned().collect()
    }

    /// Drop every range without touching the registry.
    pub fn clear(&self) -> usize {
        let mut state = self.state.write();
        let count = state.ranges.len();
        state.ranges.clear();
        state.leases.clear();
        drop(state);

        metrics::set_live_ranges(0);
        count
    }

    /// Number of live ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().ranges.len()
    }

    /// Whether there are no live ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().ranges.is_empty()
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("ranges", &self.len())
            .finish_non_exhaustive()
    }
}

fn validate(
    id: &RangeId,
    securities: &[SecurityKey],
    fields: &[String],
    period: Duration,
) -> Result<(), RangeError> {
    let reason = if id.as_str().trim().is_empty() {
        "id is empty"
    } else if securities.is_empty() {
        "no securities"
    } else if fields.is_empty() {
        "no fields"
    } else if period.is_zero() {
        "refresh period is zero"
    } else {
        return Ok(());
    };

    Err(RangeError::Invalid {
        id: id.clone(),
        reason: reason.to_string(),
    })
}
