//! Engine Signals
//!
//! Typed observer lists. A component emits a signal synchronously; every
//! observer connected at that moment is invoked in connection order on the
//! emitting task.
//!
//! Observers are snapshotted before invocation, so an observer may connect or
//! disconnect observers (including itself) without deadlocking.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::application::error::EngineError;
use crate::domain::live_range::RangeId;
use crate::domain::streaming::SecurityKey;

/// Handle returned by [`Signal::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A typed list of observers.
pub struct Signal<T> {
    name: &'static str,
    next_id: AtomicU64,
    observers: RwLock<BTreeMap<ObserverId, Observer<T>>>,
}

impl<T> Signal<T> {
    /// Create a signal with no observers.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            observers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Signal name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Register an observer.
    pub fn connect<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().insert(id, Arc::new(observer));
        id
    }

    /// Remove an observer. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.observers.write().remove(&id).is_some()
    }

    /// Remove every observer.
    pub fn disconnect_all(&self) {
        self.observers.write().clear();
    }

    /// Number of connected observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Invoke every observer with `value`.
    ///
    /// A panicking observer is logged and skipped; the remaining observers
    /// still run.
    pub fn emit(&self, value: &T) {
        // Collect observers so none run under the lock
        let observers: Vec<Observer<T>> = self.observers.read().values().cloned().collect();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(value))).is_err() {
                tracing::error!(signal = self.name, "Signal observer panicked");
            }
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("observers", &self.observer_count())
            .finish()
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Cells of a live range changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveDataUpdate {
    /// Range that changed.
    pub range_id: RangeId,
    /// Security whose row changed.
    pub security: SecurityKey,
    /// Fields that received a new value.
    pub fields: Vec<String>,
}

/// A live range finished flushing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refreshed {
    /// Range that was flushed.
    pub range_id: RangeId,
    /// When the write completed.
    pub completed_at: DateTime<Utc>,
}

/// Every signal the engine exposes.
#[derive(Debug)]
pub struct EngineSignals {
    /// The feed session was established.
    pub connected: Signal<()>,
    /// The feed session was lost.
    pub disconnected: Signal<()>,
    /// A recoverable error occurred.
    pub error: Signal<EngineError>,
    /// Cells of a live range changed.
    pub live_data_update: Signal<LiveDataUpdate>,
    /// A live range was flushed to the renderer.
    pub refreshed: Signal<Refreshed>,
}

impl Default for EngineSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineSignals {
    /// Create a set of signals with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: Signal::new("connected"),
            disconnected: Signal::new("disconnected"),
            error: Signal::new("error"),
            live_data_update: Signal::new("liveDataUpdate"),
            refreshed: Signal::new("refreshed"),
        }
    }

    /// Drop every observer of every signal.
    pub fn disconnect_all(&self) {
        self.connected.disconnect_all();
        self.disconnected.disconnect_all();
        self.error.disconnect_all();
        self.live_data_update.disconnect_all();
        self.refreshed.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn emit_reaches_every_observer_in_order() {
        let signal = Signal::<u32>::new("test");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        signal.connect(move |v| first.lock().push(("first", *v)));
        let second = Arc::clone(&seen);
        signal.connect(move |v| second.lock().push(("second", *v)));

        signal.emit(&7);

        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let signal = Signal::<()>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = signal.connect(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&());
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let signal = Signal::<()>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        signal.connect(|()| panic!("observer failure"));
        let counter = Arc::clone(&calls);
        signal.connect(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_may_connect_during_emit() {
        let signal = Arc::new(Signal::<()>::new("test"));
        let inner = Arc::clone(&signal);
        signal.connect(move |()| {
            inner.connect(|()| {});
        });

        signal.emit(&());

        assert_eq!(signal.observer_count(), 2);
    }

    #[test]
    fn engine_signals_start_empty() {
        let signals = EngineSignals::new();
        assert_eq!(signals.error.observer_count(), 0);
        assert_eq!(signals.live_data_update.name(), "liveDataUpdate");
    }
}
