//! Sync Engine
//!
//! Public facade over the connection manager, subscription registry,
//! dispatcher, materializer and flush scheduler. Adapters (transport, decoder,
//! renderer) are injected at construction.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► start() ──► ... ──► shutdown()
//!             │                     │
//!             ├─ connect feed       ├─ cancel flush timers
//!             └─ spawn dispatcher   ├─ close connection (ends dispatcher)
//!                                   └─ clear subscriptions and ranges
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::application::error::RangeError;
use crate::application::ports::{ControlChannel, FeedDecoder, Renderer, Transport};
use crate::application::services::connection::{ConnectionConfig, ConnectionManager};
use crate::application::services::dispatcher::Dispatcher;
use crate::application::services::flush_scheduler::{FlushResult, FlushScheduler};
use crate::application::services::materializer::Materializer;
use crate::application::services::registry::SubscriptionRegistry;
use crate::application::signal::EngineSignals;
use crate::domain::live_range::{RangeId, Snapshot};
use crate::domain::streaming::{ConnectionState, SecurityKey, Tick};
use crate::domain::subscription::{CallbackError, SubscriptionId, TickCallback};

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Feed connection behavior.
    pub connection: ConnectionConfig,
    /// Period for live ranges created without one.
    pub default_refresh: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            default_refresh: Duration::from_millis(5000),
        }
    }
}

/// Point-in-time engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Feed connection state.
    pub connection_state: ConnectionState,
    /// Active subscriptions, including those backing live ranges.
    pub subscriptions: usize,
    /// Active live ranges.
    pub live_ranges: usize,
}

/// Real-time market data sync engine.
pub struct SyncEngine {
    config: EngineConfig,
    signals: Arc<EngineSignals>,
    connection: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    materializer: Arc<Materializer>,
    dispatcher: Arc<Dispatcher>,
    scheduler: FlushScheduler,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl SyncEngine {
    /// Wire an engine from its adapters. Nothing connects until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn FeedDecoder>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let signals = Arc::new(EngineSignals::new());
        let connection = Arc::new(ConnectionManager::new(
            transport,
            config.connection,
            Arc::clone(&signals),
        ));
        let channel = Arc::clone(&connection) as Arc<dyn ControlChannel>;
        let registry = Arc::new(SubscriptionRegistry::new(channel));
        let materializer = Arc::new(Materializer::new(
            Arc::clone(&registry),
            Arc::clone(&signals),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            decoder,
            Arc::clone(&registry),
            Arc::clone(&materializer),
            Arc::clone(&signals),
        ));
        let scheduler = FlushScheduler::new(
            Arc::clone(&materializer),
            renderer,
            Arc::clone(&signals),
        );

        let weak: Weak<SubscriptionRegistry> = Arc::downgrade(&registry);
        signals.connected.connect(move |()| {
            if let Some(registry) = weak.upgrade() {
                registry.restore_all();
            }
        });

        Self {
            config,
            signals,
            connection,
            registry,
            materializer,
            dispatcher,
            scheduler,
            dispatch_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Connect to the feed and start dispatching. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::warn!("Start requested after shutdown, ignoring");
            return;
        }

        if let Some(inbound) = self.connection.take_inbound() {
            let dispatcher = Arc::clone(&self.dispatcher);
            *self.dispatch_task.lock() =
                Some(tokio::spawn(async move { dispatcher.run(inbound).await }));
        }
        self.connection.connect();
    }

    /// Subscribe `callback` to ticks for `securities`.
    ///
    /// The feed is asked for `fields`; ticks are delivered whole.
    pub fn subscribe<F>(
        &self,
        securities: Vec<SecurityKey>,
        fields: Vec<String>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&Tick) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let callback: TickCallback = Arc::new(callback);
        self.registry.add(securities, fields, callback)
    }

    /// Remove a subscription. Returns `false` if it was not active.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.registry.remove(id) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Unsubscribe ignored");
                false
            }
        }
    }

    /// Create a live range and start its flush timer.
    ///
    /// `period` defaults to the configured refresh period.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError`] if the id is taken or the range is invalid.
    pub fn create_live_range(
        &self,
        id: impl Into<RangeId>,
        securities: Vec<SecurityKey>,
        fields: Vec<String>,
        period: Option<Duration>,
    ) -> Result<(), RangeError> {
        let id = id.into();
        let period = period.unwrap_or(self.config.default_refresh);

        self.materializer
            .create_range(id.clone(), securities, fields, period)?;
        self.scheduler.schedule(id, period);
        Ok(())
    }

    /// Close a live range and stop its timer.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::NotFound`] for an unknown id.
    pub fn close_live_range(&self, id: &RangeId) -> Result<(), RangeError> {
        self.scheduler.cancel(id);
        self.materializer.close_range(id)
    }

    /// Current contents of a live range.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::NotFound`] for an unknown id.
    pub fn snapshot(&self, id: &RangeId) -> Result<Snapshot, RangeError> {
        self.materializer.snapshot(id)
    }

    /// Flush a live range now, without waiting for its timer.
    pub async fn refresh_live_range(&self, id: &RangeId) -> FlushResult {
        self.scheduler.flush_once(id).await
    }

    /// Engine signals.
    #[must_use]
    pub const fn signals(&self) -> &Arc<EngineSignals> {
        &self.signals
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            connection_state: self.connection.state(),
            subscriptions: self.registry.len(),
            live_ranges: self.materializer.len(),
        }
    }

    /// Stop everything. Idempotent and safe from any state.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down sync engine");

        self.scheduler.cancel_all().await;
        self.connection.close().await;

        let task = self.dispatch_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }

        let ranges = self.materializer.clear();
        let subscriptions = self.registry.clear();
        tracing::info!(subscriptions, ranges, "Sync engine stopped");
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
