//! Tick Dispatcher
//!
//! Drains the inbound message sequence on a single task. Each frame is
//! decoded, delivered to every matching subscription callback in id order,
//! and then forwarded to the materializer.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};

use crate::application::error::EngineError;
use crate::application::ports::{FeedDecoder, FeedMessage};
use crate::application::services::materializer::Materializer;
use crate::application::services::registry::SubscriptionRegistry;
use crate::application::signal::EngineSignals;
use crate::domain::streaming::Tick;
use crate::domain::subscription::CallbackError;
use crate::infrastructure::metrics;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A tick was delivered to `matched` subscriptions and the materializer.
    Tick {
        /// Number of subscriptions whose callback ran.
        matched: usize,
    },
    /// A control message was recognised and logged.
    Control,
    /// The feed reported an error.
    FeedError,
    /// The frame was malformed and dropped.
    Dropped,
}

/// Routes inbound frames to subscriptions and live ranges.
pub struct Dispatcher {
    decoder: Arc<dyn FeedDecoder>,
    registry: Arc<SubscriptionRegistry>,
    materializer: Arc<Materializer>,
    signals: Arc<EngineSignals>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        decoder: Arc<dyn FeedDecoder>,
        registry: Arc<SubscriptionRegistry>,
        materializer: Arc<Materializer>,
        signals: Arc<EngineSignals>,
    ) -> Self {
        Self {
            decoder,
            registry,
            materializer,
            signals,
        }
    }

    /// Drain `inbound` until it ends.
    pub async fn run<S>(&self, inbound: S)
    where
        S: Stream<Item = String> + Send,
    {
        tokio::pin!(inbound);
        let mut processed: u64 = 0;

        while let Some(raw) = inbound.next().await {
            self.on_message(&raw);
            processed += 1;
        }

        tracing::info!(processed, "Inbound stream ended, dispatcher stopping");
    }

    /// Handle one raw inbound frame.
    pub fn on_message(&self, raw: &str) -> DispatchOutcome {
        metrics::record_message_received();

        match self.decoder.decode(raw, Utc::now()) {
            Ok(FeedMessage::MarketData(tick)) => {
                let matched = self.dispatch(&Arc::new(tick));
                DispatchOutcome::Tick { matched }
            }
            Ok(FeedMessage::Control { kind, id }) => {
                tracing::debug!(message_type = kind.as_str(), subscription_id = ?id, "Control message");
                DispatchOutcome::Control
            }
            Ok(FeedMessage::FeedError { code, message }) => {
                tracing::warn!(code = ?code, message = %message, "Feed reported an error");
                self.signals.error.emit(&EngineError::Feed { code, message });
                DispatchOutcome::FeedError
            }
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "Dropping malformed message");
                metrics::record_malformed_message();
                self.signals.error.emit(&e.into());
                DispatchOutcome::Dropped
            }
        }
    }

    /// Deliver a tick to matching callbacks, then to the materializer.
    pub fn dispatch(&self, tick: &Arc<Tick>) -> usize {
        let subscriptions = self.registry.matching(tick.security());

        for subscription in &subscriptions {
            let result = catch_unwind(AssertUnwindSafe(|| subscription.deliver(tick)))
                .unwrap_or_else(|panic| Err(CallbackError(panic_message(panic.as_ref()))));

            if let Err(source) = result {
                tracing::warn!(
                    subscription_id = %subscription.id(),
                    security = %tick.security(),
                    error = %source,
                    "Subscription callback failed"
                );
                metrics::record_callback_failure();
                self.signals.error.emit(&EngineError::Callback {
                    subscription: subscription.id(),
                    source,
                });
            }
        }

        self.materializer.apply_tick(tick);
        metrics::record_tick_dispatched(subscriptions.len());
        subscriptions.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(|| "callback panicked".to_string(), |m| format!("callback panicked: {m}"))
}
