//! Prometheus Metrics Module
//!
//! Exposes engine metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound frames, dispatched ticks, malformed frames
//! - **Connection**: Feed connection state, reconnects, transport errors
//! - **Subscriptions**: Active subscriptions and live ranges
//! - **Flushes**: Flush outcomes and durations
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so
//! tests never need to initialize anything.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "market_sync_messages_received_total",
        "Total frames received from the market data feed"
    );
    describe_counter!(
        "market_sync_ticks_dispatched_total",
        "Total ticks dispatched to subscriptions and live ranges"
    );
    describe_counter!(
        "market_sync_malformed_messages_total",
        "Total inbound frames dropped as malformed"
    );
    describe_counter!(
        "market_sync_callback_failures_total",
        "Total subscription callbacks that failed or panicked"
    );

    // Connection
    describe_gauge!(
        "market_sync_connection_state",
        "Feed connection state (0=disconnected, 1=connecting, 2=connected, 3=closing)"
    );
    describe_counter!(
        "market_sync_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_counter!(
        "market_sync_transport_errors_total",
        "Total feed transport errors by type"
    );

    // Subscription gauges
    describe_gauge!(
        "market_sync_subscriptions",
        "Number of active subscriptions"
    );
    describe_gauge!("market_sync_live_ranges", "Number of active live ranges");

    // Flushes
    describe_counter!(
        "market_sync_flushes_total",
        "Total live range flushes by outcome"
    );
    describe_histogram!(
        "market_sync_flush_duration_seconds",
        "Time to snapshot and render a live range"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Renderer accepted the snapshot.
    Success,
    /// Renderer failed.
    Failure,
}

impl FlushOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Closing => 3.0,
    }
}

/// Record a frame received from the feed.
pub fn record_message_received() {
    counter!("market_sync_messages_received_total").increment(1);
}

/// Record a tick dispatched.
pub fn record_tick_dispatched(matched_subscriptions: usize) {
    counter!(
        "market_sync_ticks_dispatched_total",
        "matched" => if matched_subscriptions > 0 { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a malformed inbound frame.
pub fn record_malformed_message() {
    counter!("market_sync_malformed_messages_total").increment(1);
}

/// Record a failed or panicking callback.
pub fn record_callback_failure() {
    counter!("market_sync_callback_failures_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_sync_connection_state").set(state_value(state));
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("market_sync_reconnects_total").increment(1);
}

/// Record a transport error.
pub fn record_transport_error(error_type: &'static str) {
    counter!(
        "market_sync_transport_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("market_sync_subscriptions").set(count as f64);
}

/// Update the active live range count.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_ranges(count: usize) {
    gauge!("market_sync_live_ranges").set(count as f64);
}

/// Record a completed flush.
pub fn record_flush(outcome: FlushOutcome, duration: Duration) {
    counter!(
        "market_sync_flushes_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("market_sync_flush_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_outcome_as_str() {
        assert_eq!(FlushOutcome::Success.as_str(), "success");
        assert_eq!(FlushOutcome::Failure.as_str(), "failure");
    }

    #[test]
    fn connection_state_values_are_distinct() {
        let values = [
            state_value(ConnectionState::Disconnected),
            state_value(ConnectionState::Connecting),
            state_value(ConnectionState::Connected),
            state_value(ConnectionState::Closing),
        ];
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received();
        record_flush(FlushOutcome::Success, Duration::from_millis(3));
        set_subscriptions(2);
    }
}
