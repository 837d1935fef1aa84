//! Connection Manager
//!
//! Owns the single streaming session with the market data feed. A supervisor
//! task opens the session, pumps frames in both directions, and on failure
//! waits a fixed delay before opening a new one. Inbound frames from every
//! session are merged into one sequence that ends only after [`close`].
//!
//! [`close`]: ConnectionManager::close

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ControlChannel, ControlMessage, NotConnectedError, SendError, Transport, TransportError,
    TransportSession,
};
use crate::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::signal::EngineSignals;
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Connection manager configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Treat a session with no inbound frames for this long as failed.
    pub idle_timeout: Option<Duration>,
}

/// How a session ended.
enum SessionEnd {
    /// `close()` was called.
    Cancelled,
    /// The session failed.
    Failed(TransportError),
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Manages the feed connection lifecycle.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    signals: Arc<EngineSignals>,
    state: RwLock<ConnectionState>,
    /// Queue into the live session's writer; `None` unless connected.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Producer side of the inbound sequence; dropped by `close()`.
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager. Nothing happens until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        signals: Arc<EngineSignals>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            config,
            signals,
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            supervisor: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Take the inbound message sequence. Only the first call returns it.
    pub fn take_inbound(&self) -> Option<UnboundedReceiverStream<String>> {
        self.inbound_rx.lock().take().map(UnboundedReceiverStream::new)
    }

    /// Start the supervisor task.
    ///
    /// No-op while a session is being opened, is open, or is waiting to
    /// reconnect, and after [`close`](Self::close).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            tracing::info!("Connect requested after close, ignoring");
            return;
        }

        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!(state = %self.state(), "Connection already managed");
            return;
        }

        self.transition(ConnectionState::Connecting);
        let this = Arc::clone(self);
        *supervisor = Some(tokio::spawn(async move { this.supervise().await }));
    }

    /// Shut the connection down for good.
    ///
    /// Tears down the session, suppresses any pending reconnect and ends the
    /// inbound sequence. Idempotent.
    pub async fn close(&self) {
        let first_close = !self.cancel.is_cancelled();
        *self.state.write() = ConnectionState::Closing;
        metrics::set_connection_state(ConnectionState::Closing);
        self.cancel.cancel();

        let task = self.supervisor.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Connection supervisor ended abnormally");
            }
        }

        self.outbound.lock().take();
        self.inbound_tx.lock().take();
        *self.state.write() = ConnectionState::Disconnected;
        metrics::set_connection_state(ConnectionState::Disconnected);

        if first_close {
            tracing::info!(endpoint = %self.transport.endpoint(), "Connection closed");
        }
    }

    /// Move to `next` unless the manager is closing.
    fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closing {
                return false;
            }
            *state = next;
        }
        metrics::set_connection_state(next);
        true
    }

    /// Connection loop: open, pump, wait, repeat until cancelled.
    async fn supervise(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);

        loop {
            if !self.transition(ConnectionState::Connecting) {
                return;
            }
            tracing::info!(endpoint = %self.transport.endpoint(), "Connecting to market data feed");

            let opened = tokio::select! {
                () = self.cancel.cancelled() => return,
                opened = self.transport.connect() => opened,
            };

            let (error, was_connected) = match opened {
                Ok(session) => {
                    policy.reset();
                    match self.run_session(session).await {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Failed(error) => (error, true),
                    }
                }
                Err(error) => (error, false),
            };

            if !self.transition(ConnectionState::Disconnected) {
                return;
            }
            metrics::record_transport_error(error_type(&error));
            tracing::warn!(error = %error, "Market data feed connection lost");

            if was_connected {
                self.signals.disconnected.emit(&());
            }
            self.signals.error.emit(&error.into());

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Maximum reconnection attempts exceeded, giving up"
                );
                return;
            };

            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to market data feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Cancelled during reconnect delay");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump one established session until it fails or is cancelled.
    async fn run_session(&self, session: TransportSession) -> SessionEnd {
        let TransportSession {
            mut outbound,
            mut inbound,
        } = session;

        let Some(inbound_tx) = self.inbound_tx.lock().clone() else {
            return SessionEnd::Cancelled;
        };
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(queue_tx);

        if !self.transition(ConnectionState::Connected) {
            self.outbound.lock().take();
            return SessionEnd::Cancelled;
        }
        tracing::info!(endpoint = %self.transport.endpoint(), "Connected to market data feed");
        self.signals.connected.emit(&());

        let idle_timeout = self.config.idle_timeout;
        let end = loop {
            let next_frame = async {
                match idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, inbound.next())
                        .await
                        .map_err(|_| TransportError::IdleTimeout(limit)),
                    None => Ok(inbound.next().await),
                }
            };

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break SessionEnd::Cancelled,
                Some(text) = queue_rx.recv() => {
                    if let Err(e) = outbound.send(text).await {
                        break SessionEnd::Failed(e);
                    }
                }
                frame = next_frame => match frame {
                    Ok(Some(Ok(text))) => {
                        // Receiver is gone only once the engine stopped draining
                        let _ = inbound_tx.send(text);
                    }
                    Ok(Some(Err(e))) | Err(e) => break SessionEnd::Failed(e),
                    Ok(None) => break SessionEnd::Failed(TransportError::Closed),
                },
            }
        };

        self.outbound.lock().take();
        if matches!(end, SessionEnd::Cancelled) {
            if let Err(e) = outbound.close().await {
                tracing::debug!(error = %e, "Error closing transport session");
            }
        }
        end
    }
}

impl ControlChannel for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn send(&self, message: ControlMessage) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(NotConnectedError.into());
        }

        let text = message
            .to_json()
            .map_err(|e| SendError::Encode(e.to_string()))?;

        let outbound = self.outbound.lock();
        let queue = outbound.as_ref().ok_or(NotConnectedError)?;
        queue.send(text).map_err(|_| NotConnectedError)?;

        tracing::debug!(
            subscription_id = %message.id(),
            message_type = message.kind(),
            "Control message queued"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.transport.endpoint())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

const fn error_type(error: &TransportError) -> &'static str {
    match error {
        TransportError::Connect(_) => "connect",
        TransportError::Protocol(_) => "protocol",
        TransportError::Send(_) => "send",
        TransportError::Closed => "closed",
        TransportError::IdleTimeout(_) => "idle_timeout",
        TransportError::InvalidUtf8 => "invalid_utf8",
    }
}
