//! Transport Port (Driven Port)
//!
//! Interface for opening a bidirectional text session with the market data
//! feed. Adapters deal with framing and TLS; the connection manager only sees
//! text in and text out.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Sink;
use futures::stream::BoxStream;

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The session could not be opened.
    #[error("transport connect failed: {0}")]
    Connect(String),

    /// Protocol-level failure on an open session.
    #[error("transport protocol error: {0}")]
    Protocol(String),

    /// Writing an outbound frame failed.
    #[error("transport send failed: {0}")]
    Send(String),

    /// Peer closed the session.
    #[error("transport closed by peer")]
    Closed,

    /// No inbound traffic within the idle timeout.
    #[error("no inbound traffic for {0:?}")]
    IdleTimeout(Duration),

    /// Inbound frame was not valid UTF-8.
    #[error("inbound frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Outbound half of a session.
pub type OutboundSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a session. The stream ends when the peer goes away.
pub type InboundStream = BoxStream<'static, Result<String, TransportError>>;

/// An open session with the feed.
pub struct TransportSession {
    /// Outbound text frames.
    pub outbound: OutboundSink,
    /// Inbound text frames.
    pub inbound: InboundStream,
}

impl TransportSession {
    /// Bundle the two halves of a session.
    #[must_use]
    pub fn new(outbound: OutboundSink, inbound: InboundStream) -> Self {
        Self { outbound, inbound }
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession").finish_non_exhaustive()
    }
}

/// Port for opening sessions with the feed.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session. Each call yields an independent session.
    async fn connect(&self) -> Result<TransportSession, TransportError>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}
