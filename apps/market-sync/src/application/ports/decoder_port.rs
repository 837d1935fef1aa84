//! Feed Decoder Port (Driven Port)
//!
//! Interface for turning raw inbound frames into feed messages.

use chrono::{DateTime, Utc};

use crate::domain::streaming::Tick;

/// Control messages the feed sends besides market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// A subscribe request was acknowledged.
    Subscribed,
    /// An unsubscribe request was acknowledged.
    Unsubscribed,
    /// Keep-alive.
    Heartbeat,
}

impl ControlKind {
    /// Wire name of the control message.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// A market data update.
    MarketData(Tick),
    /// A recognised control message.
    Control {
        /// Which control message.
        kind: ControlKind,
        /// Subscription id it refers to, when present.
        id: Option<u64>,
    },
    /// The feed reported an error.
    FeedError {
        /// Error code, when present.
        code: Option<String>,
        /// Error text.
        message: String,
    },
}

/// An inbound message could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed message: {reason}")]
pub struct MalformedMessageError {
    /// Why decoding failed.
    pub reason: String,
}

impl MalformedMessageError {
    /// Create an error with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Port for decoding inbound frames.
#[cfg_attr(test, mockall::automock)]
pub trait FeedDecoder: Send + Sync {
    /// Decode one frame. `received_at` stamps ticks that carry no timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessageError`] if the frame is not a valid message.
    fn decode(
        &self,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<FeedMessage, MalformedMessageError>;
}
