//! Control Channel Port (Driven Port)
//!
//! Outbound subscription control messages and the interface used to send
//! them over the live connection.

use serde::Serialize;

use crate::domain::streaming::SecurityKey;
use crate::domain::subscription::SubscriptionId;

/// Outbound control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Start streaming `fields` for `securities` under `id`.
    Subscribe {
        /// Subscription id.
        id: SubscriptionId,
        /// Requested securities.
        securities: Vec<SecurityKey>,
        /// Requested fields.
        fields: Vec<String>,
    },
    /// Stop streaming for `id`.
    Unsubscribe {
        /// Subscription id.
        id: SubscriptionId,
    },
}

impl ControlMessage {
    /// Subscription the message refers to.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        match self {
            Self::Subscribe { id, .. } | Self::Unsubscribe { id } => *id,
        }
    }

    /// Message type name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The connection is not in the `Connected` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not connected to the market data feed")]
pub struct NotConnectedError;

/// Error sending a control message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No live session.
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),

    /// The message could not be serialized.
    #[error("failed to encode control message: {0}")]
    Encode(String),
}

/// Port for sending control messages over the live connection.
#[cfg_attr(test, mockall::automock)]
pub trait ControlChannel: Send + Sync {
    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;

    /// Queue a control message for the live session.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] unless a session is established.
    fn send(&self, message: ControlMessage) -> Result<(), SendError>;
}
