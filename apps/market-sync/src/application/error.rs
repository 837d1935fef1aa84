//! Application Errors
//!
//! Error types raised by the application services, and [`EngineError`], the
//! aggregate carried by the engine's `error` signal.

use crate::application::ports::{
    MalformedMessageError, NotConnectedError, RenderWriteError, SendError, TransportError,
};
use crate::domain::live_range::RangeId;
use crate::domain::subscription::{CallbackError, SubscriptionId};

/// No subscription with the given id exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("subscription {0} not found")]
pub struct SubscriptionNotFoundError(pub SubscriptionId);

/// Live range lifecycle error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// A range with this id already exists.
    #[error("live range '{0}' already exists")]
    AlreadyExists(RangeId),

    /// No range with this id exists.
    #[error("live range '{0}' not found")]
    NotFound(RangeId),

    /// The range definition is unusable.
    #[error("live range '{id}' is invalid: {reason}")]
    Invalid {
        /// Offending range.
        id: RangeId,
        /// What is wrong with it.
        reason: String,
    },
}

/// Any error surfaced on the engine's `error` signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The feed connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound message was dropped.
    #[error(transparent)]
    Malformed(#[from] MalformedMessageError),

    /// A control message could not be sent.
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),

    /// A control message could not be sent.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Removing an unknown subscription.
    #[error(transparent)]
    SubscriptionNotFound(#[from] SubscriptionNotFoundError),

    /// A snapshot could not be written.
    #[error(transparent)]
    Render(#[from] RenderWriteError),

    /// A subscription callback failed or panicked.
    #[error("callback for subscription {subscription} failed: {source}")]
    Callback {
        /// Subscription whose callback failed.
        subscription: SubscriptionId,
        /// The failure.
        source: CallbackError,
    },

    /// A live range operation failed.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// The feed reported an error.
    #[error("feed error{}: {message}", .code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Feed {
        /// Error code, when present.
        code: Option<String>,
        /// Error text.
        message: String,
    },
}

impl EngineError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::NotConnected(_) | Self::Send(_) => "send",
            Self::SubscriptionNotFound(_) => "subscription_not_found",
            Self::Render(_) => "render",
            Self::Callback { .. } => "callback",
            Self::Range(_) => "range",
            Self::Feed { .. } => "feed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_error_display_with_code() {
        let error = EngineError::Feed {
            code: Some("401".to_string()),
            message: "unauthorized".to_string(),
        };
        assert_eq!(error.to_string(), "feed error [401]: unauthorized");
    }

    #[test]
    fn feed_error_display_without_code() {
        let error = EngineError::Feed {
            code: None,
            message: "overloaded".to_string(),
        };
        assert_eq!(error.to_string(), "feed error: overloaded");
    }

    #[test]
    fn conversions_preserve_kind() {
        assert_eq!(EngineError::from(TransportError::Closed).kind(), "transport");
        assert_eq!(
            EngineError::from(RangeError::NotFound(RangeId::new("x"))).kind(),
            "range"
        );
        assert_eq!(
            EngineError::from(MalformedMessageError::new("bad")).to_string(),
            "malformed message: bad"
        );
    }
}
