//! Market Data Streaming Types
//!
//! Core domain types for the real-time feed: security identity, ticks and
//! the connection lifecycle. These types are codec-agnostic and represent the
//! canonical internal representation of market data.

mod security;
mod tick;

pub use security::{ParseSecurityError, SecurityKey};
pub use tick::{FieldValue, STANDARD_FIELDS, Tick, TickBuilder};

use serde::Serialize;

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session; a reconnect may be pending.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Session established; outbound sends are accepted.
    Connected,
    /// Shutting down; no further reconnects.
    Closing,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }

    /// Whether a session is being opened or is open.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
