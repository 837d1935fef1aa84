//! Security Identity
//!
//! A security is identified by its ticker and, optionally, the exchange it
//! trades on. Matching is ticker-only unless both sides name an exchange.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a security used for matching ticks to subscribers.
///
/// Both parts are normalized to upper case on construction, so `aapl` and
/// `AAPL` refer to the same security.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawSecurityKey")]
pub struct SecurityKey {
    ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exchange: Option<String>,
}

/// Wire shape of a security, normalized on conversion.
#[derive(Deserialize)]
struct RawSecurityKey {
    ticker: String,
    #[serde(default)]
    exchange: Option<String>,
}

impl From<RawSecurityKey> for SecurityKey {
    fn from(raw: RawSecurityKey) -> Self {
        Self::with_exchange(raw.ticker, raw.exchange)
    }
}

impl SecurityKey {
    /// Create a key with a ticker and exchange.
    #[must_use]
    pub fn new(ticker: impl AsRef<str>, exchange: impl AsRef<str>) -> Self {
        Self::with_exchange(ticker, Some(exchange.as_ref()))
    }

    /// Create a ticker-only key.
    #[must_use]
    pub fn ticker_only(ticker: impl AsRef<str>) -> Self {
        Self::with_exchange(ticker, None::<&str>)
    }

    /// Create a key with an optional exchange. Blank exchanges count as absent.
    #[must_use]
    pub fn with_exchange(ticker: impl AsRef<str>, exchange: Option<impl AsRef<str>>) -> Self {
        let exchange = exchange
            .map(|e| e.as_ref().trim().to_uppercase())
            .filter(|e| !e.is_empty());

        Self {
            ticker: ticker.as_ref().trim().to_uppercase(),
            exchange,
        }
    }

    /// The ticker symbol.
    #[must_use]
    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// The exchange, if one was specified.
    #[must_use]
    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    /// Whether a tick for `other` is relevant to this key.
    ///
    /// Tickers must be equal. Exchanges are compared only when both keys
    /// carry one. The relation is symmetric but not transitive, which is why
    /// it is kept apart from `Eq`.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.ticker != other.ticker {
            return false;
        }

        match (&self.exchange, &other.exchange) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for SecurityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exchange {
            Some(exchange) => write!(f, "{}@{exchange}", self.ticker),
            None => f.write_str(&self.ticker),
        }
    }
}

/// Error parsing a `TICKER[@EXCHANGE]` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid security '{0}': expected TICKER or TICKER@EXCHANGE")]
pub struct ParseSecurityError(pub String);

impl FromStr for SecurityKey {
    type Err = ParseSecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (ticker, exchange) = match trimmed.split_once('@') {
            Some((ticker, exchange)) => (ticker, Some(exchange)),
            None => (trimmed, None),
        };

        if ticker.trim().is_empty() || exchange.is_some_and(|e| e.trim().is_empty()) {
            return Err(ParseSecurityError(s.to_string()));
        }

        Ok(Self::with_exchange(ticker, exchange))
    }
}
