//! Tick Types
//!
//! A tick is one inbound market data update for a single security. It
//! carries an open set of named fields; different messages carry different
//! subsets, so consumers must treat every field as optional.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::security::SecurityKey;

/// Well-known numeric fields carried by `marketData` messages.
pub const STANDARD_FIELDS: &[&str] = &[
    "last",
    "volume",
    "bid",
    "ask",
    "open",
    "high",
    "low",
    "close",
    "change",
    "changePercent",
];

/// Value of a single tick field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric value (prices, sizes, percentages).
    Number(Decimal),
    /// Free-form text value.
    Text(String),
}

impl FieldValue {
    /// Numeric value, if this is a number.
    #[must_use]
    pub const fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Text value, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One market data update for a single security.
///
/// Immutable once built. The dispatcher wraps ticks in `Arc` so every
/// consumer shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tick {
    security: SecurityKey,
    timestamp: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
}

impl Tick {
    /// Create a tick from its parts.
    #[must_use]
    pub const fn new(
        security: SecurityKey,
        timestamp: DateTime<Utc>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            security,
            timestamp,
            fields,
        }
    }

    /// Start building a tick for `security` stamped with `timestamp`.
    #[must_use]
    pub const fn builder(security: SecurityKey, timestamp: DateTime<Utc>) -> TickBuilder {
        TickBuilder {
            security,
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// The security this tick is for.
    #[must_use]
    pub const fn security(&self) -> &SecurityKey {
        &self.security
    }

    /// Exchange timestamp of the update.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All fields carried by this tick, ordered by name.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Whether the tick carries no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Incremental builder for [`Tick`], mostly for tests and demos.
#[derive(Debug)]
pub struct TickBuilder {
    security: SecurityKey,
    timestamp: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
}

impl TickBuilder {
    /// Add a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Finish the tick.
    #[must_use]
    pub fn build(self) -> Tick {
        Tick::new(self.security, self.timestamp, self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aapl() -> SecurityKey {
        SecurityKey::new("AAPL", "NASDAQ")
    }

    #[test]
    fn builder_collects_fields() {
        let tick = Tick::builder(aapl(), Utc::now())
            .field("last", Decimal::new(15020, 2))
            .field("venue", "XNAS")
            .build();

        assert_eq!(
            tick.field("last").and_then(FieldValue::as_decimal),
            Some(Decimal::new(15020, 2))
        );
        assert_eq!(tick.field("venue").and_then(FieldValue::as_text), Some("XNAS"));
        assert!(tick.field("bid").is_none());
        assert!(!tick.is_empty());
    }

    #[test]
    fn field_value_display() {
        assert_eq!(FieldValue::Number(Decimal::new(1502, 1)).to_string(), "150.2");
        assert_eq!(FieldValue::from("halted").to_string(), "halted");
    }

    #[test]
    fn field_value_serializes_untagged() {
        let number = serde_json::to_string(&FieldValue::Number(Decimal::new(15, 1))).unwrap();
        assert_eq!(number, "\"1.5\"");
        let text = serde_json::to_string(&FieldValue::from("x")).unwrap();
        assert_eq!(text, "\"x\"");
    }

    #[test]
    fn standard_fields_include_change_percent() {
        assert!(STANDARD_FIELDS.contains(&"changePercent"));
        assert_eq!(STANDARD_FIELDS.len(), 10);
    }
}
