//! Feed Codec Module
//!
//! Decodes the feed's JSON text frames. Every frame is a single object with a
//! `type` discriminator:
//!
//! - `marketData`: a tick for one security
//! - `subscribed` / `unsubscribed` / `heartbeat`: control acknowledgements
//! - `error`: an error reported by the feed
//!
//! # Market Data Format
//!
//! ```json
//! {"type":"marketData","security":{"ticker":"AAPL","exchange":"NASDAQ"},
//!  "timestamp":"2024-01-15T14:30:00Z","last":150.2,"volume":1200}
//! ```
//!
//! Every top-level member other than `type`, `security` and `timestamp` that
//! holds a number or a string becomes a tick field.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};

use crate::application::ports::{ControlKind, FeedDecoder, FeedMessage, MalformedMessageError};
use crate::domain::streaming::{FieldValue, SecurityKey, Tick};

/// Members of a `marketData` object that are not tick fields.
const RESERVED_MEMBERS: &[&str] = &["type", "security", "timestamp"];

/// JSON decoder for the market data feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFeedCodec;

impl JsonFeedCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn decode_market_data(
        object: &Map<String, Value>,
        received_at: DateTime<Utc>,
    ) -> Result<Tick, MalformedMessageError> {
        let security = decode_security(object.get("security"))?;
        let timestamp = decode_timestamp(object.get("timestamp"), received_at)?;

        let mut fields = BTreeMap::new();
        for (name, value) in object {
            if RESERVED_MEMBERS.contains(&name.as_str()) {
                continue;
            }

            let field = match value {
                Value::Number(n) => match decode_number(name, n) {
                    Some(number) => FieldValue::Number(number),
                    None => continue,
                },
                Value::String(s) => FieldValue::Text(s.clone()),
                // Nulls and nested values carry no cell data
                _ => continue,
            };
            fields.insert(name.clone(), field);
        }

        Ok(Tick::new(security, timestamp, fields))
    }
}

impl FeedDecoder for JsonFeedCodec {
    fn decode(
        &self,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<FeedMessage, MalformedMessageError> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| MalformedMessageError::new(format!("invalid JSON: {e}")))?;

        let Value::Object(object) = value else {
            return Err(MalformedMessageError::new("expected a JSON object"));
        };

        let message_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MalformedMessageError::new("missing 'type'"))?;

        match message_type {
            "marketData" => Ok(FeedMessage::MarketData(Self::decode_market_data(
                &object,
                received_at,
            )?)),
            "subscribed" => Ok(control(ControlKind::Subscribed, &object)),
            "unsubscribed" => Ok(control(ControlKind::Unsubscribed, &object)),
            "heartbeat" => Ok(control(ControlKind::Heartbeat, &object)),
            "error" => Ok(FeedMessage::FeedError {
                code: object.get("code").and_then(scalar_to_string),
                message: object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified feed error")
                    .to_string(),
            }),
            other => Err(MalformedMessageError::new(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

fn control(kind: ControlKind, object: &Map<String, Value>) -> FeedMessage {
    FeedMessage::Control {
        kind,
        id: object.get("id").and_then(Value::as_u64),
    }
}

fn decode_security(value: Option<&Value>) -> Result<SecurityKey, MalformedMessageError> {
    let value = value.ok_or_else(|| MalformedMessageError::new("missing 'security'"))?;
    let security: SecurityKey = serde_json::from_value(value.clone())
        .map_err(|e| MalformedMessageError::new(format!("invalid 'security': {e}")))?;

    if security.ticker().is_empty() {
        return Err(MalformedMessageError::new("empty ticker"));
    }
    Ok(security)
}

fn decode_timestamp(
    value: Option<&Value>,
    received_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, MalformedMessageError> {
    match value {
        None | Some(Value::Null) => Ok(received_at),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| MalformedMessageError::new(format!("invalid 'timestamp' '{s}': {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| MalformedMessageError::new(format!("invalid epoch 'timestamp' {n}"))),
        Some(other) => Err(MalformedMessageError::new(format!(
            "invalid 'timestamp': {other}"
        ))),
    }
}

/// Numbers outside the decimal range drop only their own field.
fn decode_number(name: &str, number: &Number) -> Option<Decimal> {
    let text = number.to_string();
    match Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(field = name, value = %text, error = %e, "Skipping unrepresentable field");
            None
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn decode(raw: &str) -> Result<FeedMessage, MalformedMessageError> {
        JsonFeedCodec::new().decode(raw, received())
    }

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap()
    }

    fn tick(raw: &str) -> Tick {
        match decode(raw).unwrap() {
            FeedMessage::MarketData(tick) => tick,
            other => panic!("expected market data, got {other:?}"),
        }
    }

    #[test]
    fn decodes_full_market_data() {
        let tick = tick(
            r#"{"type":"marketData","security":{"ticker":"AAPL","exchange":"NASDAQ"},
                "timestamp":"2024-01-15T14:30:00Z","last":150.2,"volume":1200,"bid":150.1,
                "ask":150.3,"open":149.0,"high":151.0,"low":148.7,"close":149.5,
                "change":0.7,"changePercent":0.47}"#,
        );

        assert_eq!(tick.security(), &SecurityKey::new("AAPL", "NASDAQ"));
        assert_eq!(
            tick.timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
        );
        assert_eq!(
            tick.field("last").and_then(FieldValue::as_decimal),
            Some(Decimal::new(1502, 1))
        );
        assert_eq!(
            tick.field("volume").and_then(FieldValue::as_decimal),
            Some(Decimal::from(1200))
        );
        for name in crate::domain::streaming::STANDARD_FIELDS {
            assert!(tick.field(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn partial_tick_keeps_only_present_fields() {
        let tick = tick(r#"{"type":"marketData","security":{"ticker":"MSFT"},"bid":400.5}"#);

        assert_eq!(tick.fields().len(), 1);
        assert!(tick.field("last").is_none());
        assert_eq!(tick.security().exchange(), None);
    }

    #[test]
    fn missing_timestamp_uses_receive_time() {
        let tick = tick(r#"{"type":"marketData","security":{"ticker":"AAPL"},"last":1}"#);
        assert_eq!(tick.timestamp(), received());
    }

    #[test]
    fn epoch_millis_timestamp() {
        let tick = tick(
            r#"{"type":"marketData","security":{"ticker":"AAPL"},"timestamp":1705329000000}"#,
        );
        assert_eq!(
            tick.timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn extra_members_become_fields_and_nulls_are_ignored() {
        let tick = tick(
            r#"{"type":"marketData","security":{"ticker":"AAPL"},
                "vwap":150.05,"venue":"XNAS","bid":null,"flags":[1,2]}"#,
        );

        assert_eq!(
            tick.field("vwap").and_then(FieldValue::as_decimal),
            Some(Decimal::new(15005, 2))
        );
        assert_eq!(tick.field("venue").and_then(FieldValue::as_text), Some("XNAS"));
        assert!(tick.field("bid").is_none());
        assert!(tick.field("flags").is_none());
    }

    #[test]
    fn exponent_numbers_are_accepted() {
        let tick = tick(r#"{"type":"marketData","security":{"ticker":"AAPL"},"volume":1.5e3}"#);
        assert_eq!(
            tick.field("volume").and_then(FieldValue::as_decimal),
            Some(Decimal::from(1500))
        );
    }

    #[test]
    fn out_of_range_number_skips_only_that_field() {
        let tick = tick(
            r#"{"type":"marketData","security":{"ticker":"AAPL"},"last":1e40,"bid":150.1}"#,
        );

        assert!(tick.field("last").is_none());
        assert_eq!(
            tick.field("bid").and_then(FieldValue::as_decimal),
            Some(Decimal::new(1501, 1))
        );
    }

    #[test_case("not json" ; "invalid json")]
    #[test_case("[1,2,3]" ; "array payload")]
    #[test_case("42" ; "scalar payload")]
    #[test_case(r#"{"security":{"ticker":"AAPL"}}"# ; "missing type")]
    #[test_case(r#"{"type":7}"# ; "non string type")]
    #[test_case(r#"{"type":"marketData","last":1}"# ; "missing security")]
    #[test_case(r#"{"type":"marketData","security":"AAPL"}"# ; "security not an object")]
    #[test_case(r#"{"type":"marketData","security":{"exchange":"NYSE"}}"# ; "security without ticker")]
    #[test_case(r#"{"type":"marketData","security":{"ticker":"  "}}"# ; "blank ticker")]
    #[test_case(r#"{"type":"marketData","security":{"ticker":"AAPL"},"timestamp":"yesterday"}"# ; "bad timestamp")]
    #[test_case(r#"{"type":"marketData","security":{"ticker":"AAPL"},"timestamp":true}"# ; "boolean timestamp")]
    #[test_case(r#"{"type":"quote"}"# ; "unknown type")]
    fn rejects_malformed(raw: &str) {
        assert!(decode(raw).is_err());
    }

    #[test_case(r#"{"type":"subscribed","id":7}"#, ControlKind::Subscribed, Some(7) ; "subscribed")]
    #[test_case(r#"{"type":"unsubscribed","id":7}"#, ControlKind::Unsubscribed, Some(7) ; "unsubscribed")]
    #[test_case(r#"{"type":"heartbeat"}"#, ControlKind::Heartbeat, None ; "heartbeat")]
    fn recognises_control_messages(raw: &str, kind: ControlKind, id: Option<u64>) {
        assert_eq!(decode(raw).unwrap(), FeedMessage::Control { kind, id });
    }

    #[test]
    fn decodes_feed_error() {
        assert_eq!(
            decode(r#"{"type":"error","code":429,"message":"too many subscriptions"}"#).unwrap(),
            FeedMessage::FeedError {
                code: Some("429".to_string()),
                message: "too many subscriptions".to_string(),
            }
        );
    }

    #[test]
    fn feed_error_without_message() {
        assert!(matches!(
            decode(r#"{"type":"error"}"#).unwrap(),
            FeedMessage::FeedError { code: None, .. }
        ));
    }
}
