//! Market Data Event Types
//!
//! The canonical event shape carried through the ingestion pipeline, plus the
//! envelope that records where an event came from and which stages it has
//! passed through.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "symbol": "AAPL",
//!   "price": 150.25,
//!   "volume": 1000,
//!   "timestamp": "2024-03-15T14:30:00.123456Z",
//!   "exchange": "NASDAQ",
//!   "source": "TEST",
//!   "bid": 150.20,
//!   "ask": 150.30,
//!   "messageType": "MARKET_DATA",
//!   "sequenceNumber": 1
//! }
//! ```
//!
//! Decimals are exact JSON numbers. Absent optional fields are omitted on
//! output.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default message type for price ticks.
pub const MARKET_DATA: &str = "MARKET_DATA";

/// Message type for trade executions.
pub const TRADE: &str = "TRADE";

/// Source tag applied when an event arrives without one.
pub const DEFAULT_SOURCE: &str = "PROCESSED";

// =============================================================================
// Market Data Event
// =============================================================================

/// A single price tick or trade observation for an instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataEvent {
    /// Instrument ticker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,

    /// Last price.
    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<Decimal>,

    /// Traded volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,

    /// Observation instant (microsecond precision on the wire).
    #[serde(
        default,
        with = "timestamp_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    /// Listing exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    /// Producer tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Best bid.
    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub bid: Option<Decimal>,

    /// Best ask.
    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ask: Option<Decimal>,

    /// Session high (passthrough).
    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub high: Option<Decimal>,

    /// Session low (passthrough).
    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub low: Option<Decimal>,

    /// Session open (passthrough).
    #[serde(
        default,
        with = "rust_decimal::serde::arbitrary_precision_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub open: Option<Decimal>,

    /// Route key: `MARKET_DATA`, `TRADE`, or anything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    /// Producer sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,

    /// Opaque portfolio reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,

    /// Opaque trader reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trader_id: Option<String>,
}

impl MarketDataEvent {
    /// Create an event with only a symbol and price.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: Some(symbol.into()),
            price: Some(price),
            ..Self::default()
        }
    }

    /// The canonical sample tick emitted by the simulator.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            symbol: Some("AAPL".to_string()),
            price: Some(Decimal::new(15025, 2)),
            volume: Some(1000),
            timestamp: Some(Utc::now()),
            exchange: Some("NASDAQ".to_string()),
            source: Some("TEST".to_string()),
            bid: Some(Decimal::new(15020, 2)),
            ask: Some(Decimal::new(15030, 2)),
            message_type: Some(MARKET_DATA.to_string()),
            sequence_number: Some(1),
            ..Self::default()
        }
    }

    /// Set the volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: i64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set both sides of the quote.
    #[must_use]
    pub const fn with_quote(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Set the message type.
    #[must_use]
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Set the observation timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Ask minus bid, when both sides are known.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Symbol or an empty string, for log fields and metric labels.
    #[must_use]
    pub fn symbol_or_empty(&self) -> &str {
        self.symbol.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Where an event entered the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressSource {
    /// Leader-gated sample generator.
    Simulator,
    /// HTTP submission endpoint.
    Http,
    /// Consumer-group stream delivery, named by stream.
    Stream(String),
}

impl IngressSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Simulator => "SIMULATOR",
            Self::Http => "HTTP",
            Self::Stream(name) => name,
        }
    }
}

/// Non-fatal observation raised during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// Volume above the sanity threshold.
    UnusualVolume {
        /// Reported volume.
        volume: i64,
    },
}

/// One event in flight through the pipeline, with its processing headers.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The event being processed.
    pub event: MarketDataEvent,
    /// Ingress boundary the event arrived through.
    pub source: IngressSource,
    /// When the gateway accepted the event.
    pub received_at: DateTime<Utc>,
    /// Set by the validator.
    pub validated_at: Option<DateTime<Utc>>,
    /// Set by the enricher.
    pub enriched_at: Option<DateTime<Utc>>,
    /// Non-fatal validation findings.
    pub warnings: Vec<ValidationWarning>,
}

impl Envelope {
    /// Wrap an event arriving through `source`.
    #[must_use]
    pub fn new(event: MarketDataEvent, source: IngressSource) -> Self {
        Self {
            event,
            source,
            received_at: Utc::now(),
            validated_at: None,
            enriched_at: None,
            warnings: Vec::new(),
        }
    }

    /// Whether the validator has accepted this event.
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        self.validated_at.is_some()
    }

    /// Whether the enricher has completed this event.
    #[must_use]
    pub const fn is_enriched(&self) -> bool {
        self.enriched_at.is_some()
    }
}

// =============================================================================
// Timestamp Wire Format
// =============================================================================

/// `yyyy-MM-ddTHH:mm:ss.SSSSSSZ` in UTC. RFC 3339 input is also accepted.
mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };

        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, FORMAT) {
            return Ok(Some(naive.and_utc()));
        }

        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn deserializes_minimal_submission() {
        let json = r#"{"symbol":"AAPL","price":150.25,"volume":1000}"#;
        let event: MarketDataEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.symbol.as_deref(), Some("AAPL"));
        assert_eq!(event.price, Some(dec!(150.25)));
        assert_eq!(event.volume, Some(1000));
        assert!(event.timestamp.is_none());
        assert!(event.bid.is_none());
        assert!(event.message_type.is_none());
    }

    #[test]
    fn camel_case_keys() {
        let json = r#"{"symbol":"JPM","price":10,"messageType":"TRADE","sequenceNumber":7,"portfolioId":"p-1","traderId":"t-9"}"#;
        let event: MarketDataEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.message_type.as_deref(), Some("TRADE"));
        assert_eq!(event.sequence_number, Some(7));
        assert_eq!(event.portfolio_id.as_deref(), Some("p-1"));
        assert_eq!(event.trader_id.as_deref(), Some("t-9"));
    }

    #[test]
    fn timestamp_uses_microsecond_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap();
        let event = MarketDataEvent::new("AAPL", dec!(1)).with_timestamp(ts);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["timestamp"], "2024-03-15T14:30:00.000000Z");

        let back: MarketDataEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.timestamp, Some(ts));
    }

    #[test]
    fn timestamp_accepts_rfc3339() {
        let json = r#"{"symbol":"AAPL","price":1,"timestamp":"2024-03-15T14:30:00+00:00"}"#;
        let event: MarketDataEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let json = r#"{"symbol":"AAPL","price":1,"timestamp":"yesterday"}"#;
        assert!(serde_json::from_str::<MarketDataEvent>(json).is_err());
    }

    #[test]
    fn decimals_serialize_as_numbers() {
        let event = MarketDataEvent::new("AAPL", dec!(150.25)).with_quote(dec!(150.20), dec!(150.30));
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""price":150.25"#), "{json}");
        assert!(json.contains(r#""bid":150.20"#), "{json}");
        assert!(!json.contains("volume"), "absent fields are omitted: {json}");
    }

    #[test]
    fn sample_matches_canonical_tick() {
        let sample = MarketDataEvent::sample();
        assert_eq!(sample.symbol.as_deref(), Some("AAPL"));
        assert_eq!(sample.price, Some(dec!(150.25)));
        assert_eq!(sample.spread(), Some(dec!(0.10)));
        assert_eq!(sample.message_type.as_deref(), Some(MARKET_DATA));
        assert_eq!(sample.sequence_number, Some(1));
    }

    #[test]
    fn ingress_source_labels() {
        assert_eq!(IngressSource::Simulator.as_str(), "SIMULATOR");
        assert_eq!(IngressSource::Http.as_str(), "HTTP");
        assert_eq!(
            IngressSource::Stream("market-prices-stream".to_string()).as_str(),
            "market-prices-stream"
        );
    }

    #[test]
    fn envelope_starts_unmarked() {
        let envelope = Envelope::new(MarketDataEvent::sample(), IngressSource::Http);
        assert!(!envelope.is_validated());
        assert!(!envelope.is_enriched());
        assert!(envelope.warnings.is_empty());
    }
}
