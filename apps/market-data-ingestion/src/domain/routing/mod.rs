//! Content-Based Routing
//!
//! Every enriched event goes to exactly one output channel, chosen by its
//! `messageType`. Market data is further split into processing tiers by
//! price. Tiers shape downstream work only and never change the channel.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;

use super::event::{MARKET_DATA, MarketDataEvent, TRADE};

/// Prices strictly above this go to the high-value tier.
pub const HIGH_VALUE_THRESHOLD: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

// =============================================================================
// Channels and Tiers
// =============================================================================

/// Named output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputChannel {
    /// `market-data-output`
    #[serde(rename = "market-data-output")]
    MarketData,
    /// `trade-output`
    #[serde(rename = "trade-output")]
    Trade,
    /// `unknown-output`
    #[serde(rename = "unknown-output")]
    Unknown,
}

impl OutputChannel {
    /// All channels, in declaration order.
    pub const ALL: [Self; 3] = [Self::MarketData, Self::Trade, Self::Unknown];

    /// Channel name as used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market-data-output",
            Self::Trade => "trade-output",
            Self::Unknown => "unknown-output",
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing tier within `market-data-output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingTier {
    /// Price above [`HIGH_VALUE_THRESHOLD`].
    HighValue,
    /// Everything else.
    Regular,
}

impl ProcessingTier {
    /// Tier name as used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HighValue => "high-value",
            Self::Regular => "regular",
        }
    }
}

/// Where an event was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Destination sink.
    pub channel: OutputChannel,
    /// Set only for `market-data-output`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<ProcessingTier>,
}

impl RoutingDecision {
    /// Tier label for metrics, `none` outside market data.
    #[must_use]
    pub fn tier_label(&self) -> &'static str {
        self.tier.map_or("none", ProcessingTier::as_str)
    }
}

// =============================================================================
// Router
// =============================================================================

/// Simulated processing budget per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBudgets {
    /// Budget for [`ProcessingTier::HighValue`].
    pub high_value: Duration,
    /// Budget for [`ProcessingTier::Regular`].
    pub regular: Duration,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            high_value: Duration::from_millis(100),
            regular: Duration::from_millis(50),
        }
    }
}

impl TierBudgets {
    /// No simulated delay at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            high_value: Duration::ZERO,
            regular: Duration::ZERO,
        }
    }

    /// Budget for `tier`.
    #[must_use]
    pub const fn for_tier(&self, tier: ProcessingTier) -> Duration {
        match tier {
            ProcessingTier::HighValue => self.high_value,
            ProcessingTier::Regular => self.regular,
        }
    }
}

/// Stateless message-type router.
#[derive(Debug, Default, Clone, Copy)]
pub struct Router;

impl Router {
    /// Create a router.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decide where `event` goes. Unrecognized route keys land on
    /// [`OutputChannel::Unknown`].
    #[must_use]
    pub fn route(&self, event: &MarketDataEvent) -> RoutingDecision {
        match event.message_type.as_deref() {
            Some(MARKET_DATA) => RoutingDecision {
                channel: OutputChannel::MarketData,
                tier: Some(Self::tier_for(event.price)),
            },
            Some(TRADE) => RoutingDecision {
                channel: OutputChannel::Trade,
                tier: None,
            },
            Some(_) | None => RoutingDecision {
                channel: OutputChannel::Unknown,
                tier: None,
            },
        }
    }

    fn tier_for(price: Option<Decimal>) -> ProcessingTier {
        match price {
            Some(p) if p > HIGH_VALUE_THRESHOLD => ProcessingTier::HighValue,
            _ => ProcessingTier::Regular,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    #[test_case("MARKET_DATA", dec!(150.25), OutputChannel::MarketData, Some(ProcessingTier::HighValue) ; "market data high value")]
    #[test_case("MARKET_DATA", dec!(50), OutputChannel::MarketData, Some(ProcessingTier::Regular) ; "market data regular")]
    #[test_case("MARKET_DATA", dec!(100), OutputChannel::MarketData, Some(ProcessingTier::Regular) ; "threshold is regular")]
    #[test_case("MARKET_DATA", dec!(100.0001), OutputChannel::MarketData, Some(ProcessingTier::HighValue) ; "just above threshold")]
    #[test_case("TRADE", dec!(500), OutputChannel::Trade, None ; "trade")]
    #[test_case("FOO", dec!(500), OutputChannel::Unknown, None ; "unknown type")]
    #[test_case("market_data", dec!(500), OutputChannel::Unknown, None ; "route key is case sensitive")]
    fn routes_by_message_type(
        message_type: &str,
        price: Decimal,
        channel: OutputChannel,
        tier: Option<ProcessingTier>,
    ) {
        let event = MarketDataEvent::new("AAPL", price).with_message_type(message_type);
        let decision = Router::new().route(&event);
        assert_eq!(decision, RoutingDecision { channel, tier });
    }

    #[test]
    fn missing_message_type_is_unknown() {
        let event = MarketDataEvent::new("AAPL", dec!(10));
        assert_eq!(Router::new().route(&event).channel, OutputChannel::Unknown);
    }

    #[test]
    fn decision_serializes_with_channel_names() {
        let decision = RoutingDecision {
            channel: OutputChannel::MarketData,
            tier: Some(ProcessingTier::HighValue),
        };
        let json = serde_json::to_value(decision).unwrap();
        assert_eq!(json["channel"], "market-data-output");
        assert_eq!(json["tier"], "high-value");

        let trade = RoutingDecision {
            channel: OutputChannel::Trade,
            tier: None,
        };
        let json = serde_json::to_value(trade).unwrap();
        assert!(json.get("tier").is_none());
        assert_eq!(trade.tier_label(), "none");
    }

    #[test]
    fn budgets_per_tier() {
        let budgets = TierBudgets::default();
        assert_eq!(
            budgets.for_tier(ProcessingTier::HighValue),
            Duration::from_millis(100)
        );
        assert_eq!(
            budgets.for_tier(ProcessingTier::Regular),
            Duration::from_millis(50)
        );
        assert_eq!(TierBudgets::none().for_tier(ProcessingTier::HighValue), Duration::ZERO);
    }
}
