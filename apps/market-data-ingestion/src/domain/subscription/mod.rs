//! Consumer Group Subscriptions
//!
//! One subscription per durable stream. Every replica attaches with the same
//! group id, so the stream balances messages across the fleet; the
//! concurrency bound caps how many workers this replica runs for the stream.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Stream carrying price ticks.
pub const MARKET_PRICES_STREAM: &str = "market-prices-stream";

/// Stream carrying trade executions.
pub const TRADE_EXECUTIONS_STREAM: &str = "trade-executions-stream";

// =============================================================================
// Start Offset
// =============================================================================

/// Where a group starts reading the first time it attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Only messages published after attach.
    #[default]
    Latest,
    /// Everything still retained by the stream.
    Earliest,
}

/// Unrecognized offset policy string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stream offset policy {0:?} (expected latest or earliest)")]
pub struct ParseStartOffsetError(String);

impl FromStr for StartOffset {
    type Err = ParseStartOffsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "last" | "next" => Ok(Self::Latest),
            "earliest" | "first" => Ok(Self::Earliest),
            _ => Err(ParseStartOffsetError(s.to_string())),
        }
    }
}

impl fmt::Display for StartOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Earliest => f.write_str("earliest"),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A named consumer group reading one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerGroupSubscription {
    /// Stream name.
    pub stream: String,
    /// Consumer group id shared by all replicas.
    pub group: String,
    /// Maximum concurrent workers on this replica.
    pub concurrency: usize,
    /// First-attach offset policy.
    pub start_offset: StartOffset,
    /// Broker queue backing the stream.
    pub queue_name: String,
    /// Routing key the queue is bound with.
    pub routing_key: String,
}

impl ConsumerGroupSubscription {
    /// Subscription with no broker binding metadata.
    #[must_use]
    pub fn new(stream: impl Into<String>, group: impl Into<String>, concurrency: usize) -> Self {
        let stream = stream.into();
        Self {
            queue_name: stream.clone(),
            routing_key: String::new(),
            stream,
            group: group.into(),
            concurrency,
            start_offset: StartOffset::Latest,
        }
    }

    /// Default price-tick subscription.
    #[must_use]
    pub fn market_prices() -> Self {
        Self {
            queue_name: "market-prices-consumer-group".to_string(),
            routing_key: "market.data".to_string(),
            ..Self::new(MARKET_PRICES_STREAM, "nexus-consumer-group", 5)
        }
    }

    /// Default trade-execution subscription.
    #[must_use]
    pub fn trade_executions() -> Self {
        Self {
            queue_name: "trade-executions-consumer-group".to_string(),
            routing_key: "trade.execution".to_string(),
            ..Self::new(TRADE_EXECUTIONS_STREAM, "nexus-trade-group", 3)
        }
    }

    /// Override the first-attach policy.
    #[must_use]
    pub const fn with_start_offset(mut self, start_offset: StartOffset) -> Self {
        self.start_offset = start_offset;
        self
    }

    /// Override the worker bound.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
