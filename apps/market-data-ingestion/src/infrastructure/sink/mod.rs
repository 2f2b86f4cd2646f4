//! Output Sink Adapters
//!
//! Terminal delivery of routed events over tokio broadcast channels.
//!
//! # Architecture
//!
//! The `OutputHub` owns one channel per output:
//! - `market-data-output`, with tiered simulated processing
//! - `trade-output`
//! - `unknown-output`
//!
//! Every delivery re-serializes the event to its JSON wire form and logs the
//! body: market data and trades at INFO, unknown route keys at WARN. Any
//! number of receivers may subscribe; a channel with no receivers still logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::application::ports::{DispatchError, OutputSink};
use crate::domain::event::MarketDataEvent;
use crate::domain::routing::{OutputChannel, ProcessingTier, RoutingDecision, TierBudgets};
use crate::infrastructure::config::SinkSettings;

// =============================================================================
// Routed Messages
// =============================================================================

/// One event as delivered to a sink.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    /// Routing decision that selected the sink.
    pub decision: RoutingDecision,
    /// The enriched event.
    pub event: MarketDataEvent,
    /// Serialized JSON body.
    pub body: Arc<str>,
}

// =============================================================================
// Output Hub
// =============================================================================

/// Central hub for the three output channels.
#[derive(Debug)]
pub struct OutputHub {
    market_data_tx: broadcast::Sender<RoutedEvent>,
    trade_tx: broadcast::Sender<RoutedEvent>,
    unknown_tx: broadcast::Sender<RoutedEvent>,
    budgets: TierBudgets,
    delivered: [AtomicU64; 3],
    closed: AtomicBool,
}

/// Shared output hub reference.
pub type SharedOutputHub = Arc<OutputHub>;

impl OutputHub {
    /// Create a hub with the given capacities and tier budgets.
    #[must_use]
    pub fn new(settings: SinkSettings, budgets: TierBudgets) -> Self {
        Self {
            market_data_tx: broadcast::channel(settings.market_data_capacity).0,
            trade_tx: broadcast::channel(settings.trade_capacity).0,
            unknown_tx: broadcast::channel(settings.unknown_capacity).0,
            budgets,
            delivered: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            closed: AtomicBool::new(false),
        }
    }

    /// Create a hub with default capacities and no simulated delay.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SinkSettings::default(), TierBudgets::none())
    }

    const fn sender(&self, channel: OutputChannel) -> &broadcast::Sender<RoutedEvent> {
        match channel {
            OutputChannel::MarketData => &self.market_data_tx,
            OutputChannel::Trade => &self.trade_tx,
            OutputChannel::Unknown => &self.unknown_tx,
        }
    }

    const fn slot(channel: OutputChannel) -> usize {
        match channel {
            OutputChannel::MarketData => 0,
            OutputChannel::Trade => 1,
            OutputChannel::Unknown => 2,
        }
    }

    /// Get a new receiver for `channel`.
    #[must_use]
    pub fn subscribe(&self, channel: OutputChannel) -> broadcast::Receiver<RoutedEvent> {
        self.sender(channel).subscribe()
    }

    /// Get the number of active receivers on `channel`.
    #[must_use]
    pub fn receiver_count(&self, channel: OutputChannel) -> usize {
        self.sender(channel).receiver_count()
    }

    /// Refuse further deliveries.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get delivery statistics.
    #[must_use]
    pub fn stats(&self) -> OutputStats {
        let count = |channel| self.delivered[Self::slot(channel)].load(Ordering::Relaxed);
        OutputStats {
            market_data: count(OutputChannel::MarketData),
            trade: count(OutputChannel::Trade),
            unknown: count(OutputChannel::Unknown),
        }
    }

    async fn simulate_processing(&self, tier: Option<ProcessingTier>) {
        if let Some(tier) = tier {
            let budget = self.budgets.for_tier(tier);
            if !budget.is_zero() {
                tokio::time::sleep(budget).await;
            }
        }
    }
}

#[async_trait]
impl OutputSink for OutputHub {
    async fn deliver(
        &self,
        decision: RoutingDecision,
        event: &MarketDataEvent,
    ) -> Result<(), DispatchError> {
        let channel = decision.channel;
        if self.is_closed() {
            return Err(DispatchError::SinkClosed(channel));
        }

        let body: Arc<str> = serde_json::to_string(event)
            .map_err(|e| DispatchError::Serialization {
                channel,
                reason: e.to_string(),
            })?
            .into();

        self.simulate_processing(decision.tier).await;

        match channel {
            OutputChannel::Unknown => tracing::warn!(
                channel = %channel,
                message_type = ?event.message_type,
                body = %body,
                "Unknown message type received"
            ),
            OutputChannel::MarketData | OutputChannel::Trade => tracing::info!(
                channel = %channel,
                tier = decision.tier_label(),
                body = %body,
                "Output message"
            ),
        }

        // No receivers is fine: the log line is the delivery of record.
        let _ = self.sender(channel).send(RoutedEvent {
            decision,
            event: event.clone(),
            body,
        });
        self.delivered[Self::slot(channel)].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Deliveries per channel since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    /// `market-data-output` deliveries.
    pub market_data: u64,
    /// `trade-output` deliveries.
    pub trade: u64,
    /// `unknown-output` deliveries.
    pub unknown: u64,
}

impl OutputStats {
    /// Get total deliveries across all channels.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.market_data + self.trade + self.unknown
    }
}

// =============================================================================
// Tests
// =============================================================================
