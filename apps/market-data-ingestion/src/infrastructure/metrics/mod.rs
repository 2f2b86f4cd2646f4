//! Prometheus Metrics Module
//!
//! Exposes pipeline, consumer and leadership metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Pipeline**: events received, processed, rejected and routed
//! - **Consumers**: per-stream deliveries, latency and in-flight workers
//! - **Leadership**: state transitions and singleton executions
//! - **Tiers**: high-value, regular, trade and unknown throughput
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::leadership::LeaderState;
use crate::domain::routing::{OutputChannel, ProcessingTier, RoutingDecision};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Pipeline
    describe_counter!(
        "market_data_received_total",
        "Events accepted at an ingress boundary"
    );
    describe_counter!(
        "market_data_processed_total",
        "Events validated, enriched and delivered"
    );
    describe_histogram!(
        "market_data_processing_seconds",
        "Time from pipeline entry to sink delivery"
    );
    describe_counter!(
        "market_data_errors_total",
        "Events dropped by error kind"
    );
    describe_counter!(
        "market_data_validation_warnings_total",
        "Non-fatal validation warnings"
    );
    describe_counter!(
        "market_data_routed_total",
        "Events routed by channel and tier"
    );

    // Consumers
    describe_counter!(
        "market_data_consumed_total",
        "Stream deliveries received"
    );
    describe_histogram!(
        "market_data_consumer_seconds",
        "Time to handle one stream delivery"
    );
    describe_counter!(
        "market_data_consumer_errors_total",
        "Stream deliveries that failed processing"
    );
    describe_gauge!(
        "stream_workers_in_flight",
        "Deliveries currently being processed per stream"
    );

    // Leadership
    describe_counter!(
        "leader_transitions_total",
        "Leader state transitions by target state"
    );
    describe_gauge!("leader_is_leader", "1 while this replica holds the lease");
    describe_counter!(
        "singleton_executions_total",
        "Singleton source executions"
    );

    // Tiers
    describe_counter!("high_value_processed_total", "High-value ticks processed");
    describe_counter!("regular_processed_total", "Regular ticks processed");
    describe_counter!("trades_processed_total", "Trade executions processed");
    describe_counter!("unknown_messages_total", "Events with an unknown route key");
}

// =============================================================================
// Pipeline
// =============================================================================

/// Record an event accepted at an ingress boundary.
pub fn record_received(source: &str) {
    counter!("market_data_received_total", "source" => source.to_string()).increment(1);
}

/// Record a fully processed event.
pub fn record_processed(source: &str, symbol: &str, duration: Duration) {
    counter!(
        "market_data_processed_total",
        "source" => source.to_string(),
        "symbol" => symbol.to_string()
    )
    .increment(1);
    histogram!("market_data_processing_seconds").record(duration.as_secs_f64());
}

/// Record a dropped event by error discriminator.
pub fn record_error(kind: &str) {
    counter!("market_data_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record non-fatal validation warnings.
pub fn record_validation_warnings(count: usize) {
    if count > 0 {
        counter!("market_data_validation_warnings_total").increment(count as u64);
    }
}

/// Record a routing decision and its tier counter.
pub fn record_routed(decision: RoutingDecision) {
    counter!(
        "market_data_routed_total",
        "channel" => decision.channel.as_str(),
        "tier" => decision.tier_label()
    )
    .increment(1);

    let tiered = match (decision.channel, decision.tier) {
        (OutputChannel::MarketData, Some(ProcessingTier::HighValue)) => "high_value_processed_total",
        (OutputChannel::MarketData, _) => "regular_processed_total",
        (OutputChannel::Trade, _) => "trades_processed_total",
        (OutputChannel::Unknown, _) => "unknown_messages_total",
    };
    counter!(tiered).increment(1);
}

// =============================================================================
// Consumers
// =============================================================================

/// Record one stream delivery and how long it took.
pub fn record_consumed(stream: &str, duration: Duration) {
    counter!("market_data_consumed_total", "stream" => stream.to_string()).increment(1);
    histogram!("market_data_consumer_seconds", "stream" => stream.to_string())
        .record(duration.as_secs_f64());
}

/// Record a stream delivery that failed processing.
pub fn record_consumer_error(stream: &str) {
    counter!("market_data_consumer_errors_total", "stream" => stream.to_string()).increment(1);
}

/// Update the in-flight worker count for a stream.
#[allow(clippy::cast_precision_loss)]
pub fn set_workers_in_flight(stream: &str, count: usize) {
    gauge!("stream_workers_in_flight", "stream" => stream.to_string()).set(count as f64);
}

// =============================================================================
// Leadership
// =============================================================================

/// Record a leader state transition.
pub fn record_leader_transition(state: LeaderState) {
    counter!("leader_transitions_total", "state" => state.as_str()).increment(1);
    gauge!("leader_is_leader").set(if state.is_leader() { 1.0 } else { 0.0 });
}

/// Record one singleton source execution.
pub fn record_singleton_execution(source: &str) {
    counter!("singleton_executions_total", "source" => source.to_string()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
