#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Data Ingestion - Validation, Enrichment and Routing
//!
//! Ingests price ticks and trade executions, validates them, fills in
//! synthetic quotes and exchange codes, and routes each event to one of three
//! output channels. Events arrive from three places that all share one
//! pipeline instance:
//!
//! - a sample generator that runs on exactly one replica (leader-gated)
//! - `POST /market-data`
//! - two consumer-group stream subscriptions
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure rules and data types
//!   - `event`: Event record and processing envelope
//!   - `validation`, `enrichment`, `routing`: Pipeline stage rules
//!   - `leadership`: Lease timing and the leader state machine
//!   - `subscription`: Consumer group definitions
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Lease, stream, sink and singleton-source interfaces
//!   - `services`: Pipeline, gateway, singleton scheduler, dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `lease`, `stream`: In-process coordinator and broker
//!   - `sink`: Broadcast output channels
//!   - `http`: Submission, health and metrics endpoints
//!   - `config`, `telemetry`, `metrics`, `backoff`: Ambient runtime
//!
//! # Data Flow
//!
//! ```text
//! generator (leader only) --+
//!                           |     +-----------+    +--------+    +--------+
//! POST /market-data --------+---->| Validator |--->|Enricher|--->| Router |--> market-data-output
//!                           |     +-----------+    +--------+    +--------+--> trade-output
//! stream consumer groups ---+                                              --> unknown-output
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::enrichment::Enricher;
pub use domain::event::{Envelope, IngressSource, MarketDataEvent, ValidationWarning};
pub use domain::leadership::{LeaderLease, LeaderState, LeaseOutcome, LeaseTiming};
pub use domain::routing::{OutputChannel, ProcessingTier, Router, RoutingDecision, TierBudgets};
pub use domain::subscription::{ConsumerGroupSubscription, StartOffset};
pub use domain::validation::{ValidationError, Validator};

// Ports
pub use application::ports::{LeaseProvider, OutputSink, SingletonSource, StreamBroker};

// Services
pub use application::services::{
    ConsumerGroupDispatcher, DispatcherConfig, DispatcherStats, IngestionGateway, Pipeline,
    PipelineError, SampleGenerator, SingletonScheduler,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestionConfig};

// Adapters (for integration tests)
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};
pub use infrastructure::lease::{InMemoryLease, InMemoryLeaseCoordinator};
pub use infrastructure::sink::{OutputHub, SharedOutputHub};
pub use infrastructure::stream::InMemoryStreamBroker;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
