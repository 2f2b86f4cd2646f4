//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the ambient runtime concerns.

/// Retry delays with exponential growth and jitter.
pub mod backoff;

/// Configuration from environment variables.
pub mod config;

/// HTTP submission endpoint, health checks and metrics scrape.
pub mod http;

/// In-process lease coordinator.
pub mod lease;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Broadcast channel output sinks.
pub mod sink;

/// In-process partitioned stream broker.
pub mod stream;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
