//! Domain Layer - Event model and pure pipeline rules.
//!
//! Nothing in this layer performs I/O. Validation, enrichment and routing are
//! stateless and reentrant, so any number of workers may share them.

/// Market data event and processing envelope.
pub mod event;

/// Field and business-rule validation.
pub mod validation;

/// Fill-only enrichment and spread synthesis.
pub mod enrichment;

/// Content-based routing to output channels.
pub mod routing;

/// Leader election state machine and lease parameters.
pub mod leadership;

/// Consumer group subscriptions to durable streams.
pub mod subscription;
