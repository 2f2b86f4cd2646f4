//! Port Interfaces
//!
//! Contracts between the application core and the outside world, following
//! the hexagonal layout. Infrastructure adapters implement these.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`LeaseProvider`]: exclusive lease in a coordination service
//! - [`StreamBroker`]: consumer-group reads from durable streams
//! - [`OutputSink`]: delivery of routed events
//!
//! ## Driver Ports (Inbound)
//!
//! - [`SingletonSource`]: periodic work that must run on one replica only

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::event::MarketDataEvent;
use crate::domain::routing::{OutputChannel, RoutingDecision};
use crate::domain::subscription::ConsumerGroupSubscription;

// =============================================================================
// Lease Port
// =============================================================================

/// Lease coordination failures. Always transient from the scheduler's view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    /// The coordination service did not answer.
    #[error("lease coordinator unavailable: {0}")]
    Unavailable(String),

    /// The coordination service rejected the request.
    #[error("lease request rejected: {0}")]
    Rejected(String),
}

/// Exclusive, expiring lease held on behalf of one replica.
///
/// Implementations must never grant the lease to two holders whose grants
/// overlap in time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Holder identity this provider acts for.
    fn identity(&self) -> String;

    /// Try to take the lease. `Ok(false)` means another holder has it.
    async fn try_acquire(&self) -> Result<bool, LeaseError>;

    /// Extend a held lease. `Ok(false)` means it is no longer ours.
    async fn renew(&self) -> Result<bool, LeaseError>;

    /// Give the lease up if held.
    async fn release(&self) -> Result<(), LeaseError>;

    /// Whether the coordination service currently names us as holder.
    async fn is_held(&self) -> Result<bool, LeaseError>;
}

// =============================================================================
// Stream Port
// =============================================================================

/// Delivery-level stream failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The broker could not be reached.
    #[error("stream broker unavailable: {0}")]
    Unavailable(String),

    /// The stream does not exist.
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    /// The acknowledged delivery is not outstanding for this group.
    #[error("delivery {offset} on {stream}/{partition} is not outstanding")]
    NotOutstanding {
        /// Stream name.
        stream: String,
        /// Partition index.
        partition: u32,
        /// Offset within the partition.
        offset: u64,
    },
}

/// One message handed to one worker of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream the message came from.
    pub stream: String,
    /// Partition within the stream.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Raw JSON body.
    pub payload: Vec<u8>,
}

/// Consumer-group reads from durable streams.
///
/// Within a group, a delivery is outstanding until acknowledged and no other
/// worker of that group receives the same partition meanwhile.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Wait up to `wait` for the next message for `subscription`'s group.
    async fn receive(
        &self,
        subscription: &ConsumerGroupSubscription,
        wait: Duration,
    ) -> Result<Option<Delivery>, StreamError>;

    /// Commit `delivery` for `subscription`'s group.
    async fn ack(
        &self,
        subscription: &ConsumerGroupSubscription,
        delivery: &Delivery,
    ) -> Result<(), StreamError>;
}

// =============================================================================
// Sink Port
// =============================================================================

/// Routed-event delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The sink for this channel has shut down.
    #[error("output channel {0} is closed")]
    SinkClosed(OutputChannel),

    /// The event could not be re-serialized.
    #[error("failed to serialize event for {channel}: {reason}")]
    Serialization {
        /// Destination channel.
        channel: OutputChannel,
        /// Serializer message.
        reason: String,
    },
}

/// Terminal delivery of routed events.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver `event` according to `decision`.
    async fn deliver(
        &self,
        decision: RoutingDecision,
        event: &MarketDataEvent,
    ) -> Result<(), DispatchError>;
}

// =============================================================================
// Singleton Source Port
// =============================================================================

/// Failure of one singleton execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("singleton source {source_name} failed: {reason}")]
pub struct SourceError {
    /// Name of the failing source.
    pub source_name: String,
    /// What went wrong.
    pub reason: String,
}

/// Periodic work that must run on exactly one replica.
#[async_trait]
pub trait SingletonSource: Send + Sync {
    /// Name for logs and metrics.
    fn name(&self) -> &str;

    /// Interval between executions while leader.
    fn period(&self) -> Duration;

    /// Execute once.
    async fn run_once(&self) -> Result<(), SourceError>;
}
