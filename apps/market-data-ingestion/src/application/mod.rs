//! Application Layer - Use cases and port definitions.
//!
//! This layer wires the pure domain rules into running services and defines
//! the ports that infrastructure adapters implement.

/// Port interfaces for lease, stream, sink and singleton sources.
pub mod ports;

/// Pipeline, gateway, scheduler and dispatcher services.
pub mod services;
