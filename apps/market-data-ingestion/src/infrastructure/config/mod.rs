//! Configuration Module
//!
//! Environment-driven configuration for the ingestion service.

mod settings;

pub use settings::{BrokerSettings, ConfigError, Credentials, IngestionConfig, SinkSettings};
