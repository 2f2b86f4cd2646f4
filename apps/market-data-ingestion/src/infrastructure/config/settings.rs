//! Ingestion Configuration Settings
//!
//! Configuration types for the ingestion service, loaded from environment
//! variables. Every value has a default except where noted, so a bare
//! `cargo run` starts a single standalone replica.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::leadership::{LeaderLease, LeaseTiming, LeaseTimingError};
use crate::domain::routing::TierBudgets;
use crate::domain::subscription::{ConsumerGroupSubscription, StartOffset};

const DEFAULT_APPLICATION_NAME: &str = "market-data-ingestion";
const DEFAULT_NAMESPACE: &str = "nexus-weaver";

/// Broker credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Stream broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Broker host.
    pub hostname: String,
    /// Broker port.
    pub port: u16,
    /// Login.
    pub credentials: Credentials,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 5672,
            credentials: Credentials::new("guest".to_string(), "guest".to_string()),
        }
    }
}

/// Output sink channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    /// `market-data-output` capacity.
    pub market_data_capacity: usize,
    /// `trade-output` capacity.
    pub trade_capacity: usize,
    /// `unknown-output` capacity.
    pub unknown_capacity: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            market_data_capacity: 10_000,
            trade_capacity: 10_000,
            unknown_capacity: 1_000,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Replica identity, used as lease holder.
    pub instance_id: String,
    /// HTTP port for submissions, health and metrics.
    pub http_port: u16,
    /// Stream broker connection.
    pub broker: BrokerSettings,
    /// Price-tick subscription.
    pub market_prices: ConsumerGroupSubscription,
    /// Trade-execution subscription.
    pub trade_executions: ConsumerGroupSubscription,
    /// Singleton lease.
    pub lease: LeaderLease,
    /// Sample generator period.
    pub generator_period: Duration,
    /// Simulated processing budget per tier.
    pub tier_budgets: TierBudgets,
    /// Dispatcher drain window on shutdown.
    pub shutdown_grace: Duration,
    /// Sink capacities.
    pub sinks: SinkSettings,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            http_port: 8080,
            broker: BrokerSettings::default(),
            market_prices: ConsumerGroupSubscription::market_prices(),
            trade_executions: ConsumerGroupSubscription::trade_executions(),
            lease: LeaderLease::new(
                format!("{DEFAULT_APPLICATION_NAME}-leader"),
                DEFAULT_NAMESPACE,
                String::new(),
                LeaseTiming::default(),
            ),
            generator_period: Duration::from_millis(5000),
            tier_budgets: TierBudgets::default(),
            shutdown_grace: Duration::from_secs(10),
            sinks: SinkSettings::default(),
        }
    }
}

impl IngestionConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse or violates a constraint.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse or violates a constraint.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let instance_id = env
            .string("HOSTNAME")?
            .unwrap_or(defaults.instance_id);

        let broker = BrokerSettings {
            hostname: env
                .string("RABBITMQ_HOSTNAME")?
                .unwrap_or(defaults.broker.hostname),
            port: env.parse("RABBITMQ_PORT")?.unwrap_or(defaults.broker.port),
            credentials: Credentials::new(
                env.string("RABBITMQ_USERNAME")?
                    .unwrap_or_else(|| defaults.broker.credentials.username().to_string()),
                env.string("RABBITMQ_PASSWORD")?
                    .unwrap_or_else(|| defaults.broker.credentials.password().to_string()),
            ),
        };

        let market_prices = env.subscription("MARKET_PRICES", defaults.market_prices)?;
        let trade_executions = env.subscription("TRADE_EXECUTIONS", defaults.trade_executions)?;

        let application = env
            .string("APPLICATION_NAME")?
            .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string());
        let timing = LeaseTiming::new(
            env.secs("LEADER_LEASE_DURATION_SECS")?
                .unwrap_or(defaults.lease.timing.lease_duration()),
            env.secs("LEADER_RENEW_DEADLINE_SECS")?
                .unwrap_or(defaults.lease.timing.renew_deadline()),
            env.secs("LEADER_RETRY_PERIOD_SECS")?
                .unwrap_or(defaults.lease.timing.retry_period()),
        )?;
        let lease = LeaderLease::new(
            env.string("LEADER_LEASE_NAME")?
                .unwrap_or_else(|| format!("{application}-leader")),
            env.string("LEADER_NAMESPACE")?
                .unwrap_or(defaults.lease.namespace),
            instance_id.clone(),
            timing,
        );

        let generator_period = env
            .millis("GENERATOR_PERIOD_MS")?
            .unwrap_or(defaults.generator_period);
        if generator_period.is_zero() {
            return Err(ConfigError::ZeroDuration("GENERATOR_PERIOD_MS".to_string()));
        }

        let tier_budgets = TierBudgets {
            high_value: env
                .millis("HIGH_VALUE_DELAY_MS")?
                .unwrap_or(defaults.tier_budgets.high_value),
            regular: env
                .millis("REGULAR_DELAY_MS")?
                .unwrap_or(defaults.tier_budgets.regular),
        };

        let sinks = SinkSettings {
            market_data_capacity: env
                .parse("MARKET_DATA_OUTPUT_CAPACITY")?
                .unwrap_or(defaults.sinks.market_data_capacity),
            trade_capacity: env
                .parse("TRADE_OUTPUT_CAPACITY")?
                .unwrap_or(defaults.sinks.trade_capacity),
            unknown_capacity: env
                .parse("UNKNOWN_OUTPUT_CAPACITY")?
                .unwrap_or(defaults.sinks.unknown_capacity),
        };

        let config = Self {
            instance_id,
            http_port: env
                .parse("INGESTION_HTTP_PORT")?
                .unwrap_or(defaults.http_port),
            broker,
            market_prices,
            trade_executions,
            lease,
            generator_period,
            tier_budgets,
            shutdown_grace: env
                .secs("SHUTDOWN_GRACE_SECS")?
                .unwrap_or(defaults.shutdown_grace),
            sinks,
        };
        config.check()?;
        Ok(config)
    }

    /// Both stream subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> [&ConsumerGroupSubscription; 2] {
        [&self.market_prices, &self.trade_executions]
    }

    fn check(&self) -> Result<(), ConfigError> {
        for sub in self.subscriptions() {
            if sub.concurrency == 0 {
                return Err(ConfigError::ZeroConcurrency(sub.stream.clone()));
            }
        }

        let capacities = [
            ("MARKET_DATA_OUTPUT_CAPACITY", self.sinks.market_data_capacity),
            ("TRADE_OUTPUT_CAPACITY", self.sinks.trade_capacity),
            ("UNKNOWN_OUTPUT_CAPACITY", self.sinks.unknown_capacity),
        ];
        if let Some((key, _)) = capacities.iter().find(|(_, cap)| *cap == 0) {
            return Err(ConfigError::InvalidValue {
                key: (*key).to_string(),
                value: "0".to_string(),
                reason: "capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable did not parse.
    #[error("environment variable {key}={value:?} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A stream was configured with no workers.
    #[error("concurrent consumers for {0} must be greater than zero")]
    ZeroConcurrency(String),

    /// A period was configured as zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(String),

    /// Lease timing is inconsistent.
    #[error(transparent)]
    LeaseTiming(#[from] LeaseTimingError),
}

// =============================================================================
// Environment Lookup
// =============================================================================

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            other => Ok(other),
        }
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.string(key)?
            .map(|raw| {
                raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn secs(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    fn subscription(
        &self,
        prefix: &str,
        defaults: ConsumerGroupSubscription,
    ) -> Result<ConsumerGroupSubscription, ConfigError> {
        let key = |suffix: &str| format!("{prefix}_{suffix}");

        Ok(ConsumerGroupSubscription {
            stream: self.string(&key("STREAM"))?.unwrap_or(defaults.stream),
            group: self.string(&key("CONSUMER_GROUP"))?.unwrap_or(defaults.group),
            concurrency: self
                .parse(&key("CONCURRENT_CONSUMERS"))?
                .unwrap_or(defaults.concurrency),
            start_offset: self
                .parse::<StartOffset>(&key("STREAM_OFFSET"))?
                .unwrap_or(defaults.start_offset),
            queue_name: self.string(&key("QUEUE_NAME"))?.unwrap_or(defaults.queue_name),
            routing_key: self.string(&key("ROUTING_KEY"))?.unwrap_or(defaults.routing_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<IngestionConfig, ConfigError> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IngestionConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.market_prices.concurrency, 5);
        assert_eq!(config.trade_executions.concurrency, 3);
        assert_eq!(config.lease.name, "market-data-ingestion-leader");
        assert_eq!(config.lease.namespace, "nexus-weaver");
        assert_eq!(config.lease.holder, config.instance_id);
        assert_eq!(config.generator_period, Duration::from_millis(5000));
        assert_eq!(config.tier_budgets.high_value, Duration::from_millis(100));
        assert_eq!(config.tier_budgets.regular, Duration::from_millis(50));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn hostname_is_lease_holder() {
        let config = load(&[("HOSTNAME", "ingestion-7f9c")]).unwrap();
        assert_eq!(config.instance_id, "ingestion-7f9c");
        assert_eq!(config.lease.holder, "ingestion-7f9c");
    }

    #[test]
    fn lease_name_follows_application_name() {
        let config = load(&[("APPLICATION_NAME", "weaver")]).unwrap();
        assert_eq!(config.lease.name, "weaver-leader");

        let config = load(&[("APPLICATION_NAME", "weaver"), ("LEADER_LEASE_NAME", "custom")]).unwrap();
        assert_eq!(config.lease.name, "custom");
    }

    #[test]
    fn stream_overrides() {
        let config = load(&[
            ("MARKET_PRICES_STREAM", "prices-v2"),
            ("MARKET_PRICES_CONCURRENT_CONSUMERS", "8"),
            ("MARKET_PRICES_CONSUMER_GROUP", "g1"),
            ("MARKET_PRICES_STREAM_OFFSET", "first"),
            ("TRADE_EXECUTIONS_ROUTING_KEY", "trade.fill"),
        ])
        .unwrap();

        assert_eq!(config.market_prices.stream, "prices-v2");
        assert_eq!(config.market_prices.concurrency, 8);
        assert_eq!(config.market_prices.group, "g1");
        assert_eq!(config.market_prices.start_offset, StartOffset::Earliest);
        assert_eq!(config.trade_executions.routing_key, "trade.fill");
    }

    #[test]
    fn renew_deadline_must_be_shorter_than_lease() {
        let err = load(&[
            ("LEADER_LEASE_DURATION_SECS", "10"),
            ("LEADER_RENEW_DEADLINE_SECS", "12"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::LeaseTiming(_)));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = load(&[("TRADE_EXECUTIONS_CONCURRENT_CONSUMERS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroConcurrency(s) if s == "trade-executions-stream"));
    }

    #[test]
    fn zero_generator_period_rejected() {
        let err = load(&[("GENERATOR_PERIOD_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration(_)));
    }

    #[test]
    fn garbage_number_rejected() {
        let err = load(&[("INGESTION_HTTP_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "INGESTION_HTTP_PORT"));
    }

    #[test]
    fn empty_value_rejected() {
        let err = load(&[("RABBITMQ_HOSTNAME", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(k) if k == "RABBITMQ_HOSTNAME"));
    }

    #[test]
    fn zero_budgets_allowed() {
        let config = load(&[("HIGH_VALUE_DELAY_MS", "0"), ("REGULAR_DELAY_MS", "0")]).unwrap();
        assert_eq!(config.tier_budgets, TierBudgets::none());
    }

    #[test]
    fn credentials_redacted_debug() {
        let config = load(&[("RABBITMQ_USERNAME", "svc"), ("RABBITMQ_PASSWORD", "hunter2")]).unwrap();
        let debug = format!("{:?}", config.broker.credentials);
        assert!(debug.contains("svc"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
