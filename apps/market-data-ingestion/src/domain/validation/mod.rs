//! Event Validation Rules
//!
//! Field and business-rule checks applied to every event before enrichment.
//! The first failing rule rejects the event; findings are not accumulated.
//!
//! # Rule Order
//!
//! 1. symbol is present and not blank
//! 2. price is present, positive and at least [`MIN_QUOTABLE_PRICE`]
//! 3. volume, when present, is positive
//! 4. price does not exceed [`MAX_PRICE`]
//! 5. volume above [`VOLUME_WARNING_THRESHOLD`] raises a warning only
//! 6. symbol is at most [`MAX_SYMBOL_LEN`] characters of `[A-Z0-9]`
//! 7. when both sides are quoted, bid is strictly below ask

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;

use super::enrichment::MIN_QUOTABLE_PRICE;
use super::event::{Envelope, MarketDataEvent, ValidationWarning};

/// Upper bound on a plausible price.
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Volume above which a warning is raised.
pub const VOLUME_WARNING_THRESHOLD: i64 = 10_000_000;

/// Longest accepted ticker.
pub const MAX_SYMBOL_LEN: usize = 10;

// =============================================================================
// Errors
// =============================================================================

/// Reason an event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is absent or blank.
    #[error("missing required field: {field}")]
    MissingField {
        /// Offending field.
        field: &'static str,
    },

    /// A field does not have the expected shape.
    #[error("invalid {field} format: {value:?}")]
    InvalidFormat {
        /// Offending field.
        field: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A numeric field is outside its accepted range.
    #[error("{field} out of range: {value} ({constraint})")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// The violated bound.
        constraint: &'static str,
    },

    /// A cross-field business rule does not hold.
    #[error("rule violation on {field}: {detail}")]
    RuleViolation {
        /// Primary field involved.
        field: &'static str,
        /// Human-readable description.
        detail: String,
    },
}

impl ValidationError {
    /// Discriminator used in logs, metrics and HTTP responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::InvalidFormat { .. } => "invalid_format",
            Self::OutOfRange { .. } => "out_of_range",
            Self::RuleViolation { .. } => "rule_violation",
        }
    }

    /// The offending field.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field }
            | Self::InvalidFormat { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::RuleViolation { field, .. } => field,
        }
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Stateless rule checker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator;

impl Validator {
    /// Create a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run every rule against `event` without modifying it.
    ///
    /// # Errors
    ///
    /// Returns the first rule violation found.
    pub fn check(&self, event: &MarketDataEvent) -> Result<Vec<ValidationWarning>, ValidationError> {
        let symbol = match event.symbol.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Err(ValidationError::MissingField { field: "symbol" }),
        };

        let price = event
            .price
            .ok_or(ValidationError::MissingField { field: "price" })?;

        if price <= Decimal::ZERO {
            return Err(ValidationError::OutOfRange {
                field: "price",
                value: price.to_string(),
                constraint: "must be positive",
            });
        }

        if price < MIN_QUOTABLE_PRICE {
            return Err(ValidationError::OutOfRange {
                field: "price",
                value: price.to_string(),
                constraint: "must leave room for a quote",
            });
        }

        if let Some(volume) = event.volume
            && volume <= 0
        {
            return Err(ValidationError::OutOfRange {
                field: "volume",
                value: volume.to_string(),
                constraint: "must be positive",
            });
        }

        if price > MAX_PRICE {
            return Err(ValidationError::OutOfRange {
                field: "price",
                value: price.to_string(),
                constraint: "must not exceed 1000000",
            });
        }

        let mut warnings = Vec::new();
        if let Some(volume) = event.volume
            && volume > VOLUME_WARNING_THRESHOLD
        {
            tracing::warn!(volume, symbol, "Unusually high volume detected");
            warnings.push(ValidationWarning::UnusualVolume { volume });
        }

        if symbol.len() > MAX_SYMBOL_LEN || !symbol_pattern().is_match(symbol) {
            return Err(ValidationError::InvalidFormat {
                field: "symbol",
                value: symbol.to_string(),
            });
        }

        if let (Some(bid), Some(ask)) = (event.bid, event.ask)
            && bid >= ask
        {
            return Err(ValidationError::RuleViolation {
                field: "bid",
                detail: format!("bid {bid} must be less than ask {ask}"),
            });
        }

        Ok(warnings)
    }

    /// Validate the envelope's event, fill a missing timestamp with `now` and
    /// mark the envelope as validated.
    ///
    /// # Errors
    ///
    /// Returns the first rule violation found; the envelope is left unmarked.
    pub fn validate(&self, envelope: &mut Envelope, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let warnings = self.check(&envelope.event)?;

        if envelope.event.timestamp.is_none() {
            envelope.event.timestamp = Some(now);
        }
        envelope.warnings.extend(warnings);
        envelope.validated_at = Some(now);

        tracing::debug!(
            symbol = envelope.event.symbol_or_empty(),
            price = ?envelope.event.price,
            "Market data event validated"
        );
        Ok(())
    }
}

#[allow(clippy::expect_used)] // Pattern is a compile-time constant
fn symbol_pattern() -> &'static Regex {
    static SYMBOL_REGEX: OnceLock<Regex> = OnceLock::new();
    SYMBOL_REGEX.get_or_init(|| Regex::new(r"^[A-Z0-9]+$").expect("symbol regex is valid"))
}

// =============================================================================
// Tests
// =============================================================================
