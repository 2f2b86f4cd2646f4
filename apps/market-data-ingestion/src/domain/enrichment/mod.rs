//! Event Enrichment
//!
//! Fill-only completion of validated events. A field that is already present
//! is never overwritten.
//!
//! | Field            | Default                                           |
//! |------------------|---------------------------------------------------|
//! | `bid` / `ask`    | synthesized around `price` (see [`synthesize_quote`]) |
//! | `messageType`    | `MARKET_DATA`                                     |
//! | `sequenceNumber` | current epoch millis                              |
//! | `exchange`       | inferred from the symbol                          |
//! | `timestamp`      | current time                                      |
//! | `source`         | `PROCESSED`                                       |

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};

use super::event::{DEFAULT_SOURCE, Envelope, MARKET_DATA, MarketDataEvent};

/// Fewest decimal places a synthesized quote is rounded to.
pub const QUOTE_SCALE_FLOOR: u32 = 4;

/// Finest scale a decimal can carry.
const QUOTE_SCALE_CEILING: u32 = 28;

/// Smallest price a quote with a positive bid can be centred on.
pub const MIN_QUOTABLE_PRICE: Decimal = Decimal::from_parts(2, 0, 0, false, QUOTE_SCALE_CEILING);

const NASDAQ_SYMBOLS: &[&str] = &["AAPL", "GOOGL", "MSFT", "AMZN", "TSLA", "META", "NFLX"];
const NYSE_SYMBOLS: &[&str] = &["JPM", "BAC", "WFC", "C", "GS", "MS"];

// =============================================================================
// Errors
// =============================================================================

/// Enrichment failures. Only reachable when the pipeline is miswired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichmentError {
    /// The envelope skipped validation.
    #[error("event for {symbol:?} reached enrichment without validation")]
    NotValidated {
        /// Symbol of the offending event.
        symbol: String,
    },
}

// =============================================================================
// Pure Rules
// =============================================================================

/// A two-sided quote synthesized around a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticQuote {
    /// Synthesized bid.
    pub bid: Decimal,
    /// Synthesized ask.
    pub ask: Decimal,
    /// Minimal increment the quote was rounded to.
    pub unit: Decimal,
}

/// Draw a spread fraction uniformly from `[0.0001, 0.0005)`.
pub fn draw_spread_percent<R: Rng + ?Sized>(rng: &mut R) -> Decimal {
    Decimal::new(rng.random_range(1_000..5_000), 7)
}

/// Synthesize a quote centred on `price`.
///
/// The half-spread is rounded half-up to the instrument's minimal unit, which
/// is the price's own scale but never coarser than [`QUOTE_SCALE_FLOOR`]
/// places, and floored at one unit so the two sides never touch. When one
/// unit would swallow the whole price the unit is refined a place at a time,
/// keeping the bid above zero for any price of at least [`MIN_QUOTABLE_PRICE`].
pub fn synthesize_quote<R: Rng + ?Sized>(price: Decimal, rng: &mut R) -> SyntheticQuote {
    let half_spread = price * draw_spread_percent(rng) / Decimal::TWO;
    let mut scale = price.scale().max(QUOTE_SCALE_FLOOR);

    loop {
        let unit = Decimal::new(1, scale);
        let half = half_spread
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
            .max(unit);

        if half < price || scale >= QUOTE_SCALE_CEILING {
            return SyntheticQuote {
                bid: price - half,
                ask: price + half,
                unit,
            };
        }
        scale += 1;
    }
}

/// Smallest value at least `unit` above `bid`, if one is representable.
fn ask_above(bid: Decimal, unit: Decimal) -> Option<Decimal> {
    bid.checked_add(unit).filter(|ask| *ask > bid)
}

/// Largest value at least `unit` below `ask`, if one is representable.
fn bid_below(ask: Decimal, unit: Decimal) -> Option<Decimal> {
    ask.checked_sub(unit).filter(|bid| *bid < ask)
}

/// Infer the listing exchange from a ticker.
#[must_use]
pub fn infer_exchange(symbol: &str) -> &'static str {
    if NASDAQ_SYMBOLS.contains(&symbol) {
        "NASDAQ"
    } else if NYSE_SYMBOLS.contains(&symbol) {
        "NYSE"
    } else {
        "UNKNOWN"
    }
}

/// Apply every fill-only rule to `event`.
pub fn enrich_event<R: Rng + ?Sized>(event: &mut MarketDataEvent, rng: &mut R, now: DateTime<Utc>) {
    if (event.bid.is_none() || event.ask.is_none())
        && let Some(price) = event.price
    {
        let quote = synthesize_quote(price, rng);
        // A supplied side may sit anywhere relative to price; the filled
        // side is pushed past it so the pair never crosses.
        match (event.bid, event.ask) {
            (None, None) => {
                event.bid = Some(quote.bid);
                event.ask = Some(quote.ask);
            }
            (Some(bid), None) => {
                event.ask = ask_above(bid, quote.unit).map(|floor| quote.ask.max(floor));
            }
            (None, Some(ask)) => {
                event.bid = bid_below(ask, quote.unit).map(|ceiling| quote.bid.min(ceiling));
            }
            (Some(_), Some(_)) => {}
        }
    }

    event
        .message_type
        .get_or_insert_with(|| MARKET_DATA.to_string());
    event.sequence_number.get_or_insert(now.timestamp_millis());

    if event.exchange.is_none() {
        event.exchange = Some(infer_exchange(event.symbol_or_empty()).to_string());
    }

    event.timestamp.get_or_insert(now);
    event
        .source
        .get_or_insert_with(|| DEFAULT_SOURCE.to_string());
}

// =============================================================================
// Enricher
// =============================================================================

/// Random source backing quote synthesis.
#[derive(Debug)]
enum SpreadRng {
    /// Per-thread generator, for production.
    Thread,
    /// Fixed-seed generator, for reproducible runs.
    Seeded(Mutex<StdRng>),
}

/// Pipeline stage completing validated events.
#[derive(Debug)]
pub struct Enricher {
    rng: SpreadRng,
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher {
    /// Enricher drawing spreads from the thread-local generator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rng: SpreadRng::Thread,
        }
    }

    /// Enricher with a reproducible spread sequence.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SpreadRng::Seeded(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Complete the envelope's event and mark it enriched.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError::NotValidated`] if the envelope never passed
    /// the validator.
    pub fn enrich(&self, envelope: &mut Envelope, now: DateTime<Utc>) -> Result<(), EnrichmentError> {
        if !envelope.is_validated() {
            return Err(EnrichmentError::NotValidated {
                symbol: envelope.event.symbol_or_empty().to_string(),
            });
        }

        match &self.rng {
            SpreadRng::Thread => enrich_event(&mut envelope.event, &mut rand::rng(), now),
            SpreadRng::Seeded(rng) => enrich_event(&mut envelope.event, &mut *rng.lock(), now),
        }
        envelope.enriched_at = Some(now);

        tracing::debug!(
            symbol = envelope.event.symbol_or_empty(),
            spread = ?envelope.event.spread(),
            "Market data processed and enriched"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
