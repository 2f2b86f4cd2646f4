//! Processing Pipeline
//!
//! An ordered list of stages, a router and a sink, wired once at startup by
//! [`PipelineBuilder`] and shared by every ingress path.
//!
//! ```text
//! Envelope ─► Validator ─► Enricher ─► Router ─► OutputSink
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::application::ports::{DispatchError, OutputSink};
use crate::domain::enrichment::{Enricher, EnrichmentError};
use crate::domain::event::{Envelope, MarketDataEvent};
use crate::domain::routing::{Router, RoutingDecision};
use crate::domain::validation::{ValidationError, Validator};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Why an event did not reach its sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The payload was empty or not an event document.
    #[error("failed to decode event: {0}")]
    Decode(String),

    /// A validation rule rejected the event.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Enrichment invariant violated.
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    /// The sink refused the event.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl PipelineError {
    /// Discriminator for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Validation(e) => e.kind(),
            Self::Enrichment(_) => "enrichment",
            Self::Dispatch(_) => "dispatch",
        }
    }

    /// Offending field, for validation failures.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation(e) => Some(e.field()),
            _ => None,
        }
    }
}

/// Parse one JSON event document.
///
/// # Errors
///
/// Returns [`PipelineError::Decode`] for an empty body or malformed JSON.
pub fn decode_event(payload: &[u8]) -> Result<MarketDataEvent, PipelineError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(PipelineError::Decode("empty body".to_string()));
    }
    serde_json::from_slice(payload).map_err(|e| PipelineError::Decode(e.to_string()))
}

// =============================================================================
// Stages
// =============================================================================

/// One in-place transformation of an envelope.
pub trait Stage: Send + Sync {
    /// Stage name for tracing.
    fn name(&self) -> &'static str;

    /// Transform `envelope`.
    ///
    /// # Errors
    ///
    /// Returns the reason the event must be dropped.
    fn apply(&self, envelope: &mut Envelope, now: DateTime<Utc>) -> Result<(), PipelineError>;
}

impl Stage for Validator {
    fn name(&self) -> &'static str {
        "validate"
    }

    fn apply(&self, envelope: &mut Envelope, now: DateTime<Utc>) -> Result<(), PipelineError> {
        Ok(self.validate(envelope, now)?)
    }
}

impl Stage for Enricher {
    fn name(&self) -> &'static str {
        "enrich"
    }

    fn apply(&self, envelope: &mut Envelope, now: DateTime<Utc>) -> Result<(), PipelineError> {
        Ok(self.enrich(envelope, now)?)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Shared processing pipeline.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    router: Router,
    sink: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Start building a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `envelope` through every stage, route it and deliver it.
    ///
    /// Errors are counted and logged here; callers only decide what to tell
    /// the producer.
    ///
    /// # Errors
    ///
    /// Returns the first stage or dispatch failure.
    #[tracing::instrument(
        name = "pipeline.process",
        skip_all,
        fields(source = envelope.source.as_str(), symbol = envelope.event.symbol_or_empty())
    )]
    pub async fn process(&self, mut envelope: Envelope) -> Result<RoutingDecision, PipelineError> {
        let started = Instant::now();

        match self.run(&mut envelope).await {
            Ok(decision) => {
                metrics::record_validation_warnings(envelope.warnings.len());
                metrics::record_routed(decision);
                metrics::record_processed(
                    envelope.source.as_str(),
                    envelope.event.symbol_or_empty(),
                    started.elapsed(),
                );
                tracing::debug!(
                    channel = %decision.channel,
                    tier = decision.tier_label(),
                    "Event routed"
                );
                Ok(decision)
            }
            Err(e) => {
                metrics::record_error(e.kind());
                tracing::warn!(
                    kind = e.kind(),
                    field = e.field().unwrap_or_default(),
                    error = %e,
                    "Event rejected"
                );
                Err(e)
            }
        }
    }

    async fn run(&self, envelope: &mut Envelope) -> Result<RoutingDecision, PipelineError> {
        for stage in &self.stages {
            stage.apply(envelope, Utc::now())?;
        }

        let decision = self.router.route(&envelope.event);
        self.sink.deliver(decision, &envelope.event).await?;
        Ok(decision)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Missing pipeline wiring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineBuildError {
    /// No sink was supplied.
    #[error("pipeline has no output sink")]
    MissingSink,

    /// No stage was supplied.
    #[error("pipeline has no stages")]
    NoStages,
}

/// Explicit, ordered pipeline construction.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
    sink: Option<Arc<dyn OutputSink>>,
}

impl PipelineBuilder {
    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append the validator and an enricher on the thread RNG.
    #[must_use]
    pub fn standard(self) -> Self {
        self.stage(Validator::new()).stage(Enricher::new())
    }

    /// Set the output sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Finish wiring.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineBuildError`] if the sink or every stage is missing.
    pub fn build(self) -> Result<Pipeline, PipelineBuildError> {
        if self.stages.is_empty() {
            return Err(PipelineBuildError::NoStages);
        }
        let sink = self.sink.ok_or(PipelineBuildError::MissingSink)?;
        Ok(Pipeline {
            stages: self.stages,
            router: Router::new(),
            sink,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::event::IngressSource;
    use crate::domain::routing::{OutputChannel, ProcessingTier};
    use crate::infrastructure::sink::OutputHub;

    fn pipeline(hub: Arc<OutputHub>) -> Pipeline {
        Pipeline::builder()
            .stage(Validator::new())
            .stage(Enricher::seeded(42))
            .sink(hub)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_sink_and_stages() {
        assert_eq!(
            Pipeline::builder().standard().build().unwrap_err(),
            PipelineBuildError::MissingSink
        );
        assert_eq!(
            Pipeline::builder()
                .sink(Arc::new(OutputHub::with_defaults()))
                .build()
                .unwrap_err(),
            PipelineBuildError::NoStages
        );
    }

    #[test]
    fn standard_stage_order() {
        let p = Pipeline::builder()
            .standard()
            .sink(Arc::new(OutputHub::with_defaults()))
            .build()
            .unwrap();
        assert_eq!(p.stage_names(), vec!["validate", "enrich"]);
    }

    #[test]
    fn decode_rejects_empty_and_malformed() {
        assert_eq!(
            decode_event(b"  \n").unwrap_err(),
            PipelineError::Decode("empty body".to_string())
        );
        assert_eq!(decode_event(b"{nope").unwrap_err().kind(), "decode");
        assert_eq!(decode_event(br#"[1,2]"#).unwrap_err().kind(), "decode");
    }

    #[tokio::test]
    async fn valid_tick_reaches_market_data_sink() {
        let hub = Arc::new(OutputHub::with_defaults());
        let mut rx = hub.subscribe(OutputChannel::MarketData);
        let p = pipeline(Arc::clone(&hub));

        let event = MarketDataEvent::new("AAPL", dec!(150.25)).with_volume(1000);
        let decision = p
            .process(Envelope::new(event, IngressSource::Http))
            .await
            .unwrap();

        assert_eq!(decision.channel, OutputChannel::MarketData);
        assert_eq!(decision.tier, Some(ProcessingTier::HighValue));

        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.event.exchange.as_deref(), Some("NASDAQ"));
        assert!(routed.event.bid.unwrap() < dec!(150.25));
    }

    #[tokio::test]
    async fn rejected_event_never_reaches_sink() {
        let hub = Arc::new(OutputHub::with_defaults());
        let p = pipeline(Arc::clone(&hub));

        let err = p
            .process(Envelope::new(
                MarketDataEvent::new("aapl", dec!(10)),
                IngressSource::Http,
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_format");
        assert_eq!(err.field(), Some("symbol"));
        assert_eq!(hub.stats().total(), 0);
    }

    #[tokio::test]
    async fn enricher_without_validator_is_an_invariant_violation() {
        let hub = Arc::new(OutputHub::with_defaults());
        let p = Pipeline::builder()
            .stage(Enricher::new())
            .sink(Arc::clone(&hub) as Arc<dyn OutputSink>)
            .build()
            .unwrap();

        let err = p
            .process(Envelope::new(MarketDataEvent::sample(), IngressSource::Simulator))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "enrichment");
    }

    #[tokio::test]
    async fn closed_sink_surfaces_dispatch_error() {
        let hub = Arc::new(OutputHub::with_defaults());
        hub.close();
        let p = pipeline(hub);

        let err = p
            .process(Envelope::new(MarketDataEvent::sample(), IngressSource::Http))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dispatch");
    }
}
