//! Ingestion Gateway
//!
//! Normalizes events from every ingress path (generator, HTTP, streams) into
//! envelopes and hands them to the shared pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::pipeline::{Pipeline, PipelineError, decode_event};
use crate::application::ports::{SingletonSource, SourceError};
use crate::domain::event::{Envelope, IngressSource, MarketDataEvent};
use crate::domain::routing::RoutingDecision;
use crate::infrastructure::metrics;

/// Entry point shared by all ingress adapters.
#[derive(Debug, Clone)]
pub struct IngestionGateway {
    pipeline: Arc<Pipeline>,
}

impl IngestionGateway {
    /// Gateway in front of `pipeline`.
    #[must_use]
    pub const fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Submit an already-decoded event.
    ///
    /// # Errors
    ///
    /// Returns the pipeline failure that dropped the event.
    pub async fn submit(
        &self,
        event: MarketDataEvent,
        source: IngressSource,
    ) -> Result<RoutingDecision, PipelineError> {
        metrics::record_received(source.as_str());
        self.pipeline.process(Envelope::new(event, source)).await
    }

    /// Decode a JSON document and submit it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decode`] for unusable payloads, otherwise the
    /// pipeline failure that dropped the event.
    pub async fn submit_payload(
        &self,
        payload: &[u8],
        source: IngressSource,
    ) -> Result<RoutingDecision, PipelineError> {
        metrics::record_received(source.as_str());
        let event = decode_event(payload).inspect_err(|e| {
            metrics::record_error(e.kind());
            tracing::warn!(source = source.as_str(), error = %e, "Undecodable payload");
        })?;
        self.pipeline.process(Envelope::new(event, source)).await
    }
}

// =============================================================================
// Sample Generator
// =============================================================================

/// Name of the periodic sample source.
pub const GENERATOR_NAME: &str = "market-data-generator";

/// Emits one canonical sample tick per period. Runs only on the leader.
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    gateway: Arc<IngestionGateway>,
    period: Duration,
}

impl SampleGenerator {
    /// Generator submitting through `gateway` every `period`.
    #[must_use]
    pub const fn new(gateway: Arc<IngestionGateway>, period: Duration) -> Self {
        Self { gateway, period }
    }
}

#[async_trait]
impl SingletonSource for SampleGenerator {
    fn name(&self) -> &str {
        GENERATOR_NAME
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn run_once(&self) -> Result<(), SourceError> {
        let decision = self
            .gateway
            .submit(MarketDataEvent::sample(), IngressSource::Simulator)
            .await
            .map_err(|e| SourceError {
                source_name: GENERATOR_NAME.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(channel = %decision.channel, "Generated sample market data");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
