//! HTTP Ingress and Health Endpoints
//!
//! Thin axum adapter over the ingestion gateway plus the operational
//! endpoints used by orchestrators and monitoring.
//!
//! # Endpoints
//!
//! - `POST /market-data` - Submit one event document
//! - `GET /health` - JSON health status with leadership and stream stats
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (workers running, sinks open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::services::{DispatcherStats, IngestionGateway, PipelineError, StreamStatsSnapshot};
use crate::domain::event::IngressSource;
use crate::domain::leadership::LeaderState;
use crate::domain::routing::{OutputChannel, ProcessingTier};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::sink::{OutputStats, SharedOutputHub};

// =============================================================================
// Response Types
// =============================================================================

/// Accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedResponse {
    /// Always `"accepted"`.
    pub status: &'static str,
    /// Output channel the event went to.
    pub channel: OutputChannel,
    /// Processing tier, for market data only.
    pub tier: Option<ProcessingTier>,
}

/// Rejected submission.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human-readable reason.
    pub error: String,
    /// Failure discriminator.
    pub kind: &'static str,
    /// Offending field, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Replica identity.
    pub instance_id: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Leadership state of this replica.
    pub leadership: LeadershipStatus,
    /// Per-stream consumer stats.
    pub streams: BTreeMap<String, StreamStatsSnapshot>,
    /// Output sink stats.
    pub outputs: OutputsStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some consumer pools are not running.
    Degraded,
    /// Output sinks are closed.
    Unhealthy,
}

/// Leadership summary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LeadershipStatus {
    /// Current state.
    pub state: LeaderState,
    /// Whether singleton sources run here.
    pub is_leader: bool,
}

/// Output sink summary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutputsStatus {
    /// Deliveries per channel.
    pub delivered: OutputStats,
    /// Attached downstream receivers.
    pub subscribers: usize,
    /// Whether the sinks still accept events.
    pub open: bool,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct AppState {
    version: String,
    instance_id: String,
    started_at: Instant,
    gateway: Arc<IngestionGateway>,
    leadership: watch::Receiver<LeaderState>,
    streams: Arc<DispatcherStats>,
    outputs: SharedOutputHub,
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        instance_id: impl Into<String>,
        gateway: Arc<IngestionGateway>,
        leadership: watch::Receiver<LeaderState>,
        streams: Arc<DispatcherStats>,
        outputs: SharedOutputHub,
    ) -> Self {
        Self {
            version: version.into(),
            instance_id: instance_id.into(),
            started_at: Instant::now(),
            gateway,
            leadership,
            streams,
            outputs,
        }
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/market-data", post(submit_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Ingress and health HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn submit_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.gateway.submit_payload(&body, IngressSource::Http).await {
        Ok(decision) => (
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                status: "accepted",
                channel: decision.channel,
                tier: decision.tier,
            }),
        )
            .into_response(),
        Err(e) => {
            let status = rejection_status(&e);
            let body = ErrorResponse {
                error: e.to_string(),
                kind: e.kind(),
                field: e.field(),
            };
            (status, Json(body)).into_response()
        }
    }
}

const fn rejection_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
        PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Enrichment(_) | PipelineError::Dispatch(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);

    if response.status == HealthStatus::Healthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let leader_state = *state.leadership.borrow();
    let streams = state.streams.snapshot();
    let open = !state.outputs.is_closed();
    let subscribers = OutputChannel::ALL
        .iter()
        .map(|channel| state.outputs.receiver_count(*channel))
        .sum();

    HealthResponse {
        status: determine_health_status(open, &streams),
        version: state.version.clone(),
        instance_id: state.instance_id.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        leadership: LeadershipStatus {
            state: leader_state,
            is_leader: leader_state.is_leader(),
        },
        streams,
        outputs: OutputsStatus {
            delivered: state.outputs.stats(),
            subscribers,
            open,
        },
    }
}

fn determine_health_status(
    outputs_open: bool,
    streams: &BTreeMap<String, StreamStatsSnapshot>,
) -> HealthStatus {
    if !outputs_open {
        HealthStatus::Unhealthy
    } else if streams.values().any(|s| s.workers == 0) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::OutputSink;
    use crate::application::services::Pipeline;
    use crate::infrastructure::sink::OutputHub;

    fn app() -> (Router, SharedOutputHub) {
        let hub = Arc::new(OutputHub::with_defaults());
        let pipeline = Pipeline::builder()
            .standard()
            .sink(Arc::clone(&hub) as Arc<dyn OutputSink>)
            .build()
            .unwrap();
        let gateway = Arc::new(IngestionGateway::new(Arc::new(pipeline)));
        let (_tx, leadership) = watch::channel(LeaderState::Follower);
        let state = AppState::new(
            "test",
            "pod-a",
            gateway,
            leadership,
            Arc::new(DispatcherStats::default()),
            Arc::clone(&hub),
        );
        (router(Arc::new(state)), hub)
    }

    async fn post(app: Router, body: &'static str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post("/market-data")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn valid_submission_is_accepted_with_decision() {
        let (app, hub) = app();
        let (status, body) = post(app, r#"{"symbol":"AAPL","price":150.25,"volume":1000}"#).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["channel"], "market-data-output");
        assert_eq!(body["tier"], "high-value");
        assert_eq!(hub.stats().market_data, 1);
    }

    #[tokio::test]
    async fn trade_submission_has_no_tier() {
        let (app, _hub) = app();
        let (status, body) =
            post(app, r#"{"symbol":"JPM","price":42,"messageType":"TRADE"}"#).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["channel"], "trade-output");
        assert!(body["tier"].is_null());
    }

    #[tokio::test]
    async fn validation_failure_is_unprocessable() {
        let (app, hub) = app();
        let (status, body) = post(app, r#"{"symbol":"AAPL","price":-5}"#).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["field"], "price");
        assert!(body["kind"].is_string());
        assert!(body["error"].is_string());
        assert_eq!(hub.stats().total(), 0);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (app, _hub) = app();
        let (status, body) = post(app, "{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "decode");
    }

    #[tokio::test]
    async fn empty_body_is_bad_request() {
        let (app, _hub) = app();
        let (status, _) = post(app, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (app, _hub) = app();
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_leadership_and_closed_outputs() {
        let (app, hub) = app();
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["leadership"]["state"], "follower");
        assert_eq!(body["leadership"]["is_leader"], false);

        hub.close();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn idle_stream_pool_degrades_health() {
        let mut streams = BTreeMap::new();
        streams.insert("ticks".to_string(), StreamStatsSnapshot::default());
        assert_eq!(determine_health_status(true, &streams), HealthStatus::Degraded);
        assert_eq!(determine_health_status(false, &streams), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(true, &BTreeMap::new()), HealthStatus::Healthy);
    }
}
