//! Market Data Ingestion Binary
//!
//! Starts the ingestion service: the leader-gated sample generator, the
//! stream consumer groups and the HTTP surface, all feeding one pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-ingestion
//! ```
//!
//! # Environment Variables
//!
//! - `HOSTNAME`: Replica identity and lease holder (default: random UUID)
//! - `INGESTION_HTTP_PORT`: HTTP port (default: 8080)
//! - `RABBITMQ_HOSTNAME` / `RABBITMQ_PORT` / `RABBITMQ_USERNAME` / `RABBITMQ_PASSWORD`
//! - `MARKET_PRICES_*`, `TRADE_EXECUTIONS_*`: Stream, group, concurrency, offset
//! - `LEADER_LEASE_DURATION_SECS` / `LEADER_RENEW_DEADLINE_SECS` / `LEADER_RETRY_PERIOD_SECS`
//! - `GENERATOR_PERIOD_MS`: Sample generator period (default: 5000)
//! - `SHUTDOWN_GRACE_SECS`: Consumer drain window (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_data_ingestion::application::ports::{OutputSink, SingletonSource, StreamBroker};
use market_data_ingestion::application::services::{
    ConsumerGroupDispatcher, DispatcherConfig, IngestionGateway, Pipeline, SampleGenerator,
    SingletonScheduler,
};
use market_data_ingestion::infrastructure::http::{AppState, HttpServer};
use market_data_ingestion::infrastructure::lease::InMemoryLeaseCoordinator;
use market_data_ingestion::infrastructure::sink::OutputHub;
use market_data_ingestion::infrastructure::stream::InMemoryStreamBroker;
use market_data_ingestion::infrastructure::telemetry;
use market_data_ingestion::{IngestionConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for background tasks after the signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Data Ingestion");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = IngestionConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Output sinks and the shared pipeline
    let output_hub = Arc::new(OutputHub::new(config.sinks, config.tier_budgets));
    let pipeline = Pipeline::builder()
        .standard()
        .sink(Arc::clone(&output_hub) as Arc<dyn OutputSink>)
        .build()?;
    tracing::info!(stages = ?pipeline.stage_names(), "Pipeline assembled");
    let gateway = Arc::new(IngestionGateway::new(Arc::new(pipeline)));

    // Leader-gated singleton sources
    let coordinator = InMemoryLeaseCoordinator::new();
    let lease = Arc::new(coordinator.handle(&config.lease));
    let generator = Arc::new(SampleGenerator::new(
        Arc::clone(&gateway),
        config.generator_period,
    ));
    let scheduler = SingletonScheduler::new(lease, config.lease.timing)
        .with_source(generator as Arc<dyn SingletonSource>);
    let leadership = scheduler.subscribe();

    // Consumer groups
    let broker = Arc::new(InMemoryStreamBroker::new());
    let mut dispatcher = ConsumerGroupDispatcher::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        Arc::clone(&gateway),
        DispatcherConfig {
            shutdown_grace: config.shutdown_grace,
            ..DispatcherConfig::default()
        },
    );
    for subscription in config.subscriptions() {
        broker.create_stream(&subscription.stream, subscription.concurrency);
        dispatcher = dispatcher.with_subscription(subscription.clone());
    }

    // HTTP surface
    let app_state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION"),
        config.instance_id.clone(),
        Arc::clone(&gateway),
        leadership,
        dispatcher.stats(),
        Arc::clone(&output_hub),
    ));
    let http_server = HttpServer::new(config.http_port, app_state, shutdown_token.clone());

    let scheduler_task = tokio::spawn(scheduler.run(shutdown_token.clone()));
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_token.clone()));
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Ingestion service ready");

    await_shutdown(shutdown_token).await;

    let stopped = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let (scheduler, dispatcher, http) = tokio::join!(scheduler_task, dispatcher_task, http_task);
        if let Err(e) = scheduler {
            tracing::error!(error = %e, "Singleton scheduler task failed");
        }
        match dispatcher {
            Ok(report) => tracing::info!(
                drained = report.drained,
                aborted = report.aborted,
                "Consumer groups drained"
            ),
            Err(e) => tracing::error!(error = %e, "Dispatcher task failed"),
        }
        if let Err(e) = http {
            tracing::error!(error = %e, "HTTP server task failed");
        }
    })
    .await;

    if stopped.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting with tasks still running"
        );
    }

    output_hub.close();
    let delivered = output_hub.stats();
    tracing::info!(
        market_data = delivered.market_data,
        trade = delivered.trade,
        unknown = delivered.unknown,
        "Ingestion service stopped"
    );
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestionConfig) {
    tracing::info!(
        instance_id = %config.instance_id,
        http_port = config.http_port,
        lease = %config.lease.qualified_name(),
        generator_period_ms = config.generator_period.as_millis(),
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        broker_host = %config.broker.hostname,
        broker_port = config.broker.port,
        credentials = ?config.broker.credentials,
        "Stream broker endpoint"
    );
    for subscription in config.subscriptions() {
        tracing::debug!(
            stream = %subscription.stream,
            group = %subscription.group,
            concurrency = subscription.concurrency,
            offset = %subscription.start_offset,
            "Consumer group configured"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
