//! Consumer Group Dispatcher
//!
//! One worker pool per subscribed stream. Each worker pulls one delivery at a
//! time, pushes it through the shared gateway and acknowledges it whatever
//! the outcome, so a pool never has more than `concurrency` messages in
//! flight. Delivery is at-least-once and nothing is deduplicated here.
//!
//! On shutdown workers stop pulling, in-flight messages get `shutdown_grace`
//! to finish, and anything still running after that is aborted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::gateway::IngestionGateway;
use crate::application::ports::{Delivery, StreamBroker};
use crate::domain::event::IngressSource;
use crate::domain::subscription::ConsumerGroupSubscription;
use crate::infrastructure::backoff::{Backoff, BackoffConfig};
use crate::infrastructure::metrics;

// =============================================================================
// Statistics
// =============================================================================

/// Live counters for one stream.
#[derive(Debug, Default)]
pub struct StreamStats {
    workers: AtomicUsize,
    delivered: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StreamStats {
    fn begin(&self, stream: &str) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        metrics::set_workers_in_flight(stream, now);
    }

    fn finish(&self, stream: &str, ok: bool) {
        if ok {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let now = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_workers_in_flight(stream, now);
    }

    /// Point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            workers: self.workers.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Serializable view of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatsSnapshot {
    /// Worker tasks currently running.
    pub workers: usize,
    /// Deliveries received.
    pub delivered: u64,
    /// Deliveries that reached a sink.
    pub processed: u64,
    /// Deliveries dropped on error.
    pub failed: u64,
    /// Deliveries being processed now.
    pub in_flight: usize,
    /// Highest observed `in_flight`.
    pub peak_in_flight: usize,
}

/// Stats for every subscribed stream, keyed by stream name.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    streams: RwLock<BTreeMap<String, Arc<StreamStats>>>,
}

impl DispatcherStats {
    fn register(&self, stream: &str) -> Arc<StreamStats> {
        Arc::clone(self.streams.write().entry(stream.to_string()).or_default())
    }

    /// Stats for `stream`, if subscribed.
    #[must_use]
    pub fn stream(&self, stream: &str) -> Option<StreamStatsSnapshot> {
        self.streams.read().get(stream).map(|s| s.snapshot())
    }

    /// Snapshot of every stream.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StreamStatsSnapshot> {
        self.streams
            .read()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Longest single wait on the broker.
    pub poll_wait: Duration,
    /// Drain window after cancellation.
    pub shutdown_grace: Duration,
    /// Backoff after receive failures.
    pub backoff: BackoffConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

/// How a dispatcher run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Workers that exited on their own.
    pub drained: usize,
    /// Workers aborted after the grace period.
    pub aborted: usize,
}

/// Per-stream worker pools feeding the shared pipeline.
pub struct ConsumerGroupDispatcher {
    broker: Arc<dyn StreamBroker>,
    gateway: Arc<IngestionGateway>,
    config: DispatcherConfig,
    subscriptions: Vec<ConsumerGroupSubscription>,
    stats: Arc<DispatcherStats>,
}

impl std::fmt::Debug for ConsumerGroupDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGroupDispatcher")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl ConsumerGroupDispatcher {
    /// Dispatcher reading from `broker` into `gateway`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        gateway: Arc<IngestionGateway>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            broker,
            gateway,
            config,
            subscriptions: Vec::new(),
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    /// Add a stream subscription.
    #[must_use]
    pub fn with_subscription(mut self, subscription: ConsumerGroupSubscription) -> Self {
        let _ = self.stats.register(&subscription.stream);
        self.subscriptions.push(subscription);
        self
    }

    /// Shared stats handle, live for the dispatcher's lifetime.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Run every pool until `cancel` fires, then drain.
    pub async fn run(self, cancel: CancellationToken) -> DrainReport {
        let mut workers = JoinSet::new();

        for sub in &self.subscriptions {
            let sub = Arc::new(sub.clone());
            let stats = self.stats.register(&sub.stream);

            tracing::info!(
                stream = %sub.stream,
                group = %sub.group,
                queue = %sub.queue_name,
                routing_key = %sub.routing_key,
                concurrency = sub.concurrency,
                offset = %sub.start_offset,
                "Starting consumer group workers"
            );

            for worker in 0..sub.concurrency {
                workers.spawn(run_worker(Worker {
                    id: worker,
                    subscription: Arc::clone(&sub),
                    broker: Arc::clone(&self.broker),
                    gateway: Arc::clone(&self.gateway),
                    stats: Arc::clone(&stats),
                    config: self.config,
                    cancel: cancel.clone(),
                }));
            }
        }

        cancel.cancelled().await;
        tracing::info!(
            grace_secs = self.config.shutdown_grace.as_secs_f64(),
            workers = workers.len(),
            "Draining consumer workers"
        );

        let mut drained = 0;
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while !workers.is_empty() {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(_)) => drained += 1,
                Ok(None) | Err(_) => break,
            }
        }

        let aborted = workers.len();
        if aborted > 0 {
            tracing::warn!(aborted, "Grace period elapsed, aborting consumer workers");
            workers.shutdown().await;
        }

        tracing::info!(drained, aborted, "Consumer dispatcher stopped");
        DrainReport { drained, aborted }
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    id: usize,
    subscription: Arc<ConsumerGroupSubscription>,
    broker: Arc<dyn StreamBroker>,
    gateway: Arc<IngestionGateway>,
    stats: Arc<StreamStats>,
    config: DispatcherConfig,
    cancel: CancellationToken,
}

async fn run_worker(worker: Worker) {
    let stream = worker.subscription.stream.as_str();
    let mut backoff = Backoff::new(worker.config.backoff);
    worker.stats.workers.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(stream, worker = worker.id, "Consumer worker started");

    loop {
        // Receive is cancel-safe: a delivery is only claimed when the future
        // completes.
        let received = tokio::select! {
            biased;
            () = worker.cancel.cancelled() => break,
            r = worker.broker.receive(&worker.subscription, worker.config.poll_wait) => r,
        };

        match received {
            Ok(Some(delivery)) => {
                backoff.reset();
                handle_delivery(&worker, &delivery).await;
            }
            Ok(None) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    stream,
                    worker = worker.id,
                    error = %e,
                    failures = backoff.failures(),
                    retry_in_ms = delay.as_millis(),
                    "Stream receive failed"
                );
                tokio::select! {
                    biased;
                    () = worker.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    worker.stats.workers.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(stream, worker = worker.id, "Consumer worker stopped");
}

async fn handle_delivery(worker: &Worker, delivery: &Delivery) {
    let stream = worker.subscription.stream.as_str();
    let started = Instant::now();
    worker.stats.begin(stream);

    let result = worker
        .gateway
        .submit_payload(&delivery.payload, IngressSource::Stream(stream.to_string()))
        .await;

    let ok = match result {
        Ok(decision) => {
            tracing::debug!(
                stream,
                partition = delivery.partition,
                offset = delivery.offset,
                channel = %decision.channel,
                "Stream message processed"
            );
            true
        }
        Err(e) => {
            metrics::record_consumer_error(stream);
            tracing::error!(
                stream,
                partition = delivery.partition,
                offset = delivery.offset,
                kind = e.kind(),
                error = %e,
                "Error processing stream message"
            );
            false
        }
    };

    // Failed messages are acknowledged too; redelivery belongs to the stream.
    if let Err(e) = worker.broker.ack(&worker.subscription, delivery).await {
        tracing::warn!(
            stream,
            partition = delivery.partition,
            offset = delivery.offset,
            error = %e,
            "Failed to acknowledge stream message"
        );
    }

    worker.stats.finish(stream, ok);
    metrics::record_consumed(stream, started.elapsed());
}
