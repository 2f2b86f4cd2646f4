//! Consumer Group Integration Tests
//!
//! Drives the dispatcher against the in-process broker and checks the
//! concurrency bound, per-partition exclusivity and shutdown draining.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use market_data_ingestion::application::services::StreamStatsSnapshot;
use market_data_ingestion::infrastructure::config::SinkSettings;
use market_data_ingestion::{
    ConsumerGroupDispatcher, ConsumerGroupSubscription, DispatcherConfig, DispatcherStats,
    InMemoryStreamBroker, IngestionGateway, OutputChannel, OutputHub, OutputSink, Pipeline,
    StartOffset, StreamBroker, TierBudgets,
};

const STREAM: &str = "market-prices-stream";
const GROUP: &str = "nexus-consumer-group";

struct Harness {
    broker: Arc<InMemoryStreamBroker>,
    hub: Arc<OutputHub>,
    dispatcher: ConsumerGroupDispatcher,
    stats: Arc<DispatcherStats>,
}

fn harness(partitions: usize, concurrency: usize, budgets: TierBudgets, grace: Duration) -> Harness {
    let broker = Arc::new(InMemoryStreamBroker::new());
    broker.create_stream(STREAM, partitions);

    let hub = Arc::new(OutputHub::new(SinkSettings::default(), budgets));
    let pipeline = Pipeline::builder()
        .standard()
        .sink(Arc::clone(&hub) as Arc<dyn OutputSink>)
        .build()
        .unwrap();
    let gateway = Arc::new(IngestionGateway::new(Arc::new(pipeline)));

    let subscription = ConsumerGroupSubscription::new(STREAM, GROUP, concurrency)
        .with_start_offset(StartOffset::Earliest);
    let dispatcher = ConsumerGroupDispatcher::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        gateway,
        DispatcherConfig {
            shutdown_grace: grace,
            ..DispatcherConfig::default()
        },
    )
    .with_subscription(subscription);
    let stats = dispatcher.stats();

    Harness {
        broker,
        hub,
        dispatcher,
        stats,
    }
}

fn tick(sequence: usize, price: &str) -> Vec<u8> {
    format!(r#"{{"symbol":"AAPL","price":{price},"volume":100,"sequenceNumber":{sequence}}}"#)
        .into_bytes()
}

async fn wait_for_settled(stats: &DispatcherStats, expected: u64) -> StreamStatsSnapshot {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let snapshot = stats.stream(STREAM).unwrap();
            if snapshot.processed + snapshot.failed >= expected && snapshot.in_flight == 0 {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("stream did not settle")
}

#[tokio::test(start_paused = true)]
async fn workers_never_exceed_concurrency_bound() {
    let h = harness(8, 3, TierBudgets::default(), Duration::from_secs(10));
    for i in 0..40 {
        h.broker.publish(STREAM, tick(i, "150.25")).unwrap();
    }

    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.dispatcher.run(cancel.clone()));

    let snapshot = wait_for_settled(&h.stats, 40).await;
    assert_eq!(snapshot.processed, 40);
    assert_eq!(snapshot.workers, 3);
    assert!(snapshot.peak_in_flight <= 3);
    assert_eq!(snapshot.peak_in_flight, 3, "eight partitions keep every worker busy");
    assert_eq!(h.hub.stats().market_data, 40);
    assert_eq!(h.broker.pending(STREAM, GROUP), Some(0));

    cancel.cancel();
    let report = run.await.unwrap();
    assert_eq!(report.drained, 3);
    assert_eq!(report.aborted, 0);
}

#[tokio::test(start_paused = true)]
async fn single_partition_is_processed_by_one_worker_in_order() {
    let h = harness(1, 4, TierBudgets::default(), Duration::from_secs(10));
    let mut output = h.hub.subscribe(OutputChannel::MarketData);
    for i in 1..=12 {
        h.broker.publish(STREAM, tick(i, "50")).unwrap();
    }

    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.dispatcher.run(cancel.clone()));

    let snapshot = wait_for_settled(&h.stats, 12).await;
    assert_eq!(snapshot.peak_in_flight, 1);

    let mut sequences = Vec::new();
    while let Ok(routed) = output.try_recv() {
        sequences.push(routed.event.sequence_number.unwrap());
    }
    assert_eq!(sequences, (1..=12).collect::<Vec<i64>>());

    cancel.cancel();
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejected_messages_are_acknowledged() {
    let h = harness(2, 2, TierBudgets::none(), Duration::from_secs(10));
    h.broker.publish(STREAM, tick(1, "150.25")).unwrap();
    h.broker.publish(STREAM, tick(2, "-1")).unwrap();
    h.broker.publish(STREAM, b"not json".to_vec()).unwrap();
    h.broker
        .publish(STREAM, br#"{"symbol":"aapl","price":10}"#.to_vec())
        .unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.dispatcher.run(cancel.clone()));

    let snapshot = wait_for_settled(&h.stats, 4).await;
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.failed, 3);
    assert_eq!(h.broker.pending(STREAM, GROUP), Some(0));

    cancel.cancel();
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn in_flight_work_finishes_within_grace() {
    let budgets = TierBudgets {
        high_value: Duration::from_secs(2),
        regular: Duration::from_secs(2),
    };
    let h = harness(2, 2, budgets, Duration::from_secs(10));
    h.broker.publish(STREAM, tick(1, "150.25")).unwrap();
    h.broker.publish(STREAM, tick(2, "150.25")).unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.dispatcher.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.stats.stream(STREAM).unwrap().in_flight, 2);
    cancel.cancel();

    let report = run.await.unwrap();
    assert_eq!(report.drained, 2);
    assert_eq!(report.aborted, 0);
    assert_eq!(h.hub.stats().market_data, 2);
    assert_eq!(h.broker.pending(STREAM, GROUP), Some(0));
}

#[tokio::test(start_paused = true)]
async fn stuck_work_is_aborted_after_grace() {
    let budgets = TierBudgets {
        high_value: Duration::from_secs(60),
        regular: Duration::from_secs(60),
    };
    let h = harness(2, 2, budgets, Duration::from_secs(1));
    h.broker.publish(STREAM, tick(1, "150.25")).unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.dispatcher.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();

    let report = run.await.unwrap();
    assert_eq!(report.drained, 1, "the idle worker stops on its own");
    assert_eq!(report.aborted, 1);
    assert_eq!(h.hub.stats().market_data, 0);
    assert_eq!(h.broker.pending(STREAM, GROUP), Some(1), "unacknowledged work stays pending");
}
