//! Leader Election Integration Tests
//!
//! Runs several schedulers against one shared lease coordinator on a paused
//! clock and checks exclusivity and failover.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use market_data_ingestion::application::ports::SourceError;
use market_data_ingestion::{
    InMemoryLeaseCoordinator, LeaderLease, LeaderState, LeaseTiming, SingletonScheduler,
    SingletonSource,
};

const LEASE: Duration = Duration::from_secs(15);
const RENEW_DEADLINE: Duration = Duration::from_secs(10);
const RETRY: Duration = Duration::from_secs(2);

struct Tick {
    runs: AtomicUsize,
}

#[async_trait]
impl SingletonSource for Tick {
    fn name(&self) -> &str {
        "tick"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn run_once(&self) -> Result<(), SourceError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Replica {
    state: watch::Receiver<LeaderState>,
    source: Arc<Tick>,
    task: JoinHandle<()>,
}

impl Replica {
    fn is_leader(&self) -> bool {
        !self.task.is_finished() && self.state.borrow().is_leader()
    }

    fn runs(&self) -> usize {
        self.source.runs.load(Ordering::SeqCst)
    }
}

fn spawn_fleet(
    coordinator: &Arc<InMemoryLeaseCoordinator>,
    size: usize,
    cancel: &CancellationToken,
) -> Vec<Replica> {
    let timing = LeaseTiming::new(LEASE, RENEW_DEADLINE, RETRY).unwrap();

    (0..size)
        .map(|i| {
            let lease = LeaderLease::new("ingest-leader", "test", format!("pod-{i}"), timing);
            let source = Arc::new(Tick {
                runs: AtomicUsize::new(0),
            });
            let scheduler = SingletonScheduler::new(Arc::new(coordinator.handle(&lease)), timing)
                .with_source(Arc::clone(&source) as Arc<dyn SingletonSource>);
            let state = scheduler.subscribe();
            let task = tokio::spawn(scheduler.run(cancel.clone()));
            Replica {
                state,
                source,
                task,
            }
        })
        .collect()
}

fn leaders(fleet: &[Replica]) -> Vec<usize> {
    fleet
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_leader())
        .map(|(i, _)| i)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn exactly_one_leader_while_healthy() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let cancel = CancellationToken::new();
    let fleet = spawn_fleet(&coordinator, 4, &cancel);

    tokio::time::sleep(Duration::from_millis(100)).await;

    for _ in 0..120 {
        assert_eq!(leaders(&fleet).len(), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // Only the leader ever ran its source.
    let ran: Vec<_> = fleet.iter().filter(|r| r.runs() > 0).collect();
    assert_eq!(ran.len(), 1);
    assert!(ran[0].runs() >= 55);

    cancel.cancel();
    for replica in fleet {
        replica.task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn follower_takes_over_after_leader_crash() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let cancel = CancellationToken::new();
    let fleet = spawn_fleet(&coordinator, 3, &cancel);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let old = leaders(&fleet);
    assert_eq!(old.len(), 1);
    let old = old[0];

    // A crash does not release the lease.
    fleet[old].task.abort();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(leaders(&fleet).is_empty());

    tokio::time::sleep(RETRY + LEASE).await;

    let new = leaders(&fleet);
    assert_eq!(new.len(), 1);
    assert_ne!(new[0], old);
    assert_eq!(
        coordinator.snapshot("test/ingest-leader").holder,
        Some(format!("pod-{}", new[0]))
    );

    cancel.cancel();
    for replica in fleet {
        let _ = replica.task.await;
    }
}

#[tokio::test(start_paused = true)]
async fn graceful_shutdown_hands_over_on_next_retry() {
    let coordinator = InMemoryLeaseCoordinator::new();
    let first_cancel = CancellationToken::new();
    let first = spawn_fleet(&coordinator, 1, &first_cancel);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first[0].is_leader());

    let rest_cancel = CancellationToken::new();
    let timing = LeaseTiming::new(LEASE, RENEW_DEADLINE, RETRY).unwrap();
    let lease = LeaderLease::new("ingest-leader", "test", "pod-standby", timing);
    let standby = SingletonScheduler::new(Arc::new(coordinator.handle(&lease)), timing);
    let standby_state = standby.subscribe();
    let standby_task = tokio::spawn(standby.run(rest_cancel.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*standby_state.borrow(), LeaderState::Follower);

    first_cancel.cancel();
    for replica in first {
        replica.task.await.unwrap();
    }

    // Released, so one retry period is enough.
    tokio::time::sleep(RETRY + Duration::from_millis(100)).await;
    assert_eq!(*standby_state.borrow(), LeaderState::Leader);

    rest_cancel.cancel();
    standby_task.await.unwrap();
}
