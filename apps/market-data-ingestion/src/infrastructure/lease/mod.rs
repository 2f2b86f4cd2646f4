//! In-Process Lease Coordinator
//!
//! A `LeaseProvider` backed by a shared in-memory table of expiring leases.
//! Every replica in one process gets its own [`InMemoryLease`] handle onto
//! the same [`InMemoryLeaseCoordinator`], which is how a single binary runs
//! standalone and how tests simulate a fleet.
//!
//! Expiry uses `tokio::time::Instant`, so paused-clock tests control it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

use crate::application::ports::{LeaseError, LeaseProvider};
use crate::domain::leadership::LeaderLease;

#[derive(Debug, Clone)]
struct LeaseRecord {
    holder: String,
    expires_at: Instant,
    transitions: u64,
}

impl LeaseRecord {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Current view of one lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSnapshot {
    /// Holder named in the table, if the grant is still live.
    pub holder: Option<String>,
    /// Number of times the lease changed hands.
    pub transitions: u64,
}

/// Shared lease table.
#[derive(Debug, Default)]
pub struct InMemoryLeaseCoordinator {
    leases: Mutex<HashMap<String, LeaseRecord>>,
    outage: AtomicBool,
}

impl InMemoryLeaseCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle for `lease.holder` contending for `lease`.
    #[must_use]
    pub fn handle(self: &Arc<Self>, lease: &LeaderLease) -> InMemoryLease {
        InMemoryLease {
            coordinator: Arc::clone(self),
            key: lease.qualified_name(),
            holder: lease.holder.clone(),
            duration: lease.timing.lease_duration(),
        }
    }

    /// Make every request fail until cleared.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Inspect a lease by `namespace/name`.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> LeaseSnapshot {
        let now = Instant::now();
        self.leases.lock().get(key).map_or(
            LeaseSnapshot {
                holder: None,
                transitions: 0,
            },
            |record| LeaseSnapshot {
                holder: record.live(now).then(|| record.holder.clone()),
                transitions: record.transitions,
            },
        )
    }

    fn check_available(&self) -> Result<(), LeaseError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(LeaseError::Unavailable(
                "lease coordinator is not reachable".to_string(),
            ));
        }
        Ok(())
    }
}

/// One replica's view of a lease in an [`InMemoryLeaseCoordinator`].
#[derive(Debug, Clone)]
pub struct InMemoryLease {
    coordinator: Arc<InMemoryLeaseCoordinator>,
    key: String,
    holder: String,
    duration: Duration,
}

#[async_trait]
impl LeaseProvider for InMemoryLease {
    fn identity(&self) -> String {
        self.holder.clone()
    }

    async fn try_acquire(&self) -> Result<bool, LeaseError> {
        self.coordinator.check_available()?;
        let now = Instant::now();
        let mut leases = self.coordinator.leases.lock();

        match leases.get_mut(&self.key) {
            Some(record) if record.live(now) && record.holder != self.holder => Ok(false),
            Some(record) => {
                if record.holder != self.holder {
                    record.transitions += 1;
                    tracing::debug!(lease = %self.key, from = %record.holder, to = %self.holder, "Lease taken over");
                    record.holder.clone_from(&self.holder);
                }
                record.expires_at = now + self.duration;
                Ok(true)
            }
            None => {
                leases.insert(
                    self.key.clone(),
                    LeaseRecord {
                        holder: self.holder.clone(),
                        expires_at: now + self.duration,
                        transitions: 1,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn renew(&self) -> Result<bool, LeaseError> {
        self.coordinator.check_available()?;
        let now = Instant::now();
        let mut leases = self.coordinator.leases.lock();

        match leases.get_mut(&self.key) {
            Some(record) if record.holder == self.holder && record.live(now) => {
                record.expires_at = now + self.duration;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self) -> Result<(), LeaseError> {
        self.coordinator.check_available()?;
        let mut leases = self.coordinator.leases.lock();
        if leases
            .get(&self.key)
            .is_some_and(|record| record.holder == self.holder)
        {
            leases.remove(&self.key);
        }
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, LeaseError> {
        self.coordinator.check_available()?;
        let now = Instant::now();
        Ok(self
            .coordinator
            .leases
            .lock()
            .get(&self.key)
            .is_some_and(|record| record.holder == self.holder && record.live(now)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::leadership::LeaseTiming;

    fn lease_for(holder: &str) -> LeaderLease {
        LeaderLease::new("ingest-leader", "test", holder, LeaseTiming::default())
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_holder_at_a_time() {
        let coordinator = InMemoryLeaseCoordinator::new();
        let a = coordinator.handle(&lease_for("a"));
        let b = coordinator.handle(&lease_for("b"));

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        assert!(a.is_held().await.unwrap());
        assert!(!b.is_held().await.unwrap());
        assert_eq!(
            coordinator.snapshot("test/ingest-leader").holder.as_deref(),
            Some("a")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_taken_over() {
        let coordinator = InMemoryLeaseCoordinator::new();
        let a = coordinator.handle(&lease_for("a"));
        let b = coordinator.handle(&lease_for("b"));

        assert!(a.try_acquire().await.unwrap());
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert!(b.try_acquire().await.unwrap());
        assert!(!a.renew().await.unwrap(), "old holder must see the loss");
        assert_eq!(coordinator.snapshot("test/ingest-leader").transitions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn renew_extends_the_grant() {
        let coordinator = InMemoryLeaseCoordinator::new();
        let a = coordinator.handle(&lease_for("a"));
        let b = coordinator.handle(&lease_for("b"));

        assert!(a.try_acquire().await.unwrap());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(a.renew().await.unwrap());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_lease() {
        let coordinator = InMemoryLeaseCoordinator::new();
        let a = coordinator.handle(&lease_for("a"));
        let b = coordinator.handle(&lease_for("b"));

        assert!(a.try_acquire().await.unwrap());
        b.release().await.unwrap();
        assert!(a.is_held().await.unwrap(), "non-holder release is a no-op");

        a.release().await.unwrap();
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let coordinator = InMemoryLeaseCoordinator::new();
        let a = coordinator.handle(&lease_for("a"));
        coordinator.set_outage(true);

        assert!(matches!(a.try_acquire().await, Err(LeaseError::Unavailable(_))));
        assert!(a.renew().await.is_err());

        coordinator.set_outage(false);
        assert!(a.try_acquire().await.unwrap());
        assert_eq!(a.identity(), "a");
    }
}
