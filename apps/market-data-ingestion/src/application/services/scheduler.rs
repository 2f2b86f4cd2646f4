//! Singleton Scheduler
//!
//! Runs singleton sources on exactly one replica at a time. Each replica runs
//! one scheduler loop that drives the leadership state machine against the
//! injected [`LeaseProvider`].
//!
//! # Timing
//!
//! - Candidate and Follower try to acquire every `retry_period`.
//! - Leader renews every `retry_period`, several times per `renew_deadline`,
//!   and drops to Candidate on the first failed or lost renewal.
//! - Leader runs a source only while `now < last_renew + renew_deadline`.
//!   Because `renew_deadline < lease_duration`, a fenced-out leader has
//!   stopped before any other replica can be granted the lease.
//! - Source periods restart from the moment leadership is gained, so a
//!   takeover never runs a period the previous leader already ran.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{LeaseProvider, SingletonSource};
use crate::domain::leadership::{LeaderState, LeaseOutcome, LeaseTiming};
use crate::infrastructure::metrics;

struct Scheduled {
    source: Arc<dyn SingletonSource>,
    next_due: Instant,
}

/// Leader-gated runner for singleton sources.
pub struct SingletonScheduler {
    lease: Arc<dyn LeaseProvider>,
    timing: LeaseTiming,
    sources: Vec<Arc<dyn SingletonSource>>,
    state_tx: watch::Sender<LeaderState>,
}

impl std::fmt::Debug for SingletonScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonScheduler")
            .field("identity", &self.lease.identity())
            .field("timing", &self.timing)
            .field("sources", &self.sources.len())
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

impl SingletonScheduler {
    /// Scheduler contending for `lease` with the given timing.
    #[must_use]
    pub fn new(lease: Arc<dyn LeaseProvider>, timing: LeaseTiming) -> Self {
        Self {
            lease,
            timing,
            sources: Vec::new(),
            state_tx: watch::Sender::new(LeaderState::Candidate),
        }
    }

    /// Register a singleton source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SingletonSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Observe leadership changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LeaderState> {
        self.state_tx.subscribe()
    }

    /// Current leadership state.
    #[must_use]
    pub fn state(&self) -> LeaderState {
        *self.state_tx.borrow()
    }

    /// Drive the state machine until `cancel` fires, then release the lease
    /// if held.
    pub async fn run(self, cancel: CancellationToken) {
        let identity = self.lease.identity();
        tracing::info!(
            identity = %identity,
            sources = self.sources.len(),
            lease_duration_ms = self.timing.lease_duration().as_millis(),
            renew_deadline_ms = self.timing.renew_deadline().as_millis(),
            retry_period_ms = self.timing.retry_period().as_millis(),
            "Singleton scheduler started"
        );

        let mut state = LeaderState::Candidate;
        let mut last_renew = Instant::now();
        let mut last_attempt = Instant::now();
        let mut scheduled: Vec<Scheduled> = Vec::new();

        while !cancel.is_cancelled() {
            if state.is_leader() {
                let renew_at = last_attempt + self.timing.retry_period();
                let wake = scheduled
                    .iter()
                    .map(|s| s.next_due)
                    .fold(renew_at, Instant::min);

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep_until(wake) => {}
                }

                if Instant::now() >= renew_at {
                    last_attempt = Instant::now();
                    let outcome = self.renew().await;
                    if outcome == LeaseOutcome::Renewed {
                        last_renew = last_attempt;
                    }
                    state = self.transition(state, outcome);
                    if !state.is_leader() {
                        scheduled.clear();
                        continue;
                    }
                }

                self.run_due(&mut scheduled, last_renew).await;
            } else {
                let attempt = Instant::now();
                let outcome = self.acquire().await;
                state = self.transition(state, outcome);

                if state.is_leader() {
                    last_renew = attempt;
                    last_attempt = attempt;
                    scheduled = self
                        .sources
                        .iter()
                        .map(|source| Scheduled {
                            next_due: attempt + source.period(),
                            source: Arc::clone(source),
                        })
                        .collect();
                    continue;
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep(self.timing.retry_period()) => {}
                }
            }
        }

        if state.is_leader() {
            match self.lease.release().await {
                Ok(()) => tracing::info!(identity = %identity, "Released leadership lease"),
                Err(e) => tracing::warn!(identity = %identity, error = %e, "Failed to release lease"),
            }
            let _ = self.transition(state, LeaseOutcome::Lost);
        }
        tracing::info!(identity = %identity, "Singleton scheduler stopped");
    }

    async fn acquire(&self) -> LeaseOutcome {
        match self.lease.try_acquire().await {
            Ok(true) => LeaseOutcome::Acquired,
            Ok(false) => LeaseOutcome::HeldElsewhere,
            Err(e) => {
                tracing::warn!(error = %e, "Lease acquisition failed");
                LeaseOutcome::Failed
            }
        }
    }

    async fn renew(&self) -> LeaseOutcome {
        match self.lease.renew().await {
            Ok(true) => LeaseOutcome::Renewed,
            Ok(false) => LeaseOutcome::Lost,
            Err(e) => {
                tracing::warn!(error = %e, "Lease renewal failed");
                LeaseOutcome::Failed
            }
        }
    }

    fn transition(&self, from: LeaderState, outcome: LeaseOutcome) -> LeaderState {
        let to = from.transition(outcome);
        if to != from {
            tracing::info!(
                identity = %self.lease.identity(),
                from = %from,
                to = %to,
                "Leadership state changed"
            );
            metrics::record_leader_transition(to);
            self.state_tx.send_replace(to);
        }
        to
    }

    async fn run_due(&self, scheduled: &mut [Scheduled], last_renew: Instant) {
        let fence = last_renew + self.timing.renew_deadline();

        for entry in scheduled.iter_mut() {
            let now = Instant::now();
            if entry.next_due > now {
                continue;
            }

            if now < fence {
                let name = entry.source.name().to_string();
                match entry.source.run_once().await {
                    Ok(()) => metrics::record_singleton_execution(&name),
                    Err(e) => tracing::error!(source = %name, error = %e, "Singleton source failed"),
                }
            } else {
                tracing::warn!(
                    source = entry.source.name(),
                    "Skipping singleton execution, lease not renewed within deadline"
                );
            }

            let period = entry.source.period().max(Duration::from_millis(1));
            while entry.next_due <= now {
                entry.next_due += period;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
