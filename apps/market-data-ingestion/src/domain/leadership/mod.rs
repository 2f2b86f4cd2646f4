//! Leader Election Model
//!
//! The per-replica state machine and lease parameters behind singleton
//! execution. Lease mechanics live behind the `LeaseProvider` port; this
//! module only decides what a replica believes about itself.
//!
//! ```text
//!              acquired                 renew failed
//!   Candidate ───────────► Leader ───────────────────► Candidate
//!       │  ▲                                               │
//!  held │  │ retry                                         │
//!       ▼  │                                               │
//!    Follower ◄────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;

// =============================================================================
// State Machine
// =============================================================================

/// What a replica believes about its own leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderState {
    /// Trying to acquire the lease.
    #[default]
    Candidate,
    /// Holds the lease and runs singleton sources.
    Leader,
    /// Lease is held elsewhere; singleton sources are suspended.
    Follower,
}

impl LeaderState {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Leader => "leader",
            Self::Follower => "follower",
        }
    }

    /// Whether singleton sources may run in this state.
    #[must_use]
    pub const fn is_leader(self) -> bool {
        matches!(self, Self::Leader)
    }

    /// Apply the result of one lease round trip.
    #[must_use]
    pub const fn transition(self, outcome: LeaseOutcome) -> Self {
        match (self, outcome) {
            (Self::Leader, LeaseOutcome::Renewed) => Self::Leader,
            (Self::Leader, LeaseOutcome::Lost | LeaseOutcome::Failed) => Self::Candidate,
            (_, LeaseOutcome::Acquired | LeaseOutcome::Renewed) => Self::Leader,
            (_, LeaseOutcome::HeldElsewhere | LeaseOutcome::Lost) => Self::Follower,
            (state, LeaseOutcome::Failed) => state,
        }
    }
}

impl fmt::Display for LeaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single acquire or renew attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The lease was granted to this replica.
    Acquired,
    /// Another replica holds the lease.
    HeldElsewhere,
    /// The held lease was extended.
    Renewed,
    /// The lease is no longer ours.
    Lost,
    /// The coordination service could not be reached.
    Failed,
}

// =============================================================================
// Lease Parameters
// =============================================================================

/// Invalid lease timing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseTimingError {
    /// A duration was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Renewal would not complete before the lease expires.
    #[error("renew deadline ({renew_deadline:?}) must be shorter than lease duration ({lease_duration:?})")]
    RenewNotBeforeExpiry {
        /// Configured lease duration.
        lease_duration: Duration,
        /// Configured renew deadline.
        renew_deadline: Duration,
    },
}

/// Lease duration, renew deadline and retry period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

impl LeaseTiming {
    /// Build validated timing.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseTimingError`] if any duration is zero or the renew
    /// deadline is not strictly shorter than the lease duration.
    pub fn new(
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Result<Self, LeaseTimingError> {
        for (name, value) in [
            ("lease duration", lease_duration),
            ("renew deadline", renew_deadline),
            ("retry period", retry_period),
        ] {
            if value.is_zero() {
                return Err(LeaseTimingError::Zero(name));
            }
        }

        if renew_deadline >= lease_duration {
            return Err(LeaseTimingError::RenewNotBeforeExpiry {
                lease_duration,
                renew_deadline,
            });
        }

        Ok(Self {
            lease_duration,
            renew_deadline,
            retry_period,
        })
    }

    /// How long a granted lease stays valid without renewal.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Interval after which a leader must have renewed.
    #[must_use]
    pub const fn renew_deadline(&self) -> Duration {
        self.renew_deadline
    }

    /// Interval between acquisition attempts when not leader.
    #[must_use]
    pub const fn retry_period(&self) -> Duration {
        self.retry_period
    }
}

/// Identity of one lease in the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLease {
    /// Lease object name, `{application}-leader` by default.
    pub name: String,
    /// Namespace the lease lives in.
    pub namespace: String,
    /// This replica's holder identity.
    pub holder: String,
    /// Timing parameters.
    pub timing: LeaseTiming,
}

impl LeaderLease {
    /// Describe a lease held by `holder`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        holder: impl Into<String>,
        timing: LeaseTiming,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            holder: holder.into(),
            timing,
        }
    }

    /// `namespace/name`, for logs.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Tests
// =============================================================================
