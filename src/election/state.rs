//! # Local Lease State
//!
//! What this process believes about its own role, updated once per loop tick
//! from the engine's result. Nothing here is shared with other processes or
//! persisted; a restarted candidate begins in [`Role::Unknown`].
//!
//! ## Transitions
//!
//! ```text
//!              acquire                      lease lost / other holder / TTL fallback
//!   Unknown ───────────> Master ─────────────────────────────────────────> Follower
//!      │                   ^                                                  │
//!      │ other holder      └──────────────────── acquire ─────────────────────┘
//!      └──────────────────────────────────────────────────────────────────> Follower
//! ```
//!
//! A store failure never promotes anyone. A master keeps its role through store
//! failures only while less than one TTL has passed since its last successful
//! renewal; from then on the lease may have lapsed in the store and another
//! candidate may already hold it.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::engine::{ElectionError, ElectionOutcome};

/// Role of this candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No definite answer yet since start-up
    #[default]
    Unknown,
    Master,
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unknown => write!(f, "unknown"),
            Role::Master => write!(f, "master"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

/// Role change produced by [`LocalLeaseState::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Role,
    pub to: Role,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Process-local view of the lease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalLeaseState {
    last_successful_renewal: Option<Instant>,
    role: Role,
}

impl LocalLeaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn believed_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn last_successful_renewal(&self) -> Option<Instant> {
        self.last_successful_renewal
    }

    /// Whether a lease renewed at our last successful renewal is still within
    /// its TTL at `now`.
    pub fn within_ttl(&self, now: Instant, ttl: Duration) -> bool {
        self.last_successful_renewal
            .is_some_and(|renewed| now.saturating_duration_since(renewed) < ttl)
    }

    /// Fold one election result into the state.
    ///
    /// # Arguments
    /// - `result`: What [`ElectionEngine::acquire_or_renew`](super::ElectionEngine::acquire_or_renew) returned
    /// - `now`: Instant the result was observed
    /// - `ttl`: Configured lease TTL
    ///
    /// # Rules
    /// - `Master`: adopt, remember the renewal instant
    /// - `Follower`: adopt
    /// - `LeaseLost`: follower immediately
    /// - Store failure: keep the previous role while within the TTL of the
    ///   last successful renewal, otherwise give up mastership
    pub fn observe(
        &mut self,
        result: &Result<ElectionOutcome, ElectionError>,
        now: Instant,
        ttl: Duration,
    ) -> Transition {
        let from = self.role;

        match result {
            Ok(ElectionOutcome::Master { renewed_at, .. }) => {
                self.role = Role::Master;
                self.last_successful_renewal = Some(*renewed_at);
            }
            Ok(ElectionOutcome::Follower { .. }) => {
                self.role = Role::Follower;
                self.last_successful_renewal = None;
            }
            Err(ElectionError::LeaseLost { .. }) => {
                self.role = Role::Follower;
                self.last_successful_renewal = None;
            }
            Err(ElectionError::Store(_)) => {
                if self.role == Role::Master && !self.within_ttl(now, ttl) {
                    self.role = Role::Follower;
                    self.last_successful_renewal = None;
                }
            }
        }

        Transition {
            from,
            to: self.role,
        }
    }
}
