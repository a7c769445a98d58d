//! # Loop Driver
//!
//! Ties election and reconciliation together. Every tick:
//!
//! 1. Run one election round, bounded by the round timeout
//! 2. Fold the result into [`LocalLeaseState`] (including the TTL fail-safe
//!    when the store cannot be reached)
//! 3. Reconcile the managed file against the resulting role, logging any error
//! 4. Wait for the poll interval, or stop if shutdown was requested
//!
//! Time comes from tokio's clock, so tests can pause it and single-step
//! [`LoopDriver::tick`].

use log::{debug, error, info, warn};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::election::{ElectionEngine, ElectionError, LocalLeaseState, Role, Transition};
use crate::reconciler::{ArtifactFs, LocalFs, ReconcileAction, Reconciler};
use crate::store::{LeaseStore, StoreError};

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub transition: Transition,
    /// `None` when reconciliation failed
    pub action: Option<ReconcileAction>,
}

impl TickReport {
    pub fn role(&self) -> Role {
        self.transition.to
    }
}

/// Runs the election loop for one candidate.
///
/// # Example
/// ```ignore
/// let (tx, rx) = watch::channel(false);
/// let driver = LoopDriver::new(engine, reconciler, Duration::from_secs(5), Duration::from_secs(5));
/// tokio::spawn(driver.run(rx));
/// // ... later
/// tx.send(true)?;
/// ```
pub struct LoopDriver<S, F = LocalFs> {
    engine: ElectionEngine<S>,
    reconciler: Reconciler<F>,
    state: LocalLeaseState,
    interval: Duration,
    round_timeout: Duration,
    startup_jitter: Duration,
}

impl<S: LeaseStore, F: ArtifactFs> LoopDriver<S, F> {
    /// # Arguments
    /// - `engine`: Election engine for this candidate
    /// - `reconciler`: Keeps the managed file in line with the role
    /// - `interval`: Pause between ticks
    /// - `round_timeout`: Bound on one whole election round, which may make two store
    ///   calls; running out counts as a store failure
    pub fn new(
        engine: ElectionEngine<S>,
        reconciler: Reconciler<F>,
        interval: Duration,
        round_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            reconciler,
            state: LocalLeaseState::new(),
            interval,
            round_timeout,
            startup_jitter: Duration::ZERO,
        }
    }

    /// Wait a random delay up to `jitter` before the first tick of [`run`](Self::run).
    pub fn with_startup_jitter(mut self, jitter: Duration) -> Self {
        self.startup_jitter = jitter;
        self
    }

    pub fn state(&self) -> &LocalLeaseState {
        &self.state
    }

    /// Run one iteration: elect, update the local state, reconcile.
    pub async fn tick(&mut self) -> TickReport {
        let result =
            match tokio::time::timeout(self.round_timeout, self.engine.acquire_or_renew()).await {
                Ok(result) => result,
                Err(_) => Err(ElectionError::Store(StoreError::Timeout(self.round_timeout))),
            };
        let now = Instant::now();

        match &result {
            Err(ElectionError::Store(e)) => {
                error!("❌ Error in master election: {}", e);
            }
            Err(e @ ElectionError::LeaseLost { .. }) => {
                warn!("⚠️  {}", e);
            }
            Ok(_) => {}
        }

        let transition = self.state.observe(&result, now, self.engine.ttl());

        if matches!(result, Err(ElectionError::Store(_)))
            && transition.from == Role::Master
            && transition.to == Role::Follower
        {
            info!("⌛ Too much time has elapsed, giving up lease.");
        }

        if transition.changed() {
            info!(
                "🔁 {} is now {} for '{}' (was {})",
                self.engine.identity(),
                transition.to,
                self.engine.key(),
                transition.from
            );
        } else {
            debug!(
                "{} remains {} for '{}'",
                self.engine.identity(),
                transition.to,
                self.engine.key()
            );
        }

        let action = match self.reconciler.reconcile(self.state.believed_master()).await {
            Ok(action) => Some(action),
            Err(e) => {
                error!("❌ Error updating files: {}", e);
                None
            }
        };

        TickReport { transition, action }
    }

    /// Tick until `shutdown` turns `true` or its sender is dropped.
    ///
    /// The managed file is left as it is on shutdown; the lease runs out in the
    /// store and the next master takes over.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LocalLeaseState {
        info!(
            "🚀 {} campaigning for '{}' (ttl {:?}, interval {:?})",
            self.engine.identity(),
            self.engine.key(),
            self.engine.ttl(),
            self.interval
        );

        if !self.startup_jitter.is_zero() {
            let delay = rand::thread_rng().gen_range(Duration::ZERO..=self.startup_jitter);
            if wait_or_shutdown(delay, &mut shutdown).await {
                return self.state;
            }
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("🛑 {} stopped as {}", self.engine.identity(), self.state.role());
        self.state
    }
}

/// Sleep for `delay`; returns `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
