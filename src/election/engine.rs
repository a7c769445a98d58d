//! # Election Engine
//!
//! Decides, once per call, whether this candidate holds the lease for its key,
//! acquiring a free lease or renewing its own as needed.
//!
//! ## Algorithm
//!
//! 1. Read the key
//! 2. **Absent**: race to create it. Winning makes us master; losing to another
//!    creator is a plain follower result
//! 3. **Ours**: with at least half the TTL left, nothing to do. Otherwise
//!    compare-and-swap on the observed version to push the expiry out again.
//!    A mismatch means someone else wrote the key first: the lease is lost
//! 4. **Someone else's**: follower
//!
//! Renewing at half the TTL leaves a whole renewal cycle of slack before the
//! store would expire the record.

use log::{debug, info};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{CasOutcome, CreateOutcome, LeaseStore, StoreError};

/// What a successful master outcome did to the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    /// Created a previously free lease
    Acquired,
    /// Extended our lease with a compare-and-swap
    Renewed,
    /// Our lease still had at least half its TTL; no write
    Held,
}

/// Successful result of [`ElectionEngine::acquire_or_renew`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Master {
        action: LeaseAction,
        /// Instant from which the store counts the current lease's TTL, as
        /// seen from this process (never later than the store's own view)
        renewed_at: Instant,
    },
    Follower {
        /// Current holder, when the store told us
        holder: Option<String>,
    },
}

impl ElectionOutcome {
    pub fn is_master(&self) -> bool {
        matches!(self, ElectionOutcome::Master { .. })
    }
}

/// Failure of [`ElectionEngine::acquire_or_renew`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElectionError {
    /// Our renewal lost a compare-and-swap: another writer got there first.
    #[error("lease on '{key}' was lost while renewing")]
    LeaseLost { key: String },

    /// The store could not be reached or gave no definite answer.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Acquires or renews the lease on `key` for `identity`.
///
/// # Example
/// ```ignore
/// let engine = ElectionEngine::new(store, "node-a", "scheduler", Duration::from_secs(30));
/// match engine.acquire_or_renew().await {
///     Ok(outcome) if outcome.is_master() => println!("we are master"),
///     Ok(_) => println!("someone else is master"),
///     Err(e) => println!("election failed: {}", e),
/// }
/// ```
#[derive(Debug)]
pub struct ElectionEngine<S> {
    store: S,
    identity: String,
    key: String,
    ttl: Duration,
}

impl<S: LeaseStore> ElectionEngine<S> {
    pub fn new(store: S, identity: impl Into<String>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            identity: identity.into(),
            key: key.into(),
            ttl,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run one round of the election. See the module docs for the algorithm.
    pub async fn acquire_or_renew(&self) -> Result<ElectionOutcome, ElectionError> {
        let current = self.store.get(&self.key).await?;

        let Some(record) = current else {
            // No current master; create fails if someone beats us to it.
            let started = Instant::now();
            return match self
                .store
                .create_if_absent(&self.key, &self.identity, self.ttl)
                .await?
            {
                CreateOutcome::Created(record) => {
                    info!(
                        "👑 {} acquired lease '{}' (version {})",
                        self.identity, self.key, record.version
                    );
                    Ok(ElectionOutcome::Master {
                        action: LeaseAction::Acquired,
                        renewed_at: started,
                    })
                }
                CreateOutcome::AlreadyExists => {
                    info!(
                        "🏁 {} lost the race to create lease '{}'",
                        self.identity, self.key
                    );
                    Ok(ElectionOutcome::Follower { holder: None })
                }
            };
        };

        if record.holder != self.identity {
            debug!(
                "👥 Lease '{}' is held by {}, standing by",
                self.key, record.holder
            );
            return Ok(ElectionOutcome::Follower {
                holder: Some(record.holder),
            });
        }

        debug!("✅ Lease '{}' is still ours ({})", self.key, record.holder);

        if record.ttl_remaining >= self.ttl / 2 {
            let now = Instant::now();
            let elapsed = self.ttl.saturating_sub(record.ttl_remaining);
            return Ok(ElectionOutcome::Master {
                action: LeaseAction::Held,
                renewed_at: now.checked_sub(elapsed).unwrap_or(now),
            });
        }

        let started = Instant::now();
        match self
            .store
            .compare_and_swap(
                &self.key,
                &self.identity,
                &self.identity,
                self.ttl,
                record.version,
            )
            .await?
        {
            CasOutcome::Swapped(renewed) => {
                debug!(
                    "🔄 {} renewed lease '{}' (version {} -> {})",
                    self.identity, self.key, record.version, renewed.version
                );
                Ok(ElectionOutcome::Master {
                    action: LeaseAction::Renewed,
                    renewed_at: started,
                })
            }
            CasOutcome::VersionMismatch => Err(ElectionError::LeaseLost {
                key: self.key.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LeaseRecord, MemoryLeaseStore, StoreResult};
    use async_trait::async_trait;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(30);

    fn engine(store: &Arc<MemoryLeaseStore>, identity: &str) -> ElectionEngine<Arc<MemoryLeaseStore>> {
        ElectionEngine::new(store.clone(), identity, "scheduler", TTL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_lease_is_acquired() {
        let store = Arc::new(MemoryLeaseStore::new());
        let now = Instant::now();

        let outcome = engine(&store, "node-a").acquire_or_renew().await.unwrap();

        assert_eq!(
            outcome,
            ElectionOutcome::Master {
                action: LeaseAction::Acquired,
                renewed_at: now,
            }
        );
        assert_eq!(store.holder("scheduler").as_deref(), Some("node-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_holder_makes_us_follower() {
        let store = Arc::new(MemoryLeaseStore::new());
        engine(&store, "node-a").acquire_or_renew().await.unwrap();

        let outcome = engine(&store, "node-b").acquire_or_renew().await.unwrap();

        assert_eq!(
            outcome,
            ElectionOutcome::Follower {
                holder: Some("node-a".to_string())
            }
        );
        assert_eq!(store.holder("scheduler").as_deref(), Some("node-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_lease_is_held_without_writing() {
        let store = Arc::new(MemoryLeaseStore::new());
        let a = engine(&store, "node-a");
        let acquired_at = Instant::now();
        a.acquire_or_renew().await.unwrap();
        let version = store.get_now("scheduler").unwrap().version;

        tokio::time::advance(Duration::from_secs(15)).await;
        let outcome = a.acquire_or_renew().await.unwrap();

        assert_eq!(
            outcome,
            ElectionOutcome::Master {
                action: LeaseAction::Held,
                renewed_at: acquired_at,
            }
        );
        assert_eq!(store.get_now("scheduler").unwrap().version, version);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_renewed_below_half_ttl() {
        let store = Arc::new(MemoryLeaseStore::new());
        let a = engine(&store, "node-a");
        a.acquire_or_renew().await.unwrap();
        let version = store.get_now("scheduler").unwrap().version;

        tokio::time::advance(Duration::from_secs(16)).await;
        let renewed_at = Instant::now();
        let outcome = a.acquire_or_renew().await.unwrap();

        assert_eq!(
            outcome,
            ElectionOutcome::Master {
                action: LeaseAction::Renewed,
                renewed_at,
            }
        );
        let record = store.get_now("scheduler").unwrap();
        assert!(record.version > version);
        assert_eq!(record.ttl_remaining, TTL);
    }

    /// Store whose record changes between our read and our swap.
    struct RacingStore {
        inner: MemoryLeaseStore,
    }

    #[async_trait]
    impl LeaseStore for RacingStore {
        async fn get(&self, key: &str) -> StoreResult<Option<LeaseRecord>> {
            self.inner.get(key).await
        }

        async fn create_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> StoreResult<CreateOutcome> {
            self.inner.create_if_absent(key, value, ttl).await
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected_value: &str,
            _new_value: &str,
            _ttl: Duration,
            _expected_version: u64,
        ) -> StoreResult<CasOutcome> {
            Ok(CasOutcome::VersionMismatch)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_swap_is_lease_loss() {
        let store = RacingStore {
            inner: MemoryLeaseStore::new(),
        };
        store.inner.create_now("scheduler", "node-a", TTL);
        tokio::time::advance(Duration::from_secs(20)).await;

        let err = ElectionEngine::new(store, "node-a", "scheduler", TTL)
            .acquire_or_renew()
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ElectionError::LeaseLost {
                key: "scheduler".to_string()
            }
        );
    }

    /// Store where the key always looks free but creation always loses.
    struct CrowdedStore;

    #[async_trait]
    impl LeaseStore for CrowdedStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<LeaseRecord>> {
            Ok(None)
        }

        async fn create_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> StoreResult<CreateOutcome> {
            Ok(CreateOutcome::AlreadyExists)
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected_value: &str,
            _new_value: &str,
            _ttl: Duration,
            _expected_version: u64,
        ) -> StoreResult<CasOutcome> {
            Err(StoreError::Unavailable("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_lost_create_race_is_not_an_error() {
        let outcome = ElectionEngine::new(CrowdedStore, "node-b", "scheduler", TTL)
            .acquire_or_renew()
            .await
            .unwrap();

        assert_eq!(outcome, ElectionOutcome::Follower { holder: None });
    }

    /// Store that is always down.
    struct DownStore;

    #[async_trait]
    impl LeaseStore for DownStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<LeaseRecord>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn create_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> StoreResult<CreateOutcome> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected_value: &str,
            _new_value: &str,
            _ttl: Duration,
            _expected_version: u64,
        ) -> StoreResult<CasOutcome> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_a_store_error() {
        let err = ElectionEngine::new(DownStore, "node-a", "scheduler", TTL)
            .acquire_or_renew()
            .await
            .unwrap_err();

        assert!(matches!(err, ElectionError::Store(StoreError::Unavailable(_))));
    }
}
