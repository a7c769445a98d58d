//! # In-Memory Lease Store
//!
//! A linearizable [`LeaseStore`] living inside one process. Every operation takes
//! the same mutex, so racing writers are serialized and exactly one of them
//! observes the state it expected.
//!
//! Expiry runs on [`tokio::time::Instant`], which makes TTLs controllable from
//! tests with a paused runtime (`tokio::time::advance`). Expired records are
//! treated as absent and dropped lazily on the next access.

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{CasOutcome, CreateOutcome, LeaseRecord, LeaseStore, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    holder: String,
    version: u64,
    expires_at: Instant,
}

impl Entry {
    fn record(&self, now: Instant) -> LeaseRecord {
        LeaseRecord {
            holder: self.holder.clone(),
            version: self.version,
            ttl_remaining: self.expires_at.saturating_duration_since(now),
        }
    }
}

/// `now + ttl`, clamped to roughly thirty years out.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Last version handed out; shared by all keys like a store-wide index
    index: u64,
}

impl Inner {
    /// Live entry for `key`, dropping it first if its TTL has lapsed.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            debug!("⌛ Lease on '{}' expired", key);
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn next_version(&mut self) -> u64 {
        self.index += 1;
        self.index
    }
}

/// In-process lease store with TTL expiry.
///
/// # Example
/// ```ignore
/// let store = MemoryLeaseStore::new();
/// store.create_if_absent("scheduler", "node-a", Duration::from_secs(30)).await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    inner: Mutex<Inner>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means another caller panicked mid-operation;
        // every operation leaves the map consistent before it can panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current holder of `key`, if the lease is live. Handy for assertions.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.lock().live(key, now).map(|entry| entry.holder.clone())
    }

    /// Synchronous form of [`LeaseStore::get`], used by the TCP server.
    pub fn get_now(&self, key: &str) -> Option<LeaseRecord> {
        let now = Instant::now();
        self.lock().live(key, now).map(|entry| entry.record(now))
    }

    /// Synchronous form of [`LeaseStore::create_if_absent`].
    pub fn create_now(&self, key: &str, value: &str, ttl: Duration) -> CreateOutcome {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.live(key, now).is_some() {
            return CreateOutcome::AlreadyExists;
        }

        let entry = Entry {
            holder: value.to_string(),
            version: inner.next_version(),
            expires_at: expiry(now, ttl),
        };
        let record = entry.record(now);
        inner.entries.insert(key.to_string(), entry);
        CreateOutcome::Created(record)
    }

    /// Synchronous form of [`LeaseStore::compare_and_swap`].
    pub fn swap_now(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Duration,
        expected_version: u64,
    ) -> CasOutcome {
        let now = Instant::now();
        let mut inner = self.lock();
        let version = inner.index + 1;

        let Some(entry) = inner.live(key, now) else {
            return CasOutcome::VersionMismatch;
        };
        if entry.version != expected_version || entry.holder != expected_value {
            return CasOutcome::VersionMismatch;
        }

        entry.holder = new_value.to_string();
        entry.version = version;
        entry.expires_at = expiry(now, ttl);
        let record = entry.record(now);
        inner.index = version;
        CasOutcome::Swapped(record)
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn get(&self, key: &str) -> StoreResult<Option<LeaseRecord>> {
        Ok(self.get_now(key))
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<CreateOutcome> {
        Ok(self.create_now(key, value, ttl))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Duration,
        expected_version: u64,
    ) -> StoreResult<CasOutcome> {
        Ok(self.swap_now(key, expected_value, new_value, ttl, expected_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_create_then_get() {
        let store = MemoryLeaseStore::new();
        assert_eq!(store.get("scheduler").await.unwrap(), None);

        let CreateOutcome::Created(created) =
            store.create_if_absent("scheduler", "node-a", TTL).await.unwrap()
        else {
            panic!("first create must win");
        };
        assert_eq!(created.holder, "node-a");
        assert_eq!(created.ttl_remaining, TTL);

        tokio::time::advance(Duration::from_secs(10)).await;
        let record = store.get("scheduler").await.unwrap().unwrap();
        assert_eq!(record.version, created.version);
        assert_eq!(record.ttl_remaining, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_create_loses() {
        let store = MemoryLeaseStore::new();
        store.create_if_absent("scheduler", "node-a", TTL).await.unwrap();

        let outcome = store.create_if_absent("scheduler", "node-b", TTL).await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
        assert_eq!(store.holder("scheduler").as_deref(), Some("node-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_after_ttl() {
        let store = MemoryLeaseStore::new();
        store.create_if_absent("scheduler", "node-a", TTL).await.unwrap();

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert!(store.get("scheduler").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("scheduler").await.unwrap(), None);

        let outcome = store.create_if_absent("scheduler", "node-b", TTL).await.unwrap();
        assert!(matches!(outcome, CreateOutcome::Created(ref r) if r.holder == "node-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_requires_matching_version_and_holder() {
        let store = MemoryLeaseStore::new();
        let CreateOutcome::Created(created) =
            store.create_if_absent("scheduler", "node-a", TTL).await.unwrap()
        else {
            panic!("first create must win");
        };

        let stale = store
            .compare_and_swap("scheduler", "node-a", "node-a", TTL, created.version + 1)
            .await
            .unwrap();
        assert_eq!(stale, CasOutcome::VersionMismatch);

        let wrong_holder = store
            .compare_and_swap("scheduler", "node-b", "node-b", TTL, created.version)
            .await
            .unwrap();
        assert_eq!(wrong_holder, CasOutcome::VersionMismatch);

        tokio::time::advance(Duration::from_secs(20)).await;
        let CasOutcome::Swapped(renewed) = store
            .compare_and_swap("scheduler", "node-a", "node-a", TTL, created.version)
            .await
            .unwrap()
        else {
            panic!("matching swap must succeed");
        };
        assert!(renewed.version > created.version);
        assert_eq!(renewed.ttl_remaining, TTL);

        // The old version is now stale.
        let again = store
            .compare_and_swap("scheduler", "node-a", "node-a", TTL, created.version)
            .await
            .unwrap();
        assert_eq!(again, CasOutcome::VersionMismatch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_on_expired_key_mismatches() {
        let store = MemoryLeaseStore::new();
        let CreateOutcome::Created(created) =
            store.create_if_absent("scheduler", "node-a", TTL).await.unwrap()
        else {
            panic!("first create must win");
        };

        tokio::time::advance(TTL).await;
        let outcome = store
            .compare_and_swap("scheduler", "node-a", "node-a", TTL, created.version)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::VersionMismatch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let store = MemoryLeaseStore::new();
        store.create_if_absent("scheduler", "node-a", TTL).await.unwrap();
        store
            .create_if_absent("controller-manager", "node-b", TTL)
            .await
            .unwrap();

        assert_eq!(store.holder("scheduler").as_deref(), Some("node-a"));
        assert_eq!(store.holder("controller-manager").as_deref(), Some("node-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_is_clamped() {
        let store = MemoryLeaseStore::new();
        let outcome = store
            .create_if_absent("scheduler", "node-a", Duration::MAX)
            .await
            .unwrap();

        assert!(matches!(outcome, CreateOutcome::Created(_)));
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(store.holder("scheduler").as_deref(), Some("node-a"));
    }
}
