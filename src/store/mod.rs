//! # Lease Store
//!
//! The election is built entirely on a linearizable key-value store offering three
//! operations. Whatever backs the trait must guarantee that, among racing
//! `create_if_absent` or `compare_and_swap` calls against the same key and
//! version, at most one succeeds. Mutual exclusion between candidates rests on
//! that property alone.
//!
//! ## Implementations
//!
//! - [`MemoryLeaseStore`]: in-process store with TTL expiry on the tokio clock
//! - [`TcpLeaseStore`]: client for a [`StoreServer`] reachable over TCP
//!
//! Lost races are reported as values ([`CreateOutcome::AlreadyExists`],
//! [`CasOutcome::VersionMismatch`], `Ok(None)` from `get`). [`StoreError`] is
//! reserved for failing to talk to the store at all.

pub mod client;
pub mod memory;
pub mod server;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use client::TcpLeaseStore;
pub use memory::MemoryLeaseStore;
pub use server::StoreServer;

/// A live lease as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Identity of the candidate holding the lease
    pub holder: String,
    /// Opaque token that changes on every successful write
    pub version: u64,
    /// Time left before the store expires the record
    pub ttl_remaining: Duration,
}

/// Result of [`LeaseStore::create_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(LeaseRecord),
    /// Another candidate created the key first
    AlreadyExists,
}

/// Result of [`LeaseStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped(LeaseRecord),
    /// The record changed, expired, or disappeared since it was read
    VersionMismatch,
}

/// Failure to get a definite answer from the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("lease store unreachable: {0}")]
    Unavailable(String),

    #[error("lease store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("lease store protocol error: {0}")]
    Protocol(String),

    #[error("lease store rejected request: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Linearizable lease storage shared by all candidates.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the live record for `key`, `None` if it is absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<LeaseRecord>>;

    /// Create the record for `key` only if no live record exists.
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<CreateOutcome>;

    /// Replace the record for `key` only if its holder is `expected_value` and
    /// its version is `expected_version`. Success resets the TTL.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Duration,
        expected_version: u64,
    ) -> StoreResult<CasOutcome>;
}

#[async_trait]
impl<S: LeaseStore + ?Sized> LeaseStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<LeaseRecord>> {
        (**self).get(key).await
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<CreateOutcome> {
        (**self).create_if_absent(key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Duration,
        expected_version: u64,
    ) -> StoreResult<CasOutcome> {
        (**self)
            .compare_and_swap(key, expected_value, new_value, ttl, expected_version)
            .await
    }
}
