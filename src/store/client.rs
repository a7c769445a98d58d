//! # TCP Lease Store Client
//!
//! [`LeaseStore`] implementation talking to one or more [`StoreServer`](super::StoreServer)
//! endpoints.
//!
//! ## Fault Handling
//!
//! - Each call opens a connection to the last endpoint that answered, falling
//!   through the list in order when a connection cannot be established
//! - An endpoint that fails after accepting the connection loses its place;
//!   the following call starts at the next one
//! - Connecting and the request/response exchange are each bounded by the
//!   configured timeout
//! - Writes are never replayed against another endpoint once sent; the failure
//!   is returned and the next loop tick retries. Reads (`get`) move on to the
//!   next endpoint within the same call

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

use super::{CasOutcome, CreateOutcome, LeaseRecord, LeaseStore, StoreError, StoreResult};
use crate::common::connection::Connection;
use crate::common::messages::{ttl_to_millis, Message};

/// Networked lease store client.
///
/// # Example
/// ```ignore
/// let store = TcpLeaseStore::new(
///     vec!["10.0.0.1:4001".to_string(), "10.0.0.2:4001".to_string()],
///     Duration::from_secs(5),
/// );
/// let record = store.get("scheduler").await?;
/// ```
#[derive(Debug)]
pub struct TcpLeaseStore {
    endpoints: Vec<String>,
    timeout: Duration,
    /// Index of the endpoint the next call tries first
    preferred: AtomicUsize,
}

impl TcpLeaseStore {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self {
            endpoints,
            timeout,
            preferred: AtomicUsize::new(0),
        }
    }

    /// Send one request and wait for its response.
    ///
    /// `idempotent` requests that fail after connecting are retried on the
    /// next endpoint within the same call; others return the failure.
    async fn call(&self, request: Message, idempotent: bool) -> StoreResult<Message> {
        if self.endpoints.is_empty() {
            return Err(StoreError::Unavailable(
                "no store endpoints configured".to_string(),
            ));
        }

        let count = self.endpoints.len();
        let start = self.preferred.load(Ordering::Relaxed) % count;
        let mut last_error = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            let address = &self.endpoints[index];

            let stream =
                match tokio::time::timeout(self.timeout, TcpStream::connect(address)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        warn!("⚠️  Lease store {} unreachable: {}", address, e);
                        last_error = Some(StoreError::Unavailable(format!("{}: {}", address, e)));
                        continue;
                    }
                    Err(_) => {
                        warn!("⚠️  Connecting to lease store {} timed out", address);
                        last_error = Some(StoreError::Timeout(self.timeout));
                        continue;
                    }
                };

            match self.round_trip(stream, &request).await {
                Ok(response) => {
                    if index != start {
                        debug!("🔀 Switching lease store endpoint to {}", address);
                    }
                    self.preferred.store(index, Ordering::Relaxed);
                    return Ok(response);
                }
                Err(e @ (StoreError::Unavailable(_) | StoreError::Timeout(_))) => {
                    warn!("⚠️  Lease store {} failed mid-request: {}", address, e);
                    // The next call starts past the failing endpoint either way.
                    self.preferred.store((index + 1) % count, Ordering::Relaxed);
                    if !idempotent {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StoreError::Unavailable("no store endpoint answered".to_string())
        }))
    }

    async fn round_trip(&self, stream: TcpStream, request: &Message) -> StoreResult<Message> {
        let mut conn = Connection::new(stream);
        let exchange = async {
            conn.write_message(request).await?;
            conn.read_message().await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Some(Message::Failed { reason }))) => Err(StoreError::Rejected(reason)),
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(StoreError::Unavailable(
                "connection closed before a response arrived".to_string(),
            )),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn unexpected(request: &str, response: &Message) -> StoreError {
    StoreError::Protocol(format!(
        "unexpected {} response to {}",
        response.kind(),
        request
    ))
}

#[async_trait]
impl LeaseStore for TcpLeaseStore {
    async fn get(&self, key: &str) -> StoreResult<Option<LeaseRecord>> {
        let response = self
            .call(
                Message::Get {
                    key: key.to_string(),
                },
                true,
            )
            .await?;

        match response {
            Message::Found { record } => Ok(Some(record)),
            Message::NotFound => Ok(None),
            other => Err(unexpected("Get", &other)),
        }
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<CreateOutcome> {
        let response = self
            .call(
                Message::CreateIfAbsent {
                    key: key.to_string(),
                    value: value.to_string(),
                    ttl_ms: ttl_to_millis(ttl),
                },
                false,
            )
            .await?;

        match response {
            Message::Created { record } => Ok(CreateOutcome::Created(record)),
            Message::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
            other => Err(unexpected("CreateIfAbsent", &other)),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_value: &str,
        new_value: &str,
        ttl: Duration,
        expected_version: u64,
    ) -> StoreResult<CasOutcome> {
        let response = self
            .call(
                Message::CompareAndSwap {
                    key: key.to_string(),
                    expected_value: expected_value.to_string(),
                    new_value: new_value.to_string(),
                    ttl_ms: ttl_to_millis(ttl),
                    expected_version,
                },
                false,
            )
            .await?;

        match response {
            Message::Swapped { record } => Ok(CasOutcome::Swapped(record)),
            Message::VersionMismatch => Ok(CasOutcome::VersionMismatch),
            other => Err(unexpected("CompareAndSwap", &other)),
        }
    }
}
