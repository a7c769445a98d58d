//! # Lease Store Server
//!
//! Serves a [`MemoryLeaseStore`] over TCP so that candidates on different hosts
//! can share it. Each accepted connection gets its own task that answers
//! requests until the peer hangs up.
//!
//! ```text
//! podmaster (node-a) ──┐
//! podmaster (node-b) ──┼──> StoreServer ──> MemoryLeaseStore
//! podmaster (node-c) ──┘
//! ```

use anyhow::Result;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::{CasOutcome, CreateOutcome, MemoryLeaseStore};
use crate::common::connection::Connection;
use crate::common::messages::Message;

/// TCP front end for a shared [`MemoryLeaseStore`].
pub struct StoreServer {
    listener: TcpListener,
    store: Arc<MemoryLeaseStore>,
}

impl StoreServer {
    /// Bind the listening socket.
    ///
    /// # Arguments
    /// - `address`: Address to listen on, e.g. `"127.0.0.1:4001"` (port 0 picks a free port)
    /// - `store`: Store answering the requests
    pub async fn bind(address: &str, store: Arc<MemoryLeaseStore>) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, store })
    }

    /// Address the server actually listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns `true` or its sender is dropped.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!("📡 Lease store listening on {}", addr),
            Err(e) => warn!("⚠️  Lease store listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        debug!("🔗 Lease store accepted connection from {}", addr);
                        let store = self.store.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, store).await;
                        });
                    }
                    Err(e) => error!("❌ Accept error: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 Lease store shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// Answer requests on one connection until it closes or misbehaves.
async fn handle_connection(socket: TcpStream, store: Arc<MemoryLeaseStore>) {
    let mut conn = Connection::new(socket);

    loop {
        match conn.read_message().await {
            Ok(Some(request)) => {
                let response = answer(&store, request);
                if let Err(e) = conn.write_message(&response).await {
                    error!("❌ Failed to send {} response: {}", response.kind(), e);
                    break;
                }
            }
            Ok(None) => {
                debug!("🔌 Connection closed");
                break;
            }
            Err(e) => {
                error!("❌ Error reading message: {}", e);
                break;
            }
        }
    }
}

/// Map one request onto the store and build its response.
pub fn answer(store: &MemoryLeaseStore, request: Message) -> Message {
    match request {
        Message::Get { key } => match store.get_now(&key) {
            Some(record) => Message::Found { record },
            None => Message::NotFound,
        },

        Message::CreateIfAbsent { key, value, ttl_ms } => {
            if ttl_ms == 0 {
                return Message::Failed {
                    reason: "ttl must be greater than zero".to_string(),
                };
            }
            match store.create_now(&key, &value, Duration::from_millis(ttl_ms)) {
                CreateOutcome::Created(record) => {
                    info!("👑 Lease '{}' created for {}", key, record.holder);
                    Message::Created { record }
                }
                CreateOutcome::AlreadyExists => Message::AlreadyExists,
            }
        }

        Message::CompareAndSwap {
            key,
            expected_value,
            new_value,
            ttl_ms,
            expected_version,
        } => {
            if ttl_ms == 0 {
                return Message::Failed {
                    reason: "ttl must be greater than zero".to_string(),
                };
            }
            match store.swap_now(
                &key,
                &expected_value,
                &new_value,
                Duration::from_millis(ttl_ms),
                expected_version,
            ) {
                CasOutcome::Swapped(record) => {
                    debug!("🔄 Lease '{}' renewed by {}", key, record.holder);
                    Message::Swapped { record }
                }
                CasOutcome::VersionMismatch => Message::VersionMismatch,
            }
        }

        other => {
            warn!("⚠️  Unexpected {} message sent to lease store", other.kind());
            Message::Failed {
                reason: format!("{} is not a request", other.kind()),
            }
        }
    }
}
