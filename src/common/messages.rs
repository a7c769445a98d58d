//! # Message Protocol
//!
//! Defines the messages exchanged between a [`TcpLeaseStore`](crate::store::TcpLeaseStore)
//! client and a [`StoreServer`](crate::store::StoreServer):
//! - Lease reads (`Get`)
//! - Lease acquisition (`CreateIfAbsent`)
//! - Lease renewal (`CompareAndSwap`)
//!
//! Messages are serialized to JSON and sent over TCP with a 4-byte length prefix.
//! Every request is answered by exactly one response on the same connection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::store::LeaseRecord;

// ============================================================================
// MESSAGE TYPES - Lease store requests and responses
// ============================================================================

/// Core message enum for all communication with the lease store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== REQUESTS ==========
    /// **Get**
    ///
    /// Read the current lease record for `key`.
    ///
    /// # Responses
    /// - `Found` when a live record exists
    /// - `NotFound` when the key is absent or its TTL has lapsed
    Get { key: String },

    /// **Create If Absent**
    ///
    /// Create the record for `key` holding `value`, only if no live record exists.
    ///
    /// # Fields
    /// - `key`: Election key
    /// - `value`: Identity of the candidate claiming the lease
    /// - `ttl_ms`: Lease lifetime in milliseconds
    ///
    /// # Responses
    /// - `Created` when this request won
    /// - `AlreadyExists` when another candidate got there first
    CreateIfAbsent {
        key: String,
        value: String,
        ttl_ms: u64,
    },

    /// **Compare And Swap**
    ///
    /// Replace the record for `key` only if both its holder and its version
    /// still match what the caller last observed. A successful swap resets the TTL.
    ///
    /// # Responses
    /// - `Swapped` on success
    /// - `VersionMismatch` when the record changed, expired, or vanished
    CompareAndSwap {
        key: String,
        expected_value: String,
        new_value: String,
        ttl_ms: u64,
        expected_version: u64,
    },

    // ========== RESPONSES ==========
    /// Live record returned for a `Get`
    Found { record: LeaseRecord },

    /// No live record for the requested key
    NotFound,

    /// Record written by a `CreateIfAbsent`
    Created { record: LeaseRecord },

    /// A `CreateIfAbsent` lost the race
    AlreadyExists,

    /// Record written by a `CompareAndSwap`
    Swapped { record: LeaseRecord },

    /// A `CompareAndSwap` did not match the stored record
    VersionMismatch,

    /// **Failed**
    ///
    /// The server could not handle the request (unexpected message kind, bad TTL).
    ///
    /// # Fields
    /// - `reason`: Human readable explanation, logged by the client
    Failed { reason: String },
}

impl Message {
    /// Serialize a message to JSON bytes for transmission over the network.
    ///
    /// # Returns
    /// - `Ok(Vec<u8>)`: JSON-encoded message bytes
    /// - `Err`: Serialization error
    ///
    /// # Example
    /// ```ignore
    /// let msg = Message::Get { key: "scheduler".to_string() };
    /// let bytes = msg.to_bytes()?;
    /// ```
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a message from JSON bytes received from the network.
    ///
    /// # Arguments
    /// - `bytes`: JSON-encoded message data
    ///
    /// # Returns
    /// - `Ok(Message)`: Deserialized message
    /// - `Err`: Deserialization error
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Short name of the message variant, used in log lines and error reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Get { .. } => "Get",
            Message::CreateIfAbsent { .. } => "CreateIfAbsent",
            Message::CompareAndSwap { .. } => "CompareAndSwap",
            Message::Found { .. } => "Found",
            Message::NotFound => "NotFound",
            Message::Created { .. } => "Created",
            Message::AlreadyExists => "AlreadyExists",
            Message::Swapped { .. } => "Swapped",
            Message::VersionMismatch => "VersionMismatch",
            Message::Failed { .. } => "Failed",
        }
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Convert a TTL to whole milliseconds for the wire, saturating at `u64::MAX`.
pub fn ttl_to_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}
