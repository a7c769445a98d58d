//! # Master Election
//!
//! - [`engine`]: one round of acquire-or-renew against the lease store
//! - [`state`]: this process's belief about its role, with the TTL fail-safe

pub mod engine;
pub mod state;

pub use engine::{ElectionEngine, ElectionError, ElectionOutcome, LeaseAction};
pub use state::{LocalLeaseState, Role, Transition};
