//! # podmaster
//!
//! Keeps exactly one of N cooperating processes acting as master for an
//! election key, and makes a managed file track that role: present on the
//! master, absent everywhere else.
//!
//! Typical usage is to copy a Pod manifest from a staging directory into the
//! kubelet's manifest directory on whichever node currently holds the lease.
//!
//! ## Modules
//!
//! - [`store`]: the lease store contract plus in-memory and TCP implementations
//! - [`election`]: acquire-or-renew rounds and the local role state machine
//! - [`reconciler`]: file presence follows the role
//! - [`driver`]: the loop tying them together
//! - [`common`]: configuration, logging, and the wire protocol

pub mod common;
pub mod driver;
pub mod election;
pub mod reconciler;
pub mod store;

pub use driver::{LoopDriver, TickReport};
pub use election::{ElectionEngine, ElectionError, ElectionOutcome, LocalLeaseState, Role};
pub use reconciler::{ManagedArtifact, Reconciler};
pub use store::{LeaseRecord, LeaseStore};
