//! # Common Components
//!
//! Shared utilities used by both the `podmaster` candidate daemon and the
//! `lease_store` server.
//!
//! ## Modules
//!
//! - [`messages`]: Lease store wire protocol
//! - [`connection`]: TCP connection abstraction with message framing
//! - [`config`]: Command-line and TOML configuration for the candidate daemon
//! - [`logging`]: Logger initialisation shared by the binaries

pub mod config;
pub mod connection;
pub mod logging;
pub mod messages;
