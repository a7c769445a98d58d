//! # Lease Store Binary Entry Point
//!
//! Serves an in-memory lease store over TCP for `podmaster` candidates.
//!
//! ## Usage
//!
//! ```bash
//! lease_store --listen 0.0.0.0:4001
//! ```
//!
//! The store lives in this process only; restarting it frees every lease.

use clap::Parser;
use log::error;
use std::sync::Arc;

use podmaster::common::logging::init_logger;
use podmaster::store::{MemoryLeaseStore, StoreServer};

/// Command-line arguments for the lease store binary
#[derive(Parser, Debug)]
#[command(author, version, about = "In-memory lease store for podmaster", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:4001")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let store = Arc::new(MemoryLeaseStore::new());
    let server = StoreServer::bind(&args.listen, store).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("❌ Cannot listen for Ctrl-C: {}", e);
                // Dropping the sender would stop the server.
                std::future::pending::<()>().await;
            }
        }
    });

    server.serve(shutdown_rx).await;

    Ok(())
}
