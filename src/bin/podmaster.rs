//! # podmaster Binary Entry Point
//!
//! Thin wrapper that campaigns for a lease-lock in the shared lease store and keeps
//! a file present on this host only while it holds the lock.
//!
//! ## Usage
//!
//! ```bash
//! podmaster --store-endpoints=127.0.0.1:4001 --key=scheduler \
//!   --source-file=/kubernetes/kube-scheduler.manifest \
//!   --dest-file=/manifests/kube-scheduler.manifest
//! ```
//!
//! The daemon will:
//! 1. Resolve flags (and the optional `--config` TOML file), exiting nonzero if anything required is missing
//! 2. Connect to the lease store lazily, per call
//! 3. Acquire or renew the lease every `--sleep-secs`
//! 4. Copy or remove the destination file to match its role
//! 5. Stop on Ctrl-C or SIGTERM

use clap::Parser;
use log::info;

use podmaster::common::config::{load_config, CliArgs, FileConfig, PodMasterConfig};
use podmaster::common::logging::init_logger;
use podmaster::reconciler::{LocalFs, ManagedArtifact, Reconciler};
use podmaster::store::TcpLeaseStore;
use podmaster::{ElectionEngine, LoopDriver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = CliArgs::parse();
    let file: FileConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    let config = PodMasterConfig::resolve(&args, file)?;

    info!(
        "🗳️  {} using lease store {}",
        config.identity,
        config.endpoints.join(",")
    );

    let store = TcpLeaseStore::new(config.endpoints.clone(), config.store_timeout);
    let engine = ElectionEngine::new(store, config.identity.clone(), config.key.clone(), config.ttl);
    let reconciler = Reconciler::new(LocalFs, ManagedArtifact::new(config.source.clone(), config.dest.clone()));
    let driver = LoopDriver::new(engine, reconciler, config.interval, config.round_timeout())
        .with_startup_jitter(config.startup_jitter);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    driver.run(shutdown_rx).await;

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => log::warn!("⚠️  Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("❌ Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
