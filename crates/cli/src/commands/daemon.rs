//! `temple daemon` — Background enrichment and session cleanup.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{open_broker, Invocation};

pub async fn run(invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Arc::new(open_broker(invocation).await?);
    let config = broker.config();

    println!("🏛️  Temple Daemon — Starting");
    println!("   Data dir:  {}", config.data_dir.display());
    println!("   Poll:      {} ms", config.ingest.poll_interval_ms);
    println!(
        "   Sweep:     every {} s",
        config.ingest.session_sweep_interval_secs
    );
    println!(
        "   Extract:   {}",
        config.extraction.backends.join(" → ")
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = broker.spawn_worker(shutdown_rx.clone());
    let sweeper = broker.clone().spawn_sweeper(
        Duration::from_secs(config.ingest.session_sweep_interval_secs.max(1)),
        shutdown_rx,
    );
    info!("Enrichment worker and session sweeper started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, finishing the current item");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("worker", worker), ("sweeper", sweeper)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }
    println!("👋 Daemon stopped.");
    Ok(())
}
