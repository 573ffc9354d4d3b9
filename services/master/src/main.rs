//! flotilla master.
//!
//! Boots the allocator actor and logs the offers it emits. The surrounding
//! protocol surface (agent sessions, framework sessions, offer rescinds)
//! feeds the actor through its event handle.

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flotilla_master::{allocator, MasterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = MasterConfig::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting flotilla master");
    info!(
        batch_seconds = config.batch_seconds,
        min_cpus = config.min_cpus,
        min_mem_mib = config.min_mem_mib,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_handle, mut offers, actor) = allocator::spawn(config, shutdown_rx);

    // Until the protocol surface is wired in, offers are only logged.
    let offer_logger = tokio::spawn(async move {
        while let Some(offer) = offers.recv().await {
            info!(
                framework_id = %offer.framework_id,
                agents = offer.resources.len(),
                "Offer emitted"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = actor.await;
    offer_logger.abort();

    Ok(())
}
