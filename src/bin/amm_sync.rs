// DANS : src/bin/amm_sync.rs

use amm_sync::{
    config::Config,
    context::Context,
    monitoring::{logging::setup_logging, metrics},
};
use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    setup_logging()?;
    info!("[AmmSync] Démarrage du moteur de synchronisation Raydium AMM v4...");

    tokio::spawn(metrics::start_metrics_server(config.metrics_port));

    let context = Context::from_config(&config)?;
    let mut updates = context.liquidity.subscribe();
    context.init().await?;

    match context.get_wsol_price().await {
        Ok(price) => info!(price = %price, "[AmmSync] Prix WSOL de référence."),
        Err(e) => warn!("[AmmSync] Prix WSOL indisponible : {}", e),
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => info!(
                    pool = %update.pool.id(),
                    base = %update.reserves.base,
                    quote = %update.reserves.quote,
                    source = update.reserves.source as u8,
                    "[AmmSync] Réserves."
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "[AmmSync] Mises à jour de réserves perdues."),
                Err(RecvError::Closed) => {
                    error!("[AmmSync] Flux de réserves fermé.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("[AmmSync] Arrêt demandé.");
                break;
            }
        }
    }

    context.shutdown().await;
    Ok(())
}
