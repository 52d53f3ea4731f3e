// DANS : src/monitoring/logging.rs
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const DEFAULT_FILTER: &str = "info,amm_sync=info";

/// Installe le subscriber JSON global. Le filtre vient de `RUST_LOG`
/// (ex: `RUST_LOG=amm_sync::state::liquidity=debug` pour voir les réactions avortées).
pub fn setup_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("Impossible d'installer le subscriber de logs : {}", e))
}
