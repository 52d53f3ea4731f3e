// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounterVec, IntGauge, TextEncoder, register_int_counter_vec, register_int_gauge,
};
use tracing::{error, info};
use warp::Filter;

lazy_static! {
    // --- Flux de comptes ---
    pub static ref ACCOUNT_UPDATES: IntCounterVec = register_int_counter_vec!(
        "amm_sync_account_updates_total",
        "Notifications de comptes traitées par chaque registre",
        &["component"] // Labels: "market", "open_orders", "vault", "pool"
    ).unwrap();
    pub static ref IGNORED_ACCOUNTS: IntCounterVec = register_int_counter_vec!(
        "amm_sync_ignored_accounts_total",
        "Comptes ignorés (mauvais programme, mauvaise taille, entité invalide)",
        &["component", "reason"]
    ).unwrap();

    // --- Moteur de liquidité ---
    pub static ref RESERVE_UPDATES: IntCounterVec = register_int_counter_vec!(
        "amm_sync_reserve_updates_total",
        "Réserves émises par le moteur, par chemin de mise à jour",
        &["source"] // Labels: "full", "pool", "open_orders", "vault"
    ).unwrap();
    pub static ref TRACKED_POOLS: IntGauge = register_int_gauge!(
        "amm_sync_tracked_pools", "Nombre de pools dans le cache du registre"
    ).unwrap();

    // --- RPC ---
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "amm_sync_rpc_requests_total",
        "Requêtes RPC, segmentées par méthode et statut",
        &["method", "status"] // Labels: "get_account", "success" / "failure"
    ).unwrap();
}

pub async fn start_metrics_server(port: u16) {
    let metrics_route = warp::path!("metrics").map(|| {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            error!("[Monitoring] Échec de l'encodage des métriques : {}", e);
        }
        warp::reply::with_header(buffer, "content-type", "text/plain; version=0.0.4")
    });
    info!("[Monitoring] Serveur de métriques exposé sur http://0.0.0.0:{}/metrics", port);
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}
