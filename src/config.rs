use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::{path::PathBuf, str::FromStr};

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub solana_rpc_url: String,
    pub solana_ws_url: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u8,
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_import_page_size")]
    pub import_page_size: usize,
    #[serde(default = "default_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub feed_channel_capacity: usize,
    #[serde(default = "default_wsol_pool")]
    pub wsol_pool: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Les réglages dont les registres ont besoin à l'exécution.
/// Séparés de `Config` pour pouvoir construire les composants sans variables d'environnement.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub import_page_size: usize,
    pub event_channel_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            import_page_size: default_import_page_size(),
            event_channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        Ok(config)
    }

    pub fn commitment_config(&self) -> Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.commitment)
            .with_context(|| format!("Commitment invalide : {}", self.commitment))
    }

    pub fn wsol_pool(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.wsol_pool)
            .with_context(|| format!("Adresse WSOL_POOL invalide : {}", self.wsol_pool))
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            import_page_size: self.import_page_size.max(1),
            event_channel_capacity: self.event_channel_capacity.max(1),
        }
    }
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_rpc_max_retries() -> u8 {
    3
}

fn default_rpc_retry_delay_ms() -> u64 {
    200
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_import_page_size() -> usize {
    1000
}

fn default_channel_capacity() -> usize {
    4096
}

fn default_wsol_pool() -> String {
    "58oQChx4yWmvKdwLLZzBi4ChoCc2fqCUWBkwMihLYQo2".to_string()
}

fn default_metrics_port() -> u16 {
    9100
}
