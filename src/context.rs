// DANS : src/context.rs

use crate::config::{Config, SyncSettings};
use crate::decoders::raydium::amm_v4::{amm_authority, AmmPool, Market, RAYDIUM_AMM_V4_PROGRAM_ID};
use crate::error::Result;
use crate::rpc::{AccountFeed, ChainClient, PubsubFeed, ResilientRpcClient};
use crate::state::{
    liquidity::{LiquidityEngine, Price},
    market::MarketRegistry,
    open_orders::OpenOrdersTracker,
    pool::PoolRegistry,
    pool_finder::{self, PoolInfo},
    store::{JsonStore, Repository, MARKETS_FILE_NAME, POOLS_FILE_NAME},
    vault::VaultTracker,
};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::info;

/// Tous les composants du moteur, câblés une fois pour toutes.
pub struct Context {
    pub markets: Arc<MarketRegistry>,
    pub open_orders: Arc<OpenOrdersTracker>,
    pub vaults: Arc<VaultTracker>,
    pub pools: Arc<PoolRegistry>,
    pub liquidity: Arc<LiquidityEngine>,
    wsol_pool: Pubkey,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Context {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        feed: Arc<dyn AccountFeed>,
        market_store: Arc<dyn Repository<Market>>,
        pool_store: Arc<dyn Repository<AmmPool>>,
        settings: SyncSettings,
        wsol_pool: Pubkey,
    ) -> Self {
        let markets = Arc::new(MarketRegistry::new(chain.clone(), feed.clone(), market_store, settings));
        let open_orders = Arc::new(OpenOrdersTracker::new(chain.clone(), feed.clone(), settings));
        let vaults = Arc::new(VaultTracker::new(
            chain.clone(),
            feed.clone(),
            amm_authority(&RAYDIUM_AMM_V4_PROGRAM_ID),
            settings,
        ));
        let pools = Arc::new(PoolRegistry::new(chain, feed, pool_store, markets.clone(), settings));
        let liquidity = LiquidityEngine::new(pools.clone(), open_orders.clone(), vaults.clone(), settings);

        Self { markets, open_orders, vaults, pools, liquidity, wsol_pool, tasks: Mutex::new(Vec::new()) }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let commitment = config.commitment_config()?;
        let chain = Arc::new(ResilientRpcClient::new(
            config.solana_rpc_url.clone(),
            commitment,
            config.rpc_max_retries,
            config.rpc_retry_delay_ms,
        ));
        let feed = Arc::new(PubsubFeed::new(config.solana_ws_url.clone(), commitment, config.feed_channel_capacity));
        let market_store = Arc::new(JsonStore::<Market>::open(config.data_dir.join(MARKETS_FILE_NAME))?);
        let pool_store = Arc::new(JsonStore::<AmmPool>::open(config.data_dir.join(POOLS_FILE_NAME))?);

        Ok(Self::new(chain, feed, market_store, pool_store, config.sync_settings(), config.wsol_pool()?))
    }

    /// Marchés, open orders, pools puis coffres. Les flux sont ouverts avant que le moteur
    /// ne reçoive quoi que ce soit : ses abonnements internes existent dès `new`.
    pub async fn init(&self) -> anyhow::Result<()> {
        info!("[Context] Initialisation des registres...");
        let mut tasks = self.tasks.lock().await;
        tasks.push(self.markets.init().await?);
        tasks.push(self.open_orders.init().await?);
        tasks.push(self.pools.init().await?);
        tasks.push(self.vaults.init().await?);
        info!(feeds = tasks.len(), "[Context] Registres prêts.");
        Ok(())
    }

    /// Coupe tous les flux de comptes (chaque abonnement est libéré avec sa tâche),
    /// puis les écoutes du moteur.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.liquidity.shutdown().await;
        info!("[Context] Flux de comptes arrêtés.");
    }

    pub async fn find_pools(&self, token_a: &Pubkey, token_b: &Pubkey) -> Result<Vec<PoolInfo>> {
        pool_finder::find_pools(&self.pools, &self.liquidity, token_a, token_b).await
    }

    /// Le prix du pool WSOL/USDC de référence.
    pub async fn get_wsol_price(&self) -> Result<Price> {
        self.liquidity.get_price(&self.wsol_pool).await
    }
}
