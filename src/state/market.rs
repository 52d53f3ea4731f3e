// DANS : src/state/market.rs

use crate::config::SyncSettings;
use crate::decoders::raydium::amm_v4::{decode_market, Market, MARKET_STATE_SPAN, MARKET_V3_PROGRAM_IDS, OPENBOOK_PROGRAM_ID};
use crate::error::{EntityKind, Result, SyncError};
use crate::monitoring::metrics;
use crate::rpc::{AccountFeed, AccountFilter, AccountUpdate, ChainClient};
use crate::state::store::{spawn_writer, Repository};
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::{
    sync::{Arc, Weak},
    time::Instant,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const COMPONENT: &str = "market";

/// Les marchés v3 (OpenBook / Serum) adossés aux pools.
/// Un marché ne change jamais une fois décodé : seul l'événement `new` existe.
pub struct MarketRegistry {
    chain: Arc<dyn ChainClient>,
    feed: Arc<dyn AccountFeed>,
    store: Arc<dyn Repository<Market>>,
    writer: mpsc::UnboundedSender<Market>,
    markets: DashMap<Pubkey, Market>,
    events: broadcast::Sender<Market>,
    settings: SyncSettings,
}

impl MarketRegistry {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        feed: Arc<dyn AccountFeed>,
        store: Arc<dyn Repository<Market>>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_channel_capacity);
        Self {
            chain,
            feed,
            writer: spawn_writer(store.clone(), COMPONENT),
            store,
            markets: DashMap::new(),
            events,
            settings,
        }
    }

    /// Flux des marchés nouvellement découverts.
    pub fn subscribe(&self) -> broadcast::Receiver<Market> {
        self.events.subscribe()
    }

    pub fn cached(&self, id: &Pubkey) -> Option<Market> {
        self.markets.get(id).map(|market| market.clone())
    }

    pub async fn find(&self, id: &Pubkey) -> Result<Option<Market>> {
        if let Some(market) = self.cached(id) {
            return Ok(Some(market));
        }

        let Some(account) = self.chain.get_account(id).await? else {
            return Ok(None);
        };
        if account.data.len() != MARKET_STATE_SPAN {
            return Ok(None);
        }

        Ok(self.handle_account(&AccountUpdate::new(*id, account), true))
    }

    pub async fn find_or_fail(&self, id: &Pubkey) -> Result<Market> {
        self.find(id)
            .await?
            .ok_or_else(|| SyncError::not_found(EntityKind::Market, *id))
    }

    /// Import depuis le stockage durable puis abonnement au flux.
    pub async fn init(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        self.load().await?;
        self.watch().await
    }

    pub async fn load(&self) -> anyhow::Result<usize> {
        let started = Instant::now();
        info!("[MarketRegistry] Comptage des marchés en base...");
        let total = self.store.count().await?;
        info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "[MarketRegistry] Marchés trouvés en base.");
        if total == 0 {
            return Ok(0);
        }

        let started = Instant::now();
        let page_size = self.settings.import_page_size.max(1);
        let mut skip = 0;
        while skip < total {
            let page = self.store.find_page(skip, page_size).await?;
            if page.is_empty() {
                break;
            }
            skip += page.len();
            for market in page {
                self.markets.insert(market.id, market);
            }
        }

        info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "[MarketRegistry] Import terminé.");
        Ok(total)
    }

    pub async fn watch(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        info!("[MarketRegistry] Démarrage de la surveillance des marchés...");
        let mut subscription = self
            .feed
            .subscribe(OPENBOOK_PROGRAM_ID, vec![AccountFilter::DataSize(MARKET_STATE_SPAN)])
            .await?;
        let registry: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(update) = subscription.next().await {
                let Some(registry) = registry.upgrade() else { break };
                registry.on_account_change(&update);
            }
        }))
    }

    /// Import idempotent : un marché déjà connu est ignoré.
    pub fn on_account_change(&self, update: &AccountUpdate) {
        metrics::ACCOUNT_UPDATES.with_label_values(&[COMPONENT]).inc();
        if self.markets.contains_key(&update.address) {
            return;
        }
        self.handle_account(update, false);
    }

    pub fn handle_account(&self, update: &AccountUpdate, ignore_on_exists: bool) -> Option<Market> {
        let id = update.address;

        if !MARKET_V3_PROGRAM_IDS.contains(&update.owner) {
            warn!(market = %id, owner = %update.owner, "[MarketRegistry] Compte de marché ignoré : programme inconnu.");
            metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "unknown_program"]).inc();
            return None;
        }

        if ignore_on_exists {
            if let Some(cached) = self.cached(&id) {
                return Some(cached);
            }
        }

        match decode_market(&id, &update.data, &update.owner) {
            Ok(market) => self.add(market),
            Err(e) => {
                let error = SyncError::invalid(EntityKind::Market, id, e.to_string());
                warn!(market = %id, "[MarketRegistry] {}", error);
                metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "invalid_account"]).inc();
                None
            }
        }
    }

    /// Met en cache, émet `new` et persiste. Un marché aux adresses nulles est abandonné.
    pub fn add(&self, market: Market) -> Option<Market> {
        if !market.is_structurally_valid() {
            let error = SyncError::StructurallyInvalid { kind: EntityKind::Market, id: market.id };
            debug!(market = %market.id, "[MarketRegistry] {}", error);
            metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "structurally_invalid"]).inc();
            return None;
        }

        debug!(market = %market.id, "[MarketRegistry] Nouveau marché.");
        self.markets.insert(market.id, market.clone());
        let _ = self.events.send(market.clone());
        let _ = self.writer.send(market.clone());
        Some(market)
    }
}
