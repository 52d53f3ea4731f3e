// DANS : src/state/pool.rs

use crate::config::SyncSettings;
use crate::decoders::raydium::amm_v4::{
    decode_pool, decode_pool_state, pool::offsets, AmmPool, LivePool, PoolKeys, PoolState,
    POOL_STATE_SPAN, RAYDIUM_AMM_V4_PROGRAM_ID, RAYDIUM_AMM_V4_PROGRAM_IDS,
};
use crate::error::{EntityKind, Result, SyncError};
use crate::monitoring::metrics;
use crate::rpc::{AccountFeed, AccountFilter, AccountUpdate, ChainClient};
use crate::state::{
    market::MarketRegistry,
    store::{spawn_writer, Repository},
};
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::{
    sync::{Arc, Weak},
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const COMPONENT: &str = "pool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    New(LivePool),
    Update(LivePool),
}

impl PoolEvent {
    pub fn pool(&self) -> &LivePool {
        match self {
            PoolEvent::New(pool) | PoolEvent::Update(pool) => pool,
        }
    }

    pub fn into_pool(self) -> LivePool {
        match self {
            PoolEvent::New(pool) | PoolEvent::Update(pool) => pool,
        }
    }
}

/// Un pool en cache. `state` est absent tant qu'aucun compte n'a été observé (import depuis la base).
#[derive(Debug, Clone)]
struct PoolEntry {
    pool: AmmPool,
    state: Option<PoolState>,
}

impl PoolEntry {
    fn live(&self) -> Option<LivePool> {
        self.state.map(|state| LivePool { pool: self.pool.clone(), state })
    }
}

/// Les index inverses adresse -> pool.
#[derive(Debug, Clone, Copy)]
enum PoolIndex {
    OpenOrders,
    BaseVault,
    QuoteVault,
}

impl PoolIndex {
    fn offset(self) -> usize {
        match self {
            PoolIndex::OpenOrders => offsets::OPEN_ORDERS,
            PoolIndex::BaseVault => offsets::BASE_VAULT,
            PoolIndex::QuoteVault => offsets::QUOTE_VAULT,
        }
    }
}

pub struct PoolRegistry {
    chain: Arc<dyn ChainClient>,
    feed: Arc<dyn AccountFeed>,
    store: Arc<dyn Repository<AmmPool>>,
    writer: mpsc::UnboundedSender<AmmPool>,
    markets: Arc<MarketRegistry>,
    pools: DashMap<Pubkey, PoolEntry>,
    by_open_orders: DashMap<Pubkey, Pubkey>,
    by_base_vault: DashMap<Pubkey, Pubkey>,
    by_quote_vault: DashMap<Pubkey, Pubkey>,
    pool_keys: DashMap<Pubkey, PoolKeys>,
    events: broadcast::Sender<PoolEvent>,
    settings: SyncSettings,
}

impl PoolRegistry {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        feed: Arc<dyn AccountFeed>,
        store: Arc<dyn Repository<AmmPool>>,
        markets: Arc<MarketRegistry>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_channel_capacity);
        Self {
            chain,
            feed,
            writer: spawn_writer(store.clone(), COMPONENT),
            store,
            markets,
            pools: DashMap::new(),
            by_open_orders: DashMap::new(),
            by_base_vault: DashMap::new(),
            by_quote_vault: DashMap::new(),
            pool_keys: DashMap::new(),
            events,
            settings,
        }
    }

    /// `New` au premier compte valide observé, `Update` à chaque compte suivant.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn has_pool_in_cache(&self, id: &Pubkey) -> bool {
        self.pools.contains_key(id)
    }

    /// Le pool en cache, s'il a déjà un état volatil.
    pub fn cached(&self, id: &Pubkey) -> Option<LivePool> {
        self.pools.get(id).and_then(|entry| entry.live())
    }

    pub async fn find(&self, id: &Pubkey, cache_only: bool) -> Result<Option<LivePool>> {
        if let Some(live) = self.cached(id) {
            return Ok(Some(live));
        }
        if cache_only {
            return Ok(None);
        }

        let Some(account) = self.chain.get_account(id).await? else {
            return Ok(None);
        };
        if account.data.len() != POOL_STATE_SPAN {
            return Ok(None);
        }

        Ok(self.handle_account(&AccountUpdate::new(*id, account), true))
    }

    pub async fn find_or_fail(&self, id: &Pubkey) -> Result<LivePool> {
        self.find(id, false)
            .await?
            .ok_or_else(|| SyncError::not_found(EntityKind::Pool, *id))
    }

    /// Les pools d'une paire, dans les deux sens. La base d'abord ; un scan on-chain sinon.
    pub async fn find_by_pair(&self, token_a: &Pubkey, token_b: &Pubkey) -> Result<Vec<AmmPool>> {
        let (a, b) = (*token_a, *token_b);
        let rows = self
            .store
            .find_by(&move |pool: &AmmPool| {
                (pool.base_mint == a && pool.quote_mint == b) || (pool.base_mint == b && pool.quote_mint == a)
            })
            .await?;

        if !rows.is_empty() {
            return Ok(rows
                .iter()
                .filter_map(|row| self.pools.get(&row.id).map(|entry| entry.pool.clone()))
                .collect());
        }

        let (forward, backward) = tokio::join!(
            self.scan(vec![AccountFilter::pubkey_at(offsets::BASE_MINT, token_a), AccountFilter::pubkey_at(offsets::QUOTE_MINT, token_b)]),
            self.scan(vec![AccountFilter::pubkey_at(offsets::BASE_MINT, token_b), AccountFilter::pubkey_at(offsets::QUOTE_MINT, token_a)]),
        );

        Ok(forward?.into_iter().chain(backward?).map(|live| live.pool).collect())
    }

    pub async fn find_by_open_order_id(&self, open_orders: &Pubkey, cache_only: bool) -> Result<Option<AmmPool>> {
        self.find_by_index(PoolIndex::OpenOrders, open_orders, cache_only).await
    }

    pub async fn find_by_base_vault(&self, base_vault: &Pubkey, cache_only: bool) -> Result<Option<AmmPool>> {
        self.find_by_index(PoolIndex::BaseVault, base_vault, cache_only).await
    }

    pub async fn find_by_quote_vault(&self, quote_vault: &Pubkey, cache_only: bool) -> Result<Option<AmmPool>> {
        self.find_by_index(PoolIndex::QuoteVault, quote_vault, cache_only).await
    }

    fn index(&self, index: PoolIndex) -> &DashMap<Pubkey, Pubkey> {
        match index {
            PoolIndex::OpenOrders => &self.by_open_orders,
            PoolIndex::BaseVault => &self.by_base_vault,
            PoolIndex::QuoteVault => &self.by_quote_vault,
        }
    }

    async fn find_by_index(&self, index: PoolIndex, key: &Pubkey, cache_only: bool) -> Result<Option<AmmPool>> {
        let pool_id = self.index(index).get(key).map(|id| *id);
        if let Some(pool) = pool_id.and_then(|id| self.pools.get(&id).map(|entry| entry.pool.clone())) {
            return Ok(Some(pool));
        }
        // Pas de repli sur un scan en mode cache seul : le chemin chaud ne fait jamais d'I/O.
        if cache_only {
            return Ok(None);
        }

        let found = self.scan(vec![AccountFilter::pubkey_at(index.offset(), key)]).await?;
        Ok(found.into_iter().next().map(|live| live.pool))
    }

    async fn scan(&self, mut filters: Vec<AccountFilter>) -> Result<Vec<LivePool>> {
        filters.insert(0, AccountFilter::DataSize(POOL_STATE_SPAN));
        let accounts = self.chain.get_program_accounts(&RAYDIUM_AMM_V4_PROGRAM_ID, &filters).await?;

        Ok(accounts
            .into_iter()
            .filter_map(|(address, account)| self.handle_account(&AccountUpdate::new(address, account), true))
            .collect())
    }

    /// Pool + marché aplatis pour construire un swap. Mémoïsé par pool.
    pub async fn get_pool_keys(&self, id: &Pubkey) -> Result<PoolKeys> {
        if let Some(keys) = self.pool_keys.get(id) {
            return Ok(keys.clone());
        }

        let pool = self.find_or_fail(id).await?;
        let market = self.markets.find_or_fail(&pool.pool.market_id).await?;
        let keys = PoolKeys::new(&pool.pool, &market);
        self.pool_keys.insert(*id, keys.clone());
        Ok(keys)
    }

    pub async fn init(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        self.load().await?;
        self.watch().await
    }

    pub async fn load(&self) -> anyhow::Result<usize> {
        let started = Instant::now();
        info!("[PoolRegistry] Comptage des pools en base...");
        let total = self.store.count().await?;
        info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "[PoolRegistry] Pools trouvés en base.");
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
            for pool in page {
                self.cache(pool, None);
            }
        }

        info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "[PoolRegistry] Import terminé.");
        Ok(total)
    }

    pub async fn watch(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        info!("[PoolRegistry] Démarrage de la surveillance des pools Raydium AMM v4...");
        let mut subscription = self
            .feed
            .subscribe(RAYDIUM_AMM_V4_PROGRAM_ID, vec![AccountFilter::DataSize(POOL_STATE_SPAN)])
            .await?;
        let registry: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(update) = subscription.next().await {
                let Some(registry) = registry.upgrade() else { break };
                metrics::ACCOUNT_UPDATES.with_label_values(&[COMPONENT]).inc();
                registry.handle_account(&update, false);
            }
        }))
    }

    /// `ignore_on_exists` : un pool déjà complet en cache est rendu tel quel (lectures à la demande).
    pub fn handle_account(&self, update: &AccountUpdate, ignore_on_exists: bool) -> Option<LivePool> {
        let id = update.address;

        if !RAYDIUM_AMM_V4_PROGRAM_IDS.contains(&update.owner) {
            warn!(pool = %id, owner = %update.owner, "[PoolRegistry] Pool ignoré : programme inconnu.");
            metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "unknown_program"]).inc();
            return None;
        }
        if update.data.len() != POOL_STATE_SPAN {
            let error = SyncError::invalid(EntityKind::Pool, id, format!("data length {}", update.data.len()));
            warn!(pool = %id, "[PoolRegistry] {}", error);
            metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "invalid_account"]).inc();
            return None;
        }

        if self.pools.contains_key(&id) {
            if ignore_on_exists {
                if let Some(live) = self.cached(&id) {
                    return Some(live);
                }
            }
            return self.handle_account_update(&id, &update.data);
        }

        match decode_pool(&id, &update.data, &update.owner) {
            Ok(live) => self.add(live),
            Err(e) => {
                warn!(pool = %id, "[PoolRegistry] {}", SyncError::invalid(EntityKind::Pool, id, e.to_string()));
                metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "invalid_account"]).inc();
                None
            }
        }
    }

    /// Relit l'état volatil d'un pool connu. Seul endroit où `open_time` est écrit.
    fn handle_account_update(&self, id: &Pubkey, data: &[u8]) -> Option<LivePool> {
        let state = match decode_pool_state(data) {
            Ok(state) => state,
            Err(e) => {
                warn!(pool = %id, "[PoolRegistry] {}", SyncError::invalid(EntityKind::Pool, *id, e.to_string()));
                return None;
            }
        };

        let (live, opened) = {
            let mut entry = self.pools.get_mut(id)?;
            let opened = match entry.state {
                Some(previous) => {
                    previous.status != state.status
                        && entry.pool.open_time == 0
                        && !previous.is_swapable()
                        && state.is_swapable()
                }
                None => false,
            };
            if opened {
                entry.pool.open_time = unix_timestamp();
                debug!(
                    pool = %id,
                    previous_status = entry.state.map(|s| s.status),
                    status = state.status,
                    open_time = entry.pool.open_time,
                    "[PoolRegistry] Heure d'ouverture enregistrée."
                );
            }
            entry.state = Some(state);
            (LivePool { pool: entry.pool.clone(), state }, opened)
        };

        debug!(
            pool = %id,
            status = state.status,
            base_need_take_pnl = state.base_need_take_pnl,
            quote_need_take_pnl = state.quote_need_take_pnl,
            "[PoolRegistry] Pool mis à jour."
        );

        if opened {
            self.save(&live.pool);
        }
        let _ = self.events.send(PoolEvent::Update(live.clone()));
        Some(live)
    }

    /// Met en cache, émet `New` et persiste. Un pool "placeholder" n'est jamais retenu.
    pub fn add(&self, live: LivePool) -> Option<LivePool> {
        if !live.pool.is_structurally_valid() {
            let error = SyncError::StructurallyInvalid { kind: EntityKind::Pool, id: live.pool.id };
            debug!(pool = %live.pool.id, "[PoolRegistry] {}", error);
            metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "structurally_invalid"]).inc();
            return None;
        }

        debug!(pool = %live.pool.id, "[PoolRegistry] Nouveau pool.");
        self.cache(live.pool.clone(), Some(live.state));
        let _ = self.events.send(PoolEvent::New(live.clone()));
        self.save(&live.pool);
        Some(live)
    }

    fn cache(&self, pool: AmmPool, state: Option<PoolState>) {
        let id = pool.id;
        self.by_open_orders.insert(pool.open_orders, id);
        self.by_base_vault.insert(pool.base_vault, id);
        self.by_quote_vault.insert(pool.quote_vault, id);
        self.pools.insert(id, PoolEntry { pool, state });
        metrics::TRACKED_POOLS.set(self.pools.len() as i64);
    }

    fn save(&self, pool: &AmmPool) {
        let _ = self.writer.send(pool.clone());
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::raydium::amm_v4::{AmmStatus, Market};
    use crate::state::store::JsonStore;
    use crate::testing::{assert_no_event, next_event, MockChain, MockFeed, PoolFixture};
    use std::time::Duration;

    struct Harness {
        chain: Arc<MockChain>,
        feed: Arc<MockFeed>,
        store: Arc<JsonStore<AmmPool>>,
        pools: Arc<PoolRegistry>,
    }

    fn harness() -> Harness {
        let chain = Arc::new(MockChain::new());
        let feed = Arc::new(MockFeed::new());
        let store = Arc::new(JsonStore::in_memory());
        let markets = Arc::new(MarketRegistry::new(
            chain.clone(),
            feed.clone(),
            Arc::new(JsonStore::<Market>::in_memory()),
            SyncSettings::default(),
        ));
        let pools = Arc::new(PoolRegistry::new(chain.clone(), feed.clone(), store.clone(), markets, SyncSettings::default()));
        Harness { chain, feed, store, pools }
    }

    async fn stored(store: &JsonStore<AmmPool>, id: Pubkey) -> AmmPool {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(pool) = store.find_by(&|p: &AmmPool| p.id == id).await.unwrap().pop() {
                    return pool;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("pool jamais persisté")
    }

    #[tokio::test]
    async fn new_pool_is_cached_indexed_emitted_and_persisted() {
        let h = harness();
        let mut events = h.pools.subscribe();
        let _task = h.pools.watch().await.unwrap();
        let fixture = PoolFixture::new();

        h.feed.publish(fixture.pool.id, RAYDIUM_AMM_V4_PROGRAM_ID, fixture.pool_bytes(AmmStatus::Initialized as u64, (0, 0))).await;

        let PoolEvent::New(live) = next_event(&mut events).await else { panic!("`New` attendu") };
        assert_eq!(live.pool, fixture.pool);
        assert!(h.pools.has_pool_in_cache(&fixture.pool.id));
        assert_eq!(h.pools.find_by_open_order_id(&fixture.pool.open_orders, true).await.unwrap(), Some(fixture.pool.clone()));
        assert_eq!(h.pools.find_by_base_vault(&fixture.pool.base_vault, true).await.unwrap(), Some(fixture.pool.clone()));
        assert_eq!(h.pools.find_by_quote_vault(&fixture.pool.quote_vault, true).await.unwrap(), Some(fixture.pool.clone()));
        assert_eq!(stored(&h.store, fixture.pool.id).await, fixture.pool);

        // Deuxième observation : `Update`.
        h.feed.publish(fixture.pool.id, RAYDIUM_AMM_V4_PROGRAM_ID, fixture.pool_bytes(AmmStatus::Initialized as u64, (3, 4))).await;
        let PoolEvent::Update(live) = next_event(&mut events).await else { panic!("`Update` attendu") };
        assert_eq!(live.state.base_need_take_pnl, 3);
        assert_eq!(live.state.quote_need_take_pnl, 4);
    }

    #[tokio::test]
    async fn open_time_is_stamped_once_when_the_pool_becomes_swapable() {
        let h = harness();
        let mut events = h.pools.subscribe();
        let _task = h.pools.watch().await.unwrap();
        let fixture = PoolFixture::new();
        let id = fixture.pool.id;

        let statuses = [AmmStatus::Disabled, AmmStatus::SwapOnly, AmmStatus::SwapOnly];
        let mut open_times = Vec::new();
        for status in statuses {
            h.feed.publish(id, RAYDIUM_AMM_V4_PROGRAM_ID, fixture.pool_bytes(status as u64, (0, 0))).await;
            open_times.push(next_event(&mut events).await.pool().pool.open_time);
        }

        assert_eq!(open_times[0], 0);
        assert!(open_times[1] > 0);
        assert_eq!(open_times[2], open_times[1]);

        let persisted = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let pool = stored(&h.store, id).await;
                if pool.open_time != 0 {
                    return pool;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(persisted.open_time, open_times[1]);
    }

    #[tokio::test]
    async fn already_swapable_pool_is_not_stamped() {
        let h = harness();
        let mut events = h.pools.subscribe();
        let _task = h.pools.watch().await.unwrap();
        let fixture = PoolFixture::new();

        for status in [AmmStatus::Initialized, AmmStatus::SwapOnly] {
            h.feed.publish(fixture.pool.id, RAYDIUM_AMM_V4_PROGRAM_ID, fixture.pool_bytes(status as u64, (0, 0))).await;
            assert_eq!(next_event(&mut events).await.pool().pool.open_time, 0);
        }
    }

    #[tokio::test]
    async fn placeholder_pool_is_never_cached_nor_emitted() {
        let h = harness();
        let mut events = h.pools.subscribe();
        let _task = h.pools.watch().await.unwrap();
        let mut fixture = PoolFixture::new();
        fixture.pool.market_id = Pubkey::default();

        h.feed.publish(fixture.pool.id, RAYDIUM_AMM_V4_PROGRAM_ID, fixture.pool_bytes(1, (0, 0))).await;

        assert_no_event(&mut events).await;
        assert!(!h.pools.has_pool_in_cache(&fixture.pool.id));
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_by_pair_with_nothing_anywhere_is_empty() {
        let h = harness();
        let pools = h.pools.find_by_pair(&Pubkey::new_unique(), &Pubkey::new_unique()).await.unwrap();
        assert!(pools.is_empty());
    }

    #[tokio::test]
    async fn find_by_pair_scans_both_directions() {
        let h = harness();
        let fixture = PoolFixture::new();
        fixture.install(&h.chain, 1, (0, 0), (1, 1));

        let forward = h.pools.find_by_pair(&fixture.pool.base_mint, &fixture.pool.quote_mint).await.unwrap();
        assert_eq!(forward, vec![fixture.pool.clone()]);

        // Maintenant en base : servi sans scan, dans l'autre sens aussi.
        stored(&h.store, fixture.pool.id).await;
        let calls = h.chain.calls();
        let backward = h.pools.find_by_pair(&fixture.pool.quote_mint, &fixture.pool.base_mint).await.unwrap();
        assert_eq!(backward, vec![fixture.pool]);
        assert_eq!(h.chain.calls(), calls);
    }

    #[tokio::test]
    async fn cache_only_reverse_lookup_never_scans() {
        let h = harness();
        let fixture = PoolFixture::new();
        fixture.install(&h.chain, 1, (0, 0), (1, 1));

        assert_eq!(h.pools.find_by_open_order_id(&fixture.pool.open_orders, true).await.unwrap(), None);
        assert_eq!(h.chain.calls(), 0);

        let found = h.pools.find_by_open_order_id(&fixture.pool.open_orders, false).await.unwrap();
        assert_eq!(found, Some(fixture.pool));
    }

    #[tokio::test]
    async fn loaded_pool_needs_a_state_before_being_returned() {
        let h = harness();
        let fixture = PoolFixture::new();
        h.store.upsert(fixture.pool.clone()).await.unwrap();
        fixture.install(&h.chain, 6, (0, 0), (1, 1));

        assert_eq!(h.pools.load().await.unwrap(), 1);
        assert!(h.pools.has_pool_in_cache(&fixture.pool.id));
        assert_eq!(h.pools.find(&fixture.pool.id, true).await.unwrap(), None);

        let live = h.pools.find_or_fail(&fixture.pool.id).await.unwrap();
        assert_eq!(live.state.status, 6);
        assert_eq!(h.chain.calls(), 1);
    }

    #[tokio::test]
    async fn pool_keys_are_memoized() {
        let h = harness();
        let fixture = PoolFixture::new();
        fixture.install(&h.chain, 1, (0, 0), (1, 1));

        let keys = h.pools.get_pool_keys(&fixture.pool.id).await.unwrap();
        assert_eq!(keys.market_id, fixture.market.id);
        assert_eq!(keys.market_authority, fixture.market.authority);
        let calls = h.chain.calls();

        assert_eq!(h.pools.get_pool_keys(&fixture.pool.id).await.unwrap(), keys);
        assert_eq!(h.chain.calls(), calls);
    }

    #[tokio::test]
    async fn unknown_pool_is_not_found() {
        let h = harness();
        let error = h.pools.find_or_fail(&Pubkey::new_unique()).await.unwrap_err();
        assert!(matches!(error, SyncError::NotFound { kind: EntityKind::Pool, .. }));
    }
}
