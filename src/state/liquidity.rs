// DANS : src/state/liquidity.rs

use crate::config::SyncSettings;
use crate::decoders::raydium::amm_v4::{LivePool, OpenOrdersBalances};
use crate::error::{Result, SyncError};
use crate::monitoring::metrics;
use crate::state::{
    locker::{KeyedLock, PendingTurn},
    open_orders::{OpenOrdersTracker, OpenOrdersUpdate},
    pool::{PoolEvent, PoolRegistry},
    vault::{VaultTracker, VaultUpdate},
};
use dashmap::DashMap;
use serde::{Serialize, Serializer};
use solana_sdk::pubkey::Pubkey;
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

/// Le chemin qui a produit une valeur de réserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReserveSource {
    /// Dérivation complète à la demande (`get`).
    Full = 0,
    Pool = 1,
    OpenOrders = 2,
    Vault = 3,
}

impl ReserveSource {
    fn label(self) -> &'static str {
        match self {
            ReserveSource::Full => "full",
            ReserveSource::Pool => "pool",
            ReserveSource::OpenOrders => "open_orders",
            ReserveSource::Vault => "vault",
        }
    }
}

impl Serialize for ReserveSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// `base = coffre base + total open orders base - need_take_pnl base`, idem pour quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reserves {
    pub base: u128,
    pub quote: u128,
    pub source: ReserveSource,
}

impl Reserves {
    pub fn liquidity(&self) -> u128 {
        self.base.saturating_add(self.quote)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservesUpdate {
    pub pool: LivePool,
    pub reserves: Reserves,
}

/// Prix spot exact : `quote * 10^base_decimals / (base * 10^quote_decimals)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    /// Réserves de quote.
    pub numerator: u128,
    /// Réserves de base.
    pub denominator: u128,
}

impl Price {
    /// `None` quand le côté base est vide.
    pub fn to_f64(&self) -> Option<f64> {
        if self.denominator == 0 {
            return None;
        }
        let raw = self.numerator as f64 / self.denominator as f64;
        Some(raw * 10f64.powi(self.base_decimals as i32 - self.quote_decimals as i32))
    }

    /// Le prix de la base exprimé en quote devient celui de la quote exprimé en base.
    pub fn invert(&self) -> Self {
        Self {
            base_mint: self.quote_mint,
            quote_mint: self.base_mint,
            base_decimals: self.quote_decimals,
            quote_decimals: self.base_decimals,
            numerator: self.denominator,
            denominator: self.numerator,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f64() {
            Some(price) => write!(f, "{} {}/{}", price, self.quote_mint, self.base_mint),
            None => write!(f, "n/a"),
        }
    }
}

/// Le fait voisin qui manquait quand une réaction a été abandonnée.
#[derive(Debug, Clone, Copy)]
enum Sibling {
    Pool,
    OpenOrders,
    BaseVault,
    QuoteVault,
}

/// Issue d'une réaction : soit tous les faits étaient là, soit on attend que le manquant arrive.
enum Reaction {
    Applied,
    Missing(Sibling),
}

/// Le moteur de synchronisation de liquidité : seul écrivain du cache de réserves.
pub struct LiquidityEngine {
    pools: Arc<PoolRegistry>,
    open_orders: Arc<OpenOrdersTracker>,
    vaults: Arc<VaultTracker>,
    reserves: DashMap<Pubkey, Reserves>,
    decimals: DashMap<Pubkey, u8>,
    locks: KeyedLock<Pubkey>,
    events: broadcast::Sender<ReservesUpdate>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl LiquidityEngine {
    /// Construit le moteur et branche ses trois réactions sur les flux des registres.
    pub fn new(
        pools: Arc<PoolRegistry>,
        open_orders: Arc<OpenOrdersTracker>,
        vaults: Arc<VaultTracker>,
        settings: SyncSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_channel_capacity);
        let pool_events = pools.subscribe();
        let open_orders_events = open_orders.subscribe();
        let vault_events = vaults.subscribe();

        let engine = Arc::new(Self {
            pools,
            open_orders,
            vaults,
            reserves: DashMap::new(),
            decimals: DashMap::new(),
            locks: KeyedLock::new(),
            events,
            listeners: Mutex::new(Vec::new()),
        });

        let listeners = vec![
            spawn_listener(&engine, "pool", pool_events, |engine, event: PoolEvent| async move {
                engine.dispatch_pool(event.into_pool())
            }),
            spawn_listener(&engine, "open_orders", open_orders_events, |engine, update: OpenOrdersUpdate| async move {
                engine.dispatch_open_orders(update).await
            }),
            spawn_listener(&engine, "vault", vault_events, |engine, update: VaultUpdate| async move {
                engine.dispatch_vault(update).await
            }),
        ];
        *engine.listeners.lock().unwrap_or_else(PoisonError::into_inner) = listeners;

        engine
    }

    /// Débranche les trois écoutes. Les réactions déjà lancées vont à leur terme.
    pub async fn shutdown(&self) {
        let listeners: Vec<_> = self.listeners.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for listener in &listeners {
            listener.abort();
        }
        for listener in listeners {
            let _ = listener.await;
        }
        debug!("[LiquidityEngine] Écoutes arrêtées.");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservesUpdate> {
        self.events.subscribe()
    }

    pub fn cached(&self, pool_id: &Pubkey) -> Option<Reserves> {
        self.reserves.get(pool_id).map(|reserves| *reserves)
    }

    /// Réserves en cache, sinon dérivation complète (I/O autorisées).
    pub async fn get(&self, pool_id: &Pubkey) -> Result<Reserves> {
        if let Some(reserves) = self.cached(pool_id) {
            return Ok(reserves);
        }

        let pool = self.pools.find_or_fail(pool_id).await?;
        let (open_orders, vaults) = tokio::join!(
            self.open_orders.find_or_fail(&pool.pool.open_orders),
            self.vaults.find_pair(&pool.pool.base_vault, &pool.pool.quote_vault),
        );
        let open_orders = open_orders?;
        let (base_vault, quote_vault) = match vaults? {
            (Some(base), Some(quote)) => (base, quote),
            (None, _) => return Err(SyncError::VaultNotFound(pool.pool.base_vault)),
            (_, None) => return Err(SyncError::VaultNotFound(pool.pool.quote_vault)),
        };

        let computed = self.update_reserves(&pool, &open_orders, base_vault, quote_vault, ReserveSource::Full)?;
        Ok(self.cached(pool_id).unwrap_or(computed))
    }

    pub async fn get_price(&self, pool_id: &Pubkey) -> Result<Price> {
        let reserves = self.get(pool_id).await?;
        self.calculate_price(pool_id, &reserves).await
    }

    pub async fn calculate_price(&self, pool_id: &Pubkey, reserves: &Reserves) -> Result<Price> {
        let pool = self.pools.find_or_fail(pool_id).await?.pool;
        let base_decimals = *self.decimals.entry(pool.base_mint).or_insert(pool.base_decimals);
        let quote_decimals = *self.decimals.entry(pool.quote_mint).or_insert(pool.quote_decimals);

        Ok(Price {
            base_mint: pool.base_mint,
            quote_mint: pool.quote_mint,
            base_decimals,
            quote_decimals,
            numerator: reserves.quote,
            denominator: reserves.base,
        })
    }

    // --- Aiguillage : réservation du tour (synchrone, dans l'ordre du flux), puis réaction ---

    fn dispatch_pool(self: &Arc<Self>, pool: LivePool) {
        let turn = self.locks.enqueue(pool.pool.id);
        self.spawn_reaction(pool.pool.id, turn, move |engine| engine.on_pool_update(pool));
    }

    async fn dispatch_open_orders(self: &Arc<Self>, update: OpenOrdersUpdate) {
        let pool = match self.pools.find_by_open_order_id(&update.id, true).await {
            Ok(Some(pool)) => pool,
            Ok(None) => return,
            Err(e) => {
                warn!(open_orders = %update.id, "[LiquidityEngine] Recherche du pool échouée : {}", e);
                return;
            }
        };

        let turn = self.locks.enqueue(pool.id);
        self.spawn_reaction(pool.id, turn, move |engine| engine.on_open_orders_update(pool.id, update.balances));
    }

    async fn dispatch_vault(self: &Arc<Self>, update: VaultUpdate) {
        let pool = match self.pools.find_by_base_vault(&update.id, true).await {
            Ok(Some(pool)) => Some(pool),
            Ok(None) => match self.pools.find_by_quote_vault(&update.id, true).await {
                Ok(pool) => pool,
                Err(e) => {
                    warn!(vault = %update.id, "[LiquidityEngine] Recherche du pool échouée : {}", e);
                    return;
                }
            },
            Err(e) => {
                warn!(vault = %update.id, "[LiquidityEngine] Recherche du pool échouée : {}", e);
                return;
            }
        };
        let Some(pool) = pool else { return };

        let turn = self.locks.enqueue(pool.id);
        self.spawn_reaction(pool.id, turn, move |engine| engine.on_vault_update(pool.id, update));
    }

    /// Une tâche par réaction : deux pools différents ne s'attendent jamais.
    fn spawn_reaction<F, Fut>(self: &Arc<Self>, pool_id: Pubkey, turn: PendingTurn, reaction: F)
    where
        F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Reaction>> + Send + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            let _turn = turn.acquire().await;
            match reaction(engine).await {
                Ok(Reaction::Applied) => {}
                Ok(Reaction::Missing(sibling)) => {
                    debug!(pool = %pool_id, missing = ?sibling, "[LiquidityEngine] Réaction abandonnée, fait voisin absent.");
                }
                Err(e @ SyncError::ReserveUnderflow(_)) => {
                    error!(pool = %pool_id, "[LiquidityEngine] {}", e);
                }
                Err(e) => {
                    warn!(pool = %pool_id, "[LiquidityEngine] Réaction échouée : {}", e);
                }
            }
        });
    }

    // --- Les trois réactions : lecture cache seul de tout sauf le fait reçu ---

    async fn on_pool_update(self: Arc<Self>, pool: LivePool) -> Result<Reaction> {
        let Some(open_orders) = self.open_orders.find(&pool.pool.open_orders, true).await? else {
            return Ok(Reaction::Missing(Sibling::OpenOrders));
        };
        let Some(base_vault) = self.vaults.find(&pool.pool.base_vault, true).await? else {
            return Ok(Reaction::Missing(Sibling::BaseVault));
        };
        let Some(quote_vault) = self.vaults.find(&pool.pool.quote_vault, true).await? else {
            return Ok(Reaction::Missing(Sibling::QuoteVault));
        };

        self.update_reserves(&pool, &open_orders, base_vault, quote_vault, ReserveSource::Pool)?;
        Ok(Reaction::Applied)
    }

    async fn on_open_orders_update(self: Arc<Self>, pool_id: Pubkey, open_orders: OpenOrdersBalances) -> Result<Reaction> {
        let Some(pool) = self.pools.find(&pool_id, true).await? else {
            return Ok(Reaction::Missing(Sibling::Pool));
        };
        let Some(base_vault) = self.vaults.find(&pool.pool.base_vault, true).await? else {
            return Ok(Reaction::Missing(Sibling::BaseVault));
        };
        let Some(quote_vault) = self.vaults.find(&pool.pool.quote_vault, true).await? else {
            return Ok(Reaction::Missing(Sibling::QuoteVault));
        };

        self.update_reserves(&pool, &open_orders, base_vault, quote_vault, ReserveSource::OpenOrders)?;
        Ok(Reaction::Applied)
    }

    async fn on_vault_update(self: Arc<Self>, pool_id: Pubkey, update: VaultUpdate) -> Result<Reaction> {
        let Some(pool) = self.pools.find(&pool_id, true).await? else {
            return Ok(Reaction::Missing(Sibling::Pool));
        };
        let Some(open_orders) = self.open_orders.find(&pool.pool.open_orders, true).await? else {
            return Ok(Reaction::Missing(Sibling::OpenOrders));
        };

        let (base_vault, quote_vault) = if pool.pool.base_vault == update.id {
            let Some(quote) = self.vaults.find(&pool.pool.quote_vault, true).await? else {
                return Ok(Reaction::Missing(Sibling::QuoteVault));
            };
            (update.amount, quote)
        } else {
            let Some(base) = self.vaults.find(&pool.pool.base_vault, true).await? else {
                return Ok(Reaction::Missing(Sibling::BaseVault));
            };
            (base, update.amount)
        };

        self.update_reserves(&pool, &open_orders, base_vault, quote_vault, ReserveSource::Vault)?;
        Ok(Reaction::Applied)
    }

    /// Calcule, compare à la valeur en cache, écrit et émet seulement si la paire a changé.
    fn update_reserves(
        &self,
        pool: &LivePool,
        open_orders: &OpenOrdersBalances,
        base_vault: u64,
        quote_vault: u64,
        source: ReserveSource,
    ) -> Result<Reserves> {
        let id = pool.pool.id;
        let side = |vault: u64, total: u64, need_take_pnl: u64| {
            (vault as u128 + total as u128)
                .checked_sub(need_take_pnl as u128)
                .ok_or(SyncError::ReserveUnderflow(id))
        };
        let base = side(base_vault, open_orders.base_token_total, pool.state.base_need_take_pnl)?;
        let quote = side(quote_vault, open_orders.quote_token_total, pool.state.quote_need_take_pnl)?;
        let reserves = Reserves { base, quote, source };

        if let Some(previous) = self.cached(&id) {
            if previous.base == base && previous.quote == quote {
                return Ok(previous);
            }
        }

        self.reserves.insert(id, reserves);
        metrics::RESERVE_UPDATES.with_label_values(&[source.label()]).inc();
        debug!(pool = %id, base = %base, quote = %quote, source = source as u8, "[LiquidityEngine] Réserves mises à jour.");
        let _ = self.events.send(ReservesUpdate { pool: pool.clone(), reserves });
        Ok(reserves)
    }
}

/// Boucle d'écoute d'un flux de registre. Séquentielle : l'ordre de réservation des tours
/// suit l'ordre des événements. S'arrête quand le moteur ou le registre disparaît.
fn spawn_listener<E, F, Fut>(
    engine: &Arc<LiquidityEngine>,
    stream: &'static str,
    mut events: broadcast::Receiver<E>,
    handle: F,
) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    F: Fn(Arc<LiquidityEngine>, E) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let engine: Weak<LiquidityEngine> = Arc::downgrade(engine);
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(stream, skipped, "[LiquidityEngine] Événements perdus, flux en retard.");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(engine) = engine.upgrade() else { break };
            handle(engine, event).await;
        }
    })
}
