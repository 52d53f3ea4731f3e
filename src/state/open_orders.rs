// DANS : src/state/open_orders.rs

use crate::config::SyncSettings;
use crate::decoders::raydium::amm_v4::{decode_open_orders, OpenOrdersBalances, OPENBOOK_PROGRAM_ID, OPEN_ORDERS_SPAN};
use crate::error::{EntityKind, Result, SyncError};
use crate::monitoring::metrics;
use crate::rpc::{AccountFeed, AccountFilter, AccountUpdate, ChainClient};
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::{Arc, Weak};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

const COMPONENT: &str = "open_orders";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrdersUpdate {
    pub id: Pubkey,
    pub balances: OpenOrdersBalances,
}

/// Les soldes agrégés des comptes OpenOrders. Dérivés uniquement, jamais persistés.
pub struct OpenOrdersTracker {
    chain: Arc<dyn ChainClient>,
    feed: Arc<dyn AccountFeed>,
    balances: DashMap<Pubkey, OpenOrdersBalances>,
    events: broadcast::Sender<OpenOrdersUpdate>,
}

impl OpenOrdersTracker {
    pub fn new(chain: Arc<dyn ChainClient>, feed: Arc<dyn AccountFeed>, settings: SyncSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_channel_capacity);
        Self { chain, feed, balances: DashMap::new(), events }
    }

    /// Émet à chaque observation, la toute première comprise.
    pub fn subscribe(&self) -> broadcast::Receiver<OpenOrdersUpdate> {
        self.events.subscribe()
    }

    pub fn cached(&self, id: &Pubkey) -> Option<OpenOrdersBalances> {
        self.balances.get(id).map(|balances| *balances)
    }

    pub async fn find(&self, id: &Pubkey, cache_only: bool) -> Result<Option<OpenOrdersBalances>> {
        if let Some(balances) = self.cached(id) {
            return Ok(Some(balances));
        }
        if cache_only {
            return Ok(None);
        }

        let Some(account) = self.chain.get_account(id).await? else {
            return Ok(None);
        };
        if account.data.len() != OPEN_ORDERS_SPAN {
            return Ok(None);
        }

        Ok(self.handle_account(&AccountUpdate::new(*id, account), true))
    }

    pub async fn find_or_fail(&self, id: &Pubkey) -> Result<OpenOrdersBalances> {
        self.find(id, false)
            .await?
            .ok_or_else(|| SyncError::not_found(EntityKind::OpenOrders, *id))
    }

    pub async fn init(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        self.watch().await
    }

    pub async fn watch(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        info!("[OpenOrdersTracker] Démarrage de la surveillance des comptes open orders...");
        let mut subscription = self
            .feed
            .subscribe(OPENBOOK_PROGRAM_ID, vec![AccountFilter::DataSize(OPEN_ORDERS_SPAN)])
            .await?;
        let tracker: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(update) = subscription.next().await {
                let Some(tracker) = tracker.upgrade() else { break };
                metrics::ACCOUNT_UPDATES.with_label_values(&[COMPONENT]).inc();
                tracker.handle_account(&update, false);
            }
        }))
    }

    pub fn handle_account(&self, update: &AccountUpdate, ignore_on_exists: bool) -> Option<OpenOrdersBalances> {
        let id = update.address;

        if ignore_on_exists {
            if let Some(cached) = self.cached(&id) {
                return Some(cached);
            }
        }

        let balances = match decode_open_orders(&update.data) {
            Ok(balances) => balances,
            Err(e) => {
                warn!(open_orders = %id, "[OpenOrdersTracker] {}", SyncError::invalid(EntityKind::OpenOrders, id, e.to_string()));
                metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "invalid_account"]).inc();
                return None;
            }
        };

        debug!(
            open_orders = %id,
            base_token_total = balances.base_token_total,
            quote_token_total = balances.quote_token_total,
            "[OpenOrdersTracker] Mise à jour."
        );
        self.balances.insert(id, balances);
        let _ = self.events.send(OpenOrdersUpdate { id, balances });
        Some(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{next_event, MockChain, MockFeed, PoolFixture};

    #[tokio::test]
    async fn first_observation_is_emitted_like_a_change() {
        let feed = Arc::new(MockFeed::new());
        let tracker = Arc::new(OpenOrdersTracker::new(Arc::new(MockChain::new()), feed.clone(), SyncSettings::default()));
        let mut events = tracker.subscribe();
        let _task = tracker.watch().await.unwrap();
        let fixture = PoolFixture::new();

        feed.publish(fixture.pool.open_orders, OPENBOOK_PROGRAM_ID, fixture.open_orders_bytes(5, 7)).await;
        let first = next_event(&mut events).await;
        assert_eq!(first.balances, OpenOrdersBalances { base_token_total: 5, quote_token_total: 7 });

        // Contenu identique : émis quand même, c'est au moteur de dédupliquer.
        feed.publish(fixture.pool.open_orders, OPENBOOK_PROGRAM_ID, fixture.open_orders_bytes(5, 7)).await;
        assert_eq!(next_event(&mut events).await, first);
    }

    #[tokio::test]
    async fn cache_only_never_touches_the_network() {
        let chain = Arc::new(MockChain::new());
        let fixture = PoolFixture::new();
        chain.set_account(fixture.pool.open_orders, OPENBOOK_PROGRAM_ID, fixture.open_orders_bytes(1, 2));
        let tracker = OpenOrdersTracker::new(chain.clone(), Arc::new(MockFeed::new()), SyncSettings::default());

        assert_eq!(tracker.find(&fixture.pool.open_orders, true).await.unwrap(), None);
        assert_eq!(chain.calls(), 0);

        let fetched = tracker.find_or_fail(&fixture.pool.open_orders).await.unwrap();
        assert_eq!(fetched, OpenOrdersBalances { base_token_total: 1, quote_token_total: 2 });
        assert_eq!(tracker.find(&fixture.pool.open_orders, true).await.unwrap(), Some(fetched));
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let tracker = OpenOrdersTracker::new(Arc::new(MockChain::new()), Arc::new(MockFeed::new()), SyncSettings::default());
        let error = tracker.find_or_fail(&Pubkey::new_unique()).await.unwrap_err();
        assert!(error.is_not_found());
    }
}
