// DANS : src/state/vault.rs

use crate::config::SyncSettings;
use crate::decoders::spl_token_decoders::account::{decode_account, TOKEN_ACCOUNT_OWNER_OFFSET, TOKEN_ACCOUNT_SPAN};
use crate::error::{EntityKind, Result, SyncError};
use crate::monitoring::metrics;
use crate::rpc::{AccountFeed, AccountFilter, AccountUpdate, ChainClient};
use dashmap::DashMap;
use solana_sdk::{account::Account, pubkey::Pubkey};
use std::sync::{Arc, Weak};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{info, warn};

const COMPONENT: &str = "vault";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultUpdate {
    pub id: Pubkey,
    pub amount: u64,
}

/// Les montants des coffres des pools. Un seul abonnement couvre tous les coffres :
/// les comptes SPL dont le propriétaire est l'autorité de l'AMM.
pub struct VaultTracker {
    chain: Arc<dyn ChainClient>,
    feed: Arc<dyn AccountFeed>,
    authority: Pubkey,
    amounts: DashMap<Pubkey, u64>,
    events: broadcast::Sender<VaultUpdate>,
}

impl VaultTracker {
    pub fn new(chain: Arc<dyn ChainClient>, feed: Arc<dyn AccountFeed>, authority: Pubkey, settings: SyncSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_channel_capacity);
        Self { chain, feed, authority, amounts: DashMap::new(), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultUpdate> {
        self.events.subscribe()
    }

    pub fn cached(&self, id: &Pubkey) -> Option<u64> {
        self.amounts.get(id).map(|amount| *amount)
    }

    /// Un montant lu par fetch n'écrase jamais celui déjà reçu du flux, et n'est pas émis.
    fn remember(&self, id: &Pubkey, account: &Account) -> Option<u64> {
        if account.data.len() != TOKEN_ACCOUNT_SPAN {
            return None;
        }
        let amount = decode_account(&account.data).ok()?.amount;
        Some(*self.amounts.entry(*id).or_insert(amount))
    }

    pub async fn find(&self, id: &Pubkey, cache_only: bool) -> Result<Option<u64>> {
        if let Some(amount) = self.cached(id) {
            return Ok(Some(amount));
        }
        if cache_only {
            return Ok(None);
        }

        let account = self.chain.get_account(id).await?;
        Ok(account.and_then(|account| self.remember(id, &account)))
    }

    pub async fn find_or_fail(&self, id: &Pubkey) -> Result<u64> {
        self.find(id, false).await?.ok_or(SyncError::VaultNotFound(*id))
    }

    /// Les deux coffres d'un pool ; ceux absents du cache sont lus en un seul `getMultipleAccounts`.
    pub async fn find_pair(&self, base: &Pubkey, quote: &Pubkey) -> Result<(Option<u64>, Option<u64>)> {
        let (cached_base, cached_quote) = (self.cached(base), self.cached(quote));
        let missing: Vec<Pubkey> = [(base, cached_base), (quote, cached_quote)]
            .into_iter()
            .filter(|(_, cached)| cached.is_none())
            .map(|(id, _)| *id)
            .collect();

        if missing.is_empty() {
            return Ok((cached_base, cached_quote));
        }

        let accounts = self.chain.get_multiple_accounts(&missing).await?;
        for (id, account) in missing.iter().zip(accounts) {
            if let Some(account) = account {
                self.remember(id, &account);
            }
        }

        Ok((self.cached(base), self.cached(quote)))
    }

    pub async fn init(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        self.watch().await
    }

    pub async fn watch(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        info!(authority = %self.authority, "[VaultTracker] Démarrage de la surveillance des coffres...");
        let filters = vec![
            AccountFilter::DataSize(TOKEN_ACCOUNT_SPAN),
            AccountFilter::pubkey_at(TOKEN_ACCOUNT_OWNER_OFFSET, &self.authority),
        ];
        let mut subscription = self.feed.subscribe(spl_token::id(), filters).await?;
        let tracker: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(update) = subscription.next().await {
                let Some(tracker) = tracker.upgrade() else { break };
                tracker.handle_account(&update);
            }
        }))
    }

    pub fn handle_account(&self, update: &AccountUpdate) -> Option<u64> {
        metrics::ACCOUNT_UPDATES.with_label_values(&[COMPONENT]).inc();
        let id = update.address;

        let amount = match decode_account(&update.data) {
            Ok(account) => account.amount,
            Err(e) => {
                warn!(vault = %id, "[VaultTracker] {}", SyncError::invalid(EntityKind::Vault, id, e.to_string()));
                metrics::IGNORED_ACCOUNTS.with_label_values(&[COMPONENT, "invalid_account"]).inc();
                return None;
            }
        };

        self.amounts.insert(id, amount);
        let _ = self.events.send(VaultUpdate { id, amount });
        Some(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::raydium::amm_v4::{amm_authority, RAYDIUM_AMM_V4_PROGRAM_ID};
    use crate::decoders::spl_token_decoders::account::encode_account;
    use crate::testing::{assert_no_event, next_event, MockChain, MockFeed, PoolFixture};

    fn tracker(chain: Arc<MockChain>, feed: Arc<MockFeed>) -> Arc<VaultTracker> {
        Arc::new(VaultTracker::new(chain, feed, amm_authority(&RAYDIUM_AMM_V4_PROGRAM_ID), SyncSettings::default()))
    }

    #[tokio::test]
    async fn pair_is_fetched_in_one_batch() {
        let chain = Arc::new(MockChain::new());
        let fixture = PoolFixture::new();
        fixture.install(&chain, 1, (0, 0), (1000, 2000));
        let vaults = tracker(chain.clone(), Arc::new(MockFeed::new()));

        let pair = vaults.find_pair(&fixture.pool.base_vault, &fixture.pool.quote_vault).await.unwrap();
        assert_eq!(pair, (Some(1000), Some(2000)));
        assert_eq!(chain.calls(), 1);

        // Tout est en cache maintenant.
        vaults.find_pair(&fixture.pool.base_vault, &fixture.pool.quote_vault).await.unwrap();
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_caches_without_emitting() {
        let chain = Arc::new(MockChain::new());
        let fixture = PoolFixture::new();
        fixture.install(&chain, 1, (0, 0), (10, 20));
        let vaults = tracker(chain, Arc::new(MockFeed::new()));
        let mut events = vaults.subscribe();

        assert_eq!(vaults.find_or_fail(&fixture.pool.base_vault).await.unwrap(), 10);
        assert_no_event(&mut events).await;
    }

    #[tokio::test]
    async fn missing_vault_is_vault_not_found() {
        let vaults = tracker(Arc::new(MockChain::new()), Arc::new(MockFeed::new()));
        let id = Pubkey::new_unique();
        assert!(matches!(vaults.find_or_fail(&id).await, Err(SyncError::VaultNotFound(missing)) if missing == id));
        assert_eq!(vaults.find(&id, true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn feed_only_delivers_accounts_owned_by_the_authority() {
        let feed = Arc::new(MockFeed::new());
        let vaults = tracker(Arc::new(MockChain::new()), feed.clone());
        let mut events = vaults.subscribe();
        let _task = vaults.watch().await.unwrap();
        let fixture = PoolFixture::new();

        feed.publish(fixture.pool.base_vault, spl_token::id(), fixture.base_vault_bytes(1500)).await;
        assert_eq!(next_event(&mut events).await, VaultUpdate { id: fixture.pool.base_vault, amount: 1500 });

        // Compte SPL d'un utilisateur : filtré côté flux.
        let stranger = encode_account(&fixture.pool.base_mint, &Pubkey::new_unique(), 99);
        feed.publish(Pubkey::new_unique(), spl_token::id(), stranger).await;
        assert_no_event(&mut events).await;
    }
}
