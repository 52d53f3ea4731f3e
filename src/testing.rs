// DANS : src/testing.rs
// Doublures en mémoire du client RPC et du flux de comptes, et constructeurs de comptes.

use crate::decoders::raydium::amm_v4::{
    amm_authority,
    open_orders::encode_open_orders,
    openbook_market::{encode_market, find_vault_signer_nonce},
    pool::encode_pool,
    AmmPool, Market, OpenOrdersBalances, PoolState, OPENBOOK_PROGRAM_ID, RAYDIUM_AMM_V4_PROGRAM_ID,
};
use crate::decoders::spl_token_decoders::account::encode_account;
use crate::rpc::{AccountFeed, AccountFilter, AccountUpdate, ChainClient, Subscription};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{account::Account, pubkey::Pubkey};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};
use tokio::sync::{broadcast, mpsc};

/// Un "nœud" en mémoire : les comptes posés par le test, et le nombre d'appels reçus.
#[derive(Default)]
pub struct MockChain {
    accounts: DashMap<Pubkey, Account>,
    calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        let account = Account { lamports: 1, data, owner, executable: false, rent_epoch: 0 };
        self.accounts.insert(address, account);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.get(address).map(|account| account.clone()))
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(addresses
            .iter()
            .map(|address| self.accounts.get(address).map(|account| account.clone()))
            .collect())
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .iter()
            .filter(|entry| entry.owner == *program_id)
            .filter(|entry| filters.iter().all(|filter| filter.matches(&entry.data)))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect())
    }
}

struct MockSubscriber {
    program_id: Pubkey,
    filters: Vec<AccountFilter>,
    sender: mpsc::Sender<AccountUpdate>,
}

/// Un flux en mémoire : `publish` livre la mise à jour à chaque abonnement dont les filtres correspondent.
#[derive(Default)]
pub struct MockFeed {
    subscribers: Mutex<Vec<MockSubscriber>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().iter().filter(|s| !s.sender.is_closed()).count()
    }

    pub async fn publish(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        let senders: Vec<_> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.program_id == owner && s.filters.iter().all(|f| f.matches(&data)))
            .map(|s| s.sender.clone())
            .collect();

        for sender in senders {
            let _ = sender.send(AccountUpdate { address, data: data.clone(), owner }).await;
        }
    }
}

#[async_trait]
impl AccountFeed for MockFeed {
    async fn subscribe(&self, program_id: Pubkey, filters: Vec<AccountFilter>) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(1024);
        self.subscribers.lock().unwrap().push(MockSubscriber { program_id, filters, sender });
        Ok(Subscription::new(receiver, None))
    }
}

/// Attend le prochain événement, ou panique au bout d'une seconde.
pub async fn next_event<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("aucun événement reçu")
        .expect("canal fermé")
}

/// Vérifie qu'aucun événement n'arrive pendant un court délai.
pub async fn assert_no_event<T: Clone + std::fmt::Debug>(receiver: &mut broadcast::Receiver<T>) {
    if let Ok(event) = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await {
        panic!("événement inattendu : {:?}", event);
    }
}

pub fn sample_market() -> Market {
    let id = Pubkey::new_unique();
    let (_, authority) = find_vault_signer_nonce(&id, &OPENBOOK_PROGRAM_ID);
    Market {
        id,
        program_id: OPENBOOK_PROGRAM_ID,
        authority,
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        event_queue: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
    }
}

pub fn market_bytes(market: &Market) -> Vec<u8> {
    let (nonce, _) = find_vault_signer_nonce(&market.id, &market.program_id);
    encode_market(market, nonce)
}

/// Un pool complet et cohérent (mints, coffres, open orders et marché).
#[derive(Debug, Clone)]
pub struct PoolFixture {
    pub pool: AmmPool,
    pub market: Market,
}

impl PoolFixture {
    pub fn new() -> Self {
        let market = sample_market();
        let pool = AmmPool {
            id: Pubkey::new_unique(),
            program_id: RAYDIUM_AMM_V4_PROGRAM_ID,
            base_mint: Pubkey::new_unique(),
            quote_mint: Pubkey::new_unique(),
            lp_mint: Pubkey::new_unique(),
            base_decimals: 9,
            quote_decimals: 6,
            lp_decimals: 9,
            authority: amm_authority(&RAYDIUM_AMM_V4_PROGRAM_ID),
            open_orders: Pubkey::new_unique(),
            target_orders: Pubkey::new_unique(),
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            lp_vault: Pubkey::new_unique(),
            withdraw_queue: Pubkey::new_unique(),
            market_id: market.id,
            open_time: 0,
        };
        Self { pool, market }
    }

    pub fn pool_bytes(&self, status: u64, need_take_pnl: (u64, u64)) -> Vec<u8> {
        let state = PoolState {
            status,
            base_need_take_pnl: need_take_pnl.0,
            quote_need_take_pnl: need_take_pnl.1,
        };
        encode_pool(&self.pool, &state)
    }

    pub fn open_orders_bytes(&self, base_token_total: u64, quote_token_total: u64) -> Vec<u8> {
        encode_open_orders(&OpenOrdersBalances { base_token_total, quote_token_total })
    }

    pub fn base_vault_bytes(&self, amount: u64) -> Vec<u8> {
        encode_account(&self.pool.base_mint, &self.pool.authority, amount)
    }

    pub fn quote_vault_bytes(&self, amount: u64) -> Vec<u8> {
        encode_account(&self.pool.quote_mint, &self.pool.authority, amount)
    }

    /// Pose tous les comptes du pool sur la chaîne simulée.
    pub fn install(&self, chain: &MockChain, status: u64, open_orders: (u64, u64), vaults: (u64, u64)) {
        chain.set_account(self.pool.id, RAYDIUM_AMM_V4_PROGRAM_ID, self.pool_bytes(status, (0, 0)));
        chain.set_account(self.market.id, OPENBOOK_PROGRAM_ID, market_bytes(&self.market));
        chain.set_account(self.pool.open_orders, OPENBOOK_PROGRAM_ID, self.open_orders_bytes(open_orders.0, open_orders.1));
        chain.set_account(self.pool.base_vault, spl_token::id(), self.base_vault_bytes(vaults.0));
        chain.set_account(self.pool.quote_vault, spl_token::id(), self.quote_vault_bytes(vaults.1));
    }
}
