// DANS : src/rpc/mod.rs

use anyhow::Result;
use async_trait::async_trait;
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{account::Account, pubkey::Pubkey};

pub mod account_feed;
pub mod resilient_client;

pub use account_feed::{AccountFeed, AccountUpdate, PubsubFeed, Subscription};
pub use resilient_client::ResilientRpcClient;

/// Filtre côté nœud pour `getProgramAccounts` et `programSubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(usize),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    pub fn pubkey_at(offset: usize, key: &Pubkey) -> Self {
        AccountFilter::Memcmp { offset, bytes: key.to_bytes().to_vec() }
    }

    /// Même sémantique que le nœud, utile pour les implémentations en mémoire.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::DataSize(size) => data.len() == *size,
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset.saturating_add(bytes.len()))
                .is_some_and(|window| window == bytes.as_slice()),
        }
    }
}

impl From<&AccountFilter> for RpcFilterType {
    fn from(filter: &AccountFilter) -> Self {
        match filter {
            AccountFilter::DataSize(size) => RpcFilterType::DataSize(*size as u64),
            AccountFilter::Memcmp { offset, bytes } => {
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(*offset, bytes.clone()))
            }
        }
    }
}

/// Le client de requêtes blockchain consommé par les registres.
/// `get_account` renvoie `None` quand le compte n'existe pas (ce n'est pas une erreur).
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>>;
}
