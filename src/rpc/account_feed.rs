// DANS : src/rpc/account_feed.rs

use super::AccountFilter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::{str::FromStr, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

const RECONNECT_DELAY_SECS: u64 = 5;

/// Une notification brute : `(adresse, octets du compte, programme propriétaire)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate {
    pub address: Pubkey,
    pub data: Vec<u8>,
    pub owner: Pubkey,
}

impl AccountUpdate {
    pub fn new(address: Pubkey, account: Account) -> Self {
        Self { address, data: account.data, owner: account.owner }
    }
}

/// Un abonnement actif. Le lâcher (drop) désabonne : la tâche qui alimente le canal est annulée.
pub struct Subscription {
    updates: mpsc::Receiver<AccountUpdate>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(updates: mpsc::Receiver<AccountUpdate>, task: Option<JoinHandle<()>>) -> Self {
        Self { updates, task }
    }

    pub async fn next(&mut self) -> Option<AccountUpdate> {
        self.updates.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Le flux de changements de comptes : un abonnement par programme + filtres.
#[async_trait]
pub trait AccountFeed: Send + Sync {
    async fn subscribe(&self, program_id: Pubkey, filters: Vec<AccountFilter>) -> Result<Subscription>;
}

/// Implémentation WebSocket (`programSubscribe`) avec reconnexion automatique.
#[derive(Clone)]
pub struct PubsubFeed {
    ws_url: String,
    commitment: CommitmentConfig,
    capacity: usize,
}

impl PubsubFeed {
    pub fn new(ws_url: String, commitment: CommitmentConfig, capacity: usize) -> Self {
        Self { ws_url, commitment, capacity: capacity.max(1) }
    }
}

#[async_trait]
impl AccountFeed for PubsubFeed {
    async fn subscribe(&self, program_id: Pubkey, filters: Vec<AccountFilter>) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let ws_url = self.ws_url.clone();
        let commitment = self.commitment;

        let task = tokio::spawn(async move {
            loop {
                match stream_program_accounts(&ws_url, commitment, &program_id, &filters, &sender).await {
                    Ok(()) if sender.is_closed() => return,
                    Ok(()) => warn!(program = %program_id, "[AccountFeed] Le stream s'est terminé. Reconnexion..."),
                    Err(e) => error!(program = %program_id, "[AccountFeed] Erreur dans le stream : {:?}. Reconnexion dans {}s...", e, RECONNECT_DELAY_SECS),
                }
                tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        });

        Ok(Subscription::new(receiver, Some(task)))
    }
}

async fn stream_program_accounts(
    ws_url: &str,
    commitment: CommitmentConfig,
    program_id: &Pubkey,
    filters: &[AccountFilter],
    sender: &mpsc::Sender<AccountUpdate>,
) -> Result<()> {
    let client = PubsubClient::new(ws_url)
        .await
        .with_context(|| format!("Connexion WebSocket à {} échouée", ws_url))?;

    let config = RpcProgramAccountsConfig {
        filters: Some(filters.iter().map(Into::into).collect()),
        account_config: RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            data_slice: None,
            commitment: Some(commitment),
            min_context_slot: None,
        },
        with_context: Some(false),
        sort_results: None,
    };

    let (mut stream, _unsubscribe) = client
        .program_subscribe(program_id, Some(config))
        .await
        .context("Échec de l'abonnement programSubscribe")?;

    info!(program = %program_id, "[AccountFeed] Abonnement réussi.");

    while let Some(response) = stream.next().await {
        let keyed = response.value;
        let Ok(address) = Pubkey::from_str(&keyed.pubkey) else { continue };
        let Some(account) = keyed.account.decode::<Account>() else { continue };

        if sender.send(AccountUpdate::new(address, account)).await.is_err() {
            // Plus personne n'écoute : l'abonnement a été lâché.
            return Ok(());
        }
    }
    Ok(())
}
