use super::{AccountFilter, ChainClient};
use crate::monitoring::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::sleep;

/// Un "wrapper" autour du RpcClient de Solana qui ajoute une logique de
/// ré-essai automatique pour les appels RPC qui échouent à cause d'erreurs réseau temporaires.
#[derive(Clone)]
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    max_retries: u8,
    delay_ms: u64,
}

impl ResilientRpcClient {
    pub fn new(rpc_url: String, commitment: CommitmentConfig, max_retries: u8, delay_ms: u64) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_commitment(rpc_url, commitment)),
            max_retries,
            delay_ms,
        }
    }

    /// Détermine si une erreur du client est temporaire et si une nouvelle tentative doit être effectuée.
    fn is_retryable(error: &ClientError) -> bool {
        matches!(
            error.kind,
            ClientErrorKind::Reqwest(_) | ClientErrorKind::RpcError(_) | ClientErrorKind::Io(_)
        )
    }

    /// Exécute `call` avec la politique de ré-essai et compte le résultat par méthode.
    async fn with_retries<T, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => {
                    metrics::RPC_REQUESTS_TOTAL.with_label_values(&[method, "success"]).inc();
                    return Ok(value);
                }
                Err(e) if Self::is_retryable(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    sleep(Duration::from_millis(self.delay_ms)).await;
                }
                Err(e) => {
                    metrics::RPC_REQUESTS_TOTAL.with_label_values(&[method, "failure"]).inc();
                    return Err(e).with_context(|| format!("Échec final de {}", method));
                }
            }
        }
    }

    fn account_config(&self) -> RpcAccountInfoConfig {
        RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            data_slice: None,
            commitment: Some(self.client.commitment()),
            min_context_slot: None,
        }
    }
}

#[async_trait]
impl ChainClient for ResilientRpcClient {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let commitment = self.client.commitment();
        let response = self
            .with_retries("get_account", || self.client.get_account_with_commitment(address, commitment))
            .await
            .with_context(|| format!("get_account pour {}", address))?;
        Ok(response.value)
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        self.with_retries("get_multiple_accounts", || self.client.get_multiple_accounts(addresses))
            .await
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(filters.iter().map(Into::into).collect()),
            account_config: self.account_config(),
            with_context: Some(false),
            sort_results: None,
        };

        self.with_retries("get_program_accounts", || {
            self.client.get_program_accounts_with_config(program_id, config.clone())
        })
        .await
        .with_context(|| format!("get_program_accounts pour le programme {}", program_id))
    }
}
