// DANS : src/state/pool_finder.rs

use crate::decoders::raydium::amm_v4::PoolKeys;
use crate::error::Result;
use crate::math::amm_v4_math::{compute_amount_out, minimum_amount_out};
use crate::state::{
    liquidity::{LiquidityEngine, Reserves},
    pool::PoolRegistry,
};
use futures_util::future::join_all;
use serde::Serialize;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use tracing::{debug, warn};

/// Un pool prêt pour un swap : ses comptes et ses réserves actuelles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub keys: PoolKeys,
    pub reserves: Reserves,
}

impl PoolInfo {
    /// Sortie attendue pour `amount_in` du mint `token_in`, au prix des réserves connues.
    pub fn get_quote(&self, token_in: &Pubkey, amount_in: u64) -> anyhow::Result<u64> {
        let (reserve_in, reserve_out) = if *token_in == self.keys.base_mint {
            (self.reserves.base, self.reserves.quote)
        } else if *token_in == self.keys.quote_mint {
            (self.reserves.quote, self.reserves.base)
        } else {
            anyhow::bail!("Le mint {} n'appartient pas au pool {}", token_in, self.keys.id);
        };
        compute_amount_out(amount_in, reserve_in, reserve_out)
    }

    /// Instruction `SwapBaseIn` dimensionnée sur les réserves, sortie minimale selon `slippage_bps`.
    pub fn create_swap_instruction(
        &self,
        token_in: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        user_source_token_account: &Pubkey,
        user_destination_token_account: &Pubkey,
        user_owner: &Pubkey,
    ) -> anyhow::Result<Instruction> {
        let amount_out = self.get_quote(token_in, amount_in)?;
        Ok(self.keys.swap_base_in_instruction(
            user_source_token_account,
            user_destination_token_account,
            user_owner,
            amount_in,
            minimum_amount_out(amount_out, slippage_bps),
        ))
    }
}

/// Les pools d'une paire (dans les deux sens), les plus liquides d'abord.
/// Un pool dont les clés ou les réserves ne se résolvent pas est ignoré.
pub async fn find_pools(
    pools: &PoolRegistry,
    liquidity: &LiquidityEngine,
    token_a: &Pubkey,
    token_b: &Pubkey,
) -> Result<Vec<PoolInfo>> {
    let candidates = pools.find_by_pair(token_a, token_b).await?;
    debug!(token_a = %token_a, token_b = %token_b, candidates = candidates.len(), "[PoolFinder] Pools candidats.");

    let resolved = join_all(candidates.iter().map(|pool| async move {
        let keys = pools.get_pool_keys(&pool.id).await?;
        let reserves = liquidity.get(&pool.id).await?;
        Ok::<_, crate::error::SyncError>(PoolInfo { keys, reserves })
    }))
    .await;

    let mut found: Vec<PoolInfo> = candidates
        .iter()
        .zip(resolved)
        .filter_map(|(pool, result)| match result {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(pool = %pool.id, "[PoolFinder] Pool ignoré : {}", e);
                None
            }
        })
        .collect();

    found.sort_by(|a, b| b.reserves.liquidity().cmp(&a.reserves.liquidity()));
    Ok(found)
}
