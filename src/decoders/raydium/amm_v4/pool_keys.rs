// DANS : src/decoders/raydium/amm_v4/pool_keys.rs

use super::{openbook_market::Market, pool::AmmPool};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

const SWAP_BASE_IN_TAG: u8 = 9;

/// Toutes les adresses nécessaires à une instruction de swap, pool et marché aplatis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKeys {
    pub id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub lp_decimals: u8,
    pub version: u8,
    pub program_id: Pubkey,
    pub authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub withdraw_queue: Pubkey,
    pub lp_vault: Pubkey,
    pub market_version: u8,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub market_authority: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
    pub lookup_table_account: Pubkey,
}

impl PoolKeys {
    pub fn new(pool: &AmmPool, market: &Market) -> Self {
        Self {
            id: pool.id,
            base_mint: pool.base_mint,
            quote_mint: pool.quote_mint,
            lp_mint: pool.lp_mint,
            base_decimals: pool.base_decimals,
            quote_decimals: pool.quote_decimals,
            lp_decimals: pool.lp_decimals,
            version: 4,
            program_id: pool.program_id,
            authority: pool.authority,
            open_orders: pool.open_orders,
            target_orders: pool.target_orders,
            base_vault: pool.base_vault,
            quote_vault: pool.quote_vault,
            withdraw_queue: pool.withdraw_queue,
            lp_vault: pool.lp_vault,
            market_version: 3,
            market_program_id: market.program_id,
            market_id: market.id,
            market_authority: market.authority,
            market_base_vault: market.base_vault,
            market_quote_vault: market.quote_vault,
            market_bids: market.bids,
            market_asks: market.asks,
            market_event_queue: market.event_queue,
            lookup_table_account: Pubkey::default(),
        }
    }

    /// `SwapBaseIn` : montant d'entrée fixé, sortie minimale garantie.
    pub fn swap_base_in_instruction(
        &self,
        user_source_token_account: &Pubkey,
        user_destination_token_account: &Pubkey,
        user_owner: &Pubkey,
        amount_in: u64,
        minimum_amount_out: u64,
    ) -> Instruction {
        let mut instruction_data = vec![SWAP_BASE_IN_TAG];
        instruction_data.extend_from_slice(&amount_in.to_le_bytes());
        instruction_data.extend_from_slice(&minimum_amount_out.to_le_bytes());

        let accounts = vec![
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new(self.id, false),
            AccountMeta::new_readonly(self.authority, false),
            AccountMeta::new(self.open_orders, false),
            AccountMeta::new(self.target_orders, false),
            AccountMeta::new(self.base_vault, false),
            AccountMeta::new(self.quote_vault, false),
            AccountMeta::new_readonly(self.market_program_id, false),
            AccountMeta::new(self.market_id, false),
            AccountMeta::new(self.market_bids, false),
            AccountMeta::new(self.market_asks, false),
            AccountMeta::new(self.market_event_queue, false),
            AccountMeta::new(self.market_base_vault, false),
            AccountMeta::new(self.market_quote_vault, false),
            AccountMeta::new_readonly(self.market_authority, false),
            AccountMeta::new(*user_source_token_account, false),
            AccountMeta::new(*user_destination_token_account, false),
            AccountMeta::new_readonly(*user_owner, true),
        ];

        Instruction {
            program_id: self.program_id,
            accounts,
            data: instruction_data,
        }
    }
}
