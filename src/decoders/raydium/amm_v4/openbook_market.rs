// DANS : src/decoders/raydium/amm_v4/openbook_market.rs

use anyhow::{anyhow, bail, Result};
use bytemuck::{from_bytes, Pod, Zeroable};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey};
use std::mem::size_of;

pub const OPENBOOK_PROGRAM_ID: Pubkey = pubkey!("srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX");
pub const SERUM_MARKET_V3_PROGRAM_ID: Pubkey = pubkey!("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");

/// Les programmes dont un compte de marché v3 peut dépendre.
pub const MARKET_V3_PROGRAM_IDS: [Pubkey; 2] = [OPENBOOK_PROGRAM_ID, SERUM_MARKET_V3_PROGRAM_ID];

// "serum" devant, "padding" derrière.
const ACCOUNT_HEAD_PADDING: usize = 5;
const ACCOUNT_TAIL_PADDING: usize = 7;

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct MarketStateLayout {
    pub account_flags: u64,
    pub own_address: Pubkey,
    pub vault_signer_nonce: u64,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub base_deposits_total: u64,
    pub base_fees_accrued: u64,
    pub quote_vault: Pubkey,
    pub quote_deposits_total: u64,
    pub quote_fees_accrued: u64,
    pub quote_dust_threshold: u64,
    pub request_queue: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub fee_rate_bps: u64,
    pub referrer_rebates_accrued: u64,
}

pub const MARKET_STATE_SPAN: usize =
    ACCOUNT_HEAD_PADDING + size_of::<MarketStateLayout>() + ACCOUNT_TAIL_PADDING;

const _: () = assert!(MARKET_STATE_SPAN == 388);

/// Les champs d'un marché dont un pool AMM v4 a besoin pour swapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: Pubkey,
    pub program_id: Pubkey,
    pub authority: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
}

impl Market {
    pub fn is_structurally_valid(&self) -> bool {
        [self.base_vault, self.quote_vault, self.bids, self.asks, self.event_queue]
            .iter()
            .all(|key| *key != Pubkey::default())
    }
}

/// Décode un marché v3. L'autorité du marché est dérivée de `vault_signer_nonce`.
pub fn decode_market(address: &Pubkey, data: &[u8], owner: &Pubkey) -> Result<Market> {
    if data.len() != MARKET_STATE_SPAN {
        bail!("Market data length mismatch ({} != {}).", data.len(), MARKET_STATE_SPAN);
    }
    let layout: &MarketStateLayout = from_bytes(
        &data[ACCOUNT_HEAD_PADDING..ACCOUNT_HEAD_PADDING + size_of::<MarketStateLayout>()],
    );

    let nonce = layout.vault_signer_nonce;
    let authority = Pubkey::create_program_address(&[address.as_ref(), &nonce.to_le_bytes()], owner)
        .map_err(|e| anyhow!("Impossible de dériver l'autorité du marché {} : {}", address, e))?;

    Ok(Market {
        id: *address,
        program_id: *owner,
        authority,
        base_vault: layout.base_vault,
        quote_vault: layout.quote_vault,
        event_queue: layout.event_queue,
        bids: layout.bids,
        asks: layout.asks,
    })
}

/// Construit les octets d'un compte de marché (tests uniquement).
#[cfg(test)]
pub(crate) fn encode_market(market: &Market, vault_signer_nonce: u64) -> Vec<u8> {
    let mut layout = MarketStateLayout::zeroed();
    layout.own_address = market.id;
    layout.vault_signer_nonce = vault_signer_nonce;
    layout.base_vault = market.base_vault;
    layout.quote_vault = market.quote_vault;
    layout.event_queue = market.event_queue;
    layout.bids = market.bids;
    layout.asks = market.asks;

    let mut data = Vec::with_capacity(MARKET_STATE_SPAN);
    data.extend_from_slice(b"serum");
    data.extend_from_slice(bytemuck::bytes_of(&layout));
    data.extend_from_slice(b"padding");
    data
}

/// Cherche un nonce qui produit une adresse hors courbe (tests uniquement).
#[cfg(test)]
pub(crate) fn find_vault_signer_nonce(market: &Pubkey, program_id: &Pubkey) -> (u64, Pubkey) {
    (0u64..)
        .find_map(|nonce| {
            Pubkey::create_program_address(&[market.as_ref(), &nonce.to_le_bytes()], program_id)
                .ok()
                .map(|authority| (nonce, authority))
        })
        .expect("un nonce valide existe toujours")
}
