// DANS : src/decoders/raydium/amm_v4/open_orders.rs

use anyhow::{bail, Result};
use bytemuck::{from_bytes, Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::mem::size_of;

const ACCOUNT_HEAD_PADDING: usize = 5;

// head + account_flags + market + owner + base_token_free
const TOTALS_OFFSET: usize = ACCOUNT_HEAD_PADDING + 8 + 32 + 32 + 8;

/// OPEN_ORDERS_LAYOUT_V2 : flags, market, owner, 4 soldes, free_slot_bits, is_bid_bits,
/// 128 order ids, 128 client ids, referrer_rebates, puis 7 octets de padding.
pub const OPEN_ORDERS_SPAN: usize =
    ACCOUNT_HEAD_PADDING + 8 + 32 + 32 + 8 * 4 + 16 + 16 + 16 * 128 + 8 * 128 + 8 + 7;

const _: () = assert!(OPEN_ORDERS_SPAN == 3228);

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct OpenOrdersTotals {
    base_token_total: u64,
    quote_token_free: u64,
    quote_token_total: u64,
}

/// Les totaux que le market maker du pool a encore sur le carnet d'ordres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrdersBalances {
    pub base_token_total: u64,
    pub quote_token_total: u64,
}

pub fn decode_open_orders(data: &[u8]) -> Result<OpenOrdersBalances> {
    if data.len() != OPEN_ORDERS_SPAN {
        bail!("OpenOrders data length mismatch ({} != {}).", data.len(), OPEN_ORDERS_SPAN);
    }
    let totals: &OpenOrdersTotals =
        from_bytes(&data[TOTALS_OFFSET..TOTALS_OFFSET + size_of::<OpenOrdersTotals>()]);

    Ok(OpenOrdersBalances {
        base_token_total: totals.base_token_total,
        quote_token_total: totals.quote_token_total,
    })
}

/// Construit les octets d'un compte OpenOrders (tests uniquement).
#[cfg(test)]
pub(crate) fn encode_open_orders(balances: &OpenOrdersBalances) -> Vec<u8> {
    let mut data = vec![0u8; OPEN_ORDERS_SPAN];
    data[..5].copy_from_slice(b"serum");
    let totals = OpenOrdersTotals {
        base_token_total: balances.base_token_total,
        quote_token_free: 0,
        quote_token_total: balances.quote_token_total,
    };
    data[TOTALS_OFFSET..TOTALS_OFFSET + size_of::<OpenOrdersTotals>()]
        .copy_from_slice(bytemuck::bytes_of(&totals));
    data
}
