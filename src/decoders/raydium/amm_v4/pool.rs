// DANS : src/decoders/raydium/amm_v4/pool.rs

use anyhow::{bail, Result};
use bytemuck::{from_bytes, Pod, Zeroable};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey};
use std::mem::{offset_of, size_of};

pub const RAYDIUM_AMM_V4_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");

pub const RAYDIUM_AMM_V4_PROGRAM_IDS: [Pubkey; 1] = [RAYDIUM_AMM_V4_PROGRAM_ID];

// Les structures on-chain (LIQUIDITY_STATE_LAYOUT_V4, 752 octets)
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct Fees {
    pub min_separate_numerator: u64,
    pub min_separate_denominator: u64,
    pub trade_fee_numerator: u64,
    pub trade_fee_denominator: u64,
    pub pnl_numerator: u64,
    pub pnl_denominator: u64,
    pub swap_fee_numerator: u64,
    pub swap_fee_denominator: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct StateData {
    pub base_need_take_pnl: u64,
    pub quote_need_take_pnl: u64,
    pub quote_total_pnl: u64,
    pub base_total_pnl: u64,
    pub pool_open_time: u64,
    pub punish_quote_amount: u64,
    pub punish_base_amount: u64,
    pub orderbook_to_init_time: u64,
    pub swap_base_in_amount: u128,
    pub swap_quote_out_amount: u128,
    pub swap_base_to_quote_fee: u64,
    pub swap_quote_in_amount: u128,
    pub swap_base_out_amount: u128,
    pub swap_quote_to_base_fee: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct AmmInfoLayout {
    pub status: u64,
    pub nonce: u64,
    pub max_order: u64,
    pub depth: u64,
    pub base_decimal: u64,
    pub quote_decimal: u64,
    pub state: u64,
    pub reset_flag: u64,
    pub min_size: u64,
    pub vol_max_cut_ratio: u64,
    pub amount_wave_ratio: u64,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub min_price_multiplier: u64,
    pub max_price_multiplier: u64,
    pub system_decimal_value: u64,
    pub fees: Fees,
    pub state_data: StateData,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub open_orders: Pubkey,
    pub market_id: Pubkey,
    pub market_program_id: Pubkey,
    pub target_orders: Pubkey,
    pub withdraw_queue: Pubkey,
    pub lp_vault: Pubkey,
    pub owner: Pubkey,
    pub lp_reserve: u64,
    pub padding: [u64; 3],
}

pub const POOL_STATE_SPAN: usize = size_of::<AmmInfoLayout>();

/// Offsets utilisés par les filtres memcmp et par le décodage partiel des mises à jour.
pub mod offsets {
    use super::{AmmInfoLayout, StateData};
    use std::mem::offset_of;

    pub const STATUS: usize = offset_of!(AmmInfoLayout, status);
    pub const NEED_TAKE_PNL: usize =
        offset_of!(AmmInfoLayout, state_data) + offset_of!(StateData, base_need_take_pnl);
    pub const BASE_VAULT: usize = offset_of!(AmmInfoLayout, base_vault);
    pub const QUOTE_VAULT: usize = offset_of!(AmmInfoLayout, quote_vault);
    pub const BASE_MINT: usize = offset_of!(AmmInfoLayout, base_mint);
    pub const QUOTE_MINT: usize = offset_of!(AmmInfoLayout, quote_mint);
    pub const OPEN_ORDERS: usize = offset_of!(AmmInfoLayout, open_orders);
}

const _: () = assert!(POOL_STATE_SPAN == 752);
const _: () = assert!(offsets::NEED_TAKE_PNL == 8 * 24);
const _: () = assert!(offset_of!(AmmInfoLayout, base_vault) == 336);

/// Les statuts du programme AMM v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum AmmStatus {
    Uninitialized = 0,
    Initialized = 1,
    Disabled = 2,
    WithdrawOnly = 3,
    LiquidityOnly = 4,
    OrderBookOnly = 5,
    SwapOnly = 6,
    WaitingTrade = 7,
}

impl AmmStatus {
    pub fn from_raw(status: u64) -> Option<Self> {
        Some(match status {
            0 => AmmStatus::Uninitialized,
            1 => AmmStatus::Initialized,
            2 => AmmStatus::Disabled,
            3 => AmmStatus::WithdrawOnly,
            4 => AmmStatus::LiquidityOnly,
            5 => AmmStatus::OrderBookOnly,
            6 => AmmStatus::SwapOnly,
            7 => AmmStatus::WaitingTrade,
            _ => return None,
        })
    }

    pub fn is_swapable(self) -> bool {
        matches!(self, AmmStatus::Initialized | AmmStatus::SwapOnly | AmmStatus::WaitingTrade)
    }
}

/// L'identité d'un pool (la partie persistée). `open_time` est en secondes unix, 0 tant que non connu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmmPool {
    pub id: Pubkey,
    pub program_id: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub lp_decimals: u8,
    pub authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub lp_vault: Pubkey,
    pub withdraw_queue: Pubkey,
    pub market_id: Pubkey,
    pub open_time: u64,
}

impl AmmPool {
    /// Adresse nulle sur un champ requis ou décimales à zéro : compte "placeholder".
    pub fn is_structurally_valid(&self) -> bool {
        let required = [
            self.base_mint,
            self.quote_mint,
            self.lp_mint,
            self.open_orders,
            self.target_orders,
            self.base_vault,
            self.quote_vault,
            self.market_id,
        ];

        required.iter().all(|key| *key != Pubkey::default())
            && self.base_decimals > 0
            && self.quote_decimals > 0
    }
}

/// La partie volatile, relue à chaque mise à jour du compte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub status: u64,
    pub base_need_take_pnl: u64,
    pub quote_need_take_pnl: u64,
}

impl PoolState {
    pub fn is_swapable(&self) -> bool {
        AmmStatus::from_raw(self.status).is_some_and(AmmStatus::is_swapable)
    }
}

/// Un pool dont l'état volatil est connu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivePool {
    #[serde(flatten)]
    pub pool: AmmPool,
    #[serde(flatten)]
    pub state: PoolState,
}

impl LivePool {
    pub fn id(&self) -> Pubkey {
        self.pool.id
    }
}

pub fn amm_authority(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"amm authority"], program_id).0
}

pub fn decode_pool(address: &Pubkey, data: &[u8], owner: &Pubkey) -> Result<LivePool> {
    if data.len() != POOL_STATE_SPAN {
        bail!("AMM V4 data length mismatch ({} != {}).", data.len(), POOL_STATE_SPAN);
    }
    let layout: &AmmInfoLayout = from_bytes(data);
    let base_decimals = layout.base_decimal;
    let quote_decimals = layout.quote_decimal;
    let state_data = layout.state_data;

    let pool = AmmPool {
        id: *address,
        program_id: *owner,
        base_mint: layout.base_mint,
        quote_mint: layout.quote_mint,
        lp_mint: layout.lp_mint,
        base_decimals: u8::try_from(base_decimals).unwrap_or(0),
        quote_decimals: u8::try_from(quote_decimals).unwrap_or(0),
        // Le LP d'un pool v4 a toujours les décimales du token de base.
        lp_decimals: u8::try_from(base_decimals).unwrap_or(0),
        authority: amm_authority(owner),
        open_orders: layout.open_orders,
        target_orders: layout.target_orders,
        base_vault: layout.base_vault,
        quote_vault: layout.quote_vault,
        lp_vault: layout.lp_vault,
        withdraw_queue: layout.withdraw_queue,
        market_id: layout.market_id,
        open_time: state_data.pool_open_time,
    };

    let state = PoolState {
        status: layout.status,
        base_need_take_pnl: state_data.base_need_take_pnl,
        quote_need_take_pnl: state_data.quote_need_take_pnl,
    };

    Ok(LivePool { pool, state })
}

/// Ne relit que `status` et les deux `need_take_pnl`.
pub fn decode_pool_state(data: &[u8]) -> Result<PoolState> {
    let read_u64 = |offset: usize| -> Result<u64> {
        let bytes = data
            .get(offset..offset + 8)
            .ok_or_else(|| anyhow::anyhow!("AMM V4 data too short for offset {}", offset))?;
        Ok(u64::from_le_bytes(bytes.try_into()?))
    };

    Ok(PoolState {
        status: read_u64(offsets::STATUS)?,
        base_need_take_pnl: read_u64(offsets::NEED_TAKE_PNL)?,
        quote_need_take_pnl: read_u64(offsets::NEED_TAKE_PNL + 8)?,
    })
}

/// Construit les octets d'un compte de pool (tests uniquement).
#[cfg(test)]
pub(crate) fn encode_pool(pool: &AmmPool, state: &PoolState) -> Vec<u8> {
    let mut layout = AmmInfoLayout::zeroed();
    layout.status = state.status;
    layout.base_decimal = pool.base_decimals as u64;
    layout.quote_decimal = pool.quote_decimals as u64;
    layout.state_data.base_need_take_pnl = state.base_need_take_pnl;
    layout.state_data.quote_need_take_pnl = state.quote_need_take_pnl;
    layout.state_data.pool_open_time = pool.open_time;
    layout.base_vault = pool.base_vault;
    layout.quote_vault = pool.quote_vault;
    layout.base_mint = pool.base_mint;
    layout.quote_mint = pool.quote_mint;
    layout.lp_mint = pool.lp_mint;
    layout.open_orders = pool.open_orders;
    layout.market_id = pool.market_id;
    layout.target_orders = pool.target_orders;
    layout.withdraw_queue = pool.withdraw_queue;
    layout.lp_vault = pool.lp_vault;
    bytemuck::bytes_of(&layout).to_vec()
}
