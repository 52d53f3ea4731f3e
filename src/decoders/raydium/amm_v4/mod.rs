// DANS : src/decoders/raydium/amm_v4/mod.rs

pub mod open_orders;
pub mod openbook_market;
pub mod pool;
pub mod pool_keys;

#[cfg(test)]
mod test;

pub use open_orders::{decode_open_orders, OpenOrdersBalances, OPEN_ORDERS_SPAN};
pub use openbook_market::{decode_market, Market, MARKET_STATE_SPAN, MARKET_V3_PROGRAM_IDS, OPENBOOK_PROGRAM_ID};
pub use pool::{
    amm_authority, decode_pool, decode_pool_state, AmmPool, AmmStatus, LivePool, PoolState,
    POOL_STATE_SPAN, RAYDIUM_AMM_V4_PROGRAM_ID, RAYDIUM_AMM_V4_PROGRAM_IDS,
};
pub use pool_keys::PoolKeys;
