// DANS : src/decoders/raydium/amm_v4/test.rs

use super::open_orders::encode_open_orders;
use super::openbook_market::{encode_market, find_vault_signer_nonce};
use super::pool::{encode_pool, offsets};
use super::*;
use crate::decoders::spl_token_decoders::account::{decode_account, encode_account};
use solana_sdk::pubkey::Pubkey;

fn sample_pool(id: Pubkey) -> AmmPool {
    AmmPool {
        id,
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
        market_id: Pubkey::new_unique(),
        open_time: 1_700_000_000,
    }
}

#[test]
fn amm_authority_is_the_well_known_address() {
    assert_eq!(
        amm_authority(&RAYDIUM_AMM_V4_PROGRAM_ID).to_string(),
        "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1"
    );
}

#[test]
fn layout_offsets_match_the_on_chain_account() {
    assert_eq!(POOL_STATE_SPAN, 752);
    assert_eq!(offsets::STATUS, 0);
    assert_eq!(offsets::NEED_TAKE_PNL, 192);
    assert_eq!(offsets::BASE_VAULT, 336);
    assert_eq!(offsets::QUOTE_VAULT, 368);
    assert_eq!(offsets::BASE_MINT, 400);
    assert_eq!(offsets::QUOTE_MINT, 432);
    assert_eq!(offsets::OPEN_ORDERS, 496);
}

#[test]
fn decode_pool_reads_identity_and_volatile_fields() {
    let id = Pubkey::new_unique();
    let pool = sample_pool(id);
    let state = PoolState { status: 6, base_need_take_pnl: 11, quote_need_take_pnl: 22 };
    let data = encode_pool(&pool, &state);

    let decoded = decode_pool(&id, &data, &RAYDIUM_AMM_V4_PROGRAM_ID).unwrap();

    assert_eq!(decoded.pool, pool);
    assert_eq!(decoded.state, state);
    assert!(decoded.state.is_swapable());
    assert_eq!(decode_pool_state(&data).unwrap(), state);
}

#[test]
fn decode_pool_rejects_wrong_length() {
    let id = Pubkey::new_unique();
    let mut data = encode_pool(&sample_pool(id), &PoolState { status: 1, base_need_take_pnl: 0, quote_need_take_pnl: 0 });
    data.push(0);
    assert!(decode_pool(&id, &data, &RAYDIUM_AMM_V4_PROGRAM_ID).is_err());
    assert!(decode_pool_state(&data[..100]).is_err());
}

#[test]
fn swapable_statuses() {
    let swapable: Vec<u64> = (0..=8).filter(|s| PoolState { status: *s, base_need_take_pnl: 0, quote_need_take_pnl: 0 }.is_swapable()).collect();
    assert_eq!(swapable, vec![1, 6, 7]);
    assert_eq!(AmmStatus::from_raw(3), Some(AmmStatus::WithdrawOnly));
    assert_eq!(AmmStatus::from_raw(42), None);
}

#[test]
fn null_addresses_or_zero_decimals_are_structurally_invalid() {
    let pool = sample_pool(Pubkey::new_unique());
    assert!(pool.is_structurally_valid());

    let mut no_vault = pool.clone();
    no_vault.quote_vault = Pubkey::default();
    assert!(!no_vault.is_structurally_valid());

    let mut no_decimals = pool.clone();
    no_decimals.base_decimals = 0;
    assert!(!no_decimals.is_structurally_valid());
}

#[test]
fn decode_market_derives_the_vault_signer() {
    let id = Pubkey::new_unique();
    let (nonce, authority) = find_vault_signer_nonce(&id, &OPENBOOK_PROGRAM_ID);
    let market = Market {
        id,
        program_id: OPENBOOK_PROGRAM_ID,
        authority,
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        event_queue: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
    };
    let data = encode_market(&market, nonce);
    assert_eq!(data.len(), MARKET_STATE_SPAN);

    let decoded = decode_market(&id, &data, &OPENBOOK_PROGRAM_ID).unwrap();
    assert_eq!(decoded, market);
    assert!(decoded.is_structurally_valid());

    assert!(decode_market(&id, &data[..300], &OPENBOOK_PROGRAM_ID).is_err());
}

#[test]
fn decode_open_orders_reads_the_totals() {
    let balances = OpenOrdersBalances { base_token_total: 1234, quote_token_total: 5678 };
    let data = encode_open_orders(&balances);
    assert_eq!(data.len(), OPEN_ORDERS_SPAN);
    assert_eq!(decode_open_orders(&data).unwrap(), balances);
    assert!(decode_open_orders(&data[..OPEN_ORDERS_SPAN - 1]).is_err());
}

#[test]
fn token_account_amount() {
    let mint = Pubkey::new_unique();
    let owner = amm_authority(&RAYDIUM_AMM_V4_PROGRAM_ID);
    let decoded = decode_account(&encode_account(&mint, &owner, 42)).unwrap();
    assert_eq!(decoded.amount, 42);
    assert_eq!(decoded.owner, owner);
    assert_eq!(decoded.mint, mint);
}

#[test]
fn swap_base_in_instruction_layout() {
    let pool = sample_pool(Pubkey::new_unique());
    let (_, authority) = find_vault_signer_nonce(&pool.market_id, &OPENBOOK_PROGRAM_ID);
    let market = Market {
        id: pool.market_id,
        program_id: OPENBOOK_PROGRAM_ID,
        authority,
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        event_queue: Pubkey::new_unique(),
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
    };
    let keys = PoolKeys::new(&pool, &market);
    assert_eq!(keys.version, 4);
    assert_eq!(keys.market_version, 3);
    assert_eq!(keys.market_authority, authority);
    assert_eq!(keys.lookup_table_account, Pubkey::default());

    let source = Pubkey::new_unique();
    let destination = Pubkey::new_unique();
    let owner = Pubkey::new_unique();
    let ix = keys.swap_base_in_instruction(&source, &destination, &owner, 1_000, 990);

    assert_eq!(ix.program_id, RAYDIUM_AMM_V4_PROGRAM_ID);
    assert_eq!(ix.accounts.len(), 18);
    assert_eq!(ix.data[0], 9);
    assert_eq!(u64::from_le_bytes(ix.data[1..9].try_into().unwrap()), 1_000);
    assert_eq!(u64::from_le_bytes(ix.data[9..17].try_into().unwrap()), 990);
    assert_eq!(ix.accounts[1].pubkey, pool.id);
    assert_eq!(ix.accounts[14].pubkey, authority);
    assert!(ix.accounts[17].is_signer);
}
