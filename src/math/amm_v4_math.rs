// DANS: src/math/amm_v4_math.rs

use anyhow::{anyhow, Result};

pub const TRADE_FEE_NUMERATOR: u128 = 25;
pub const TRADE_FEE_DENOMINATOR: u128 = 10_000;
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Produit constant avec les frais de trading de l'AMM v4 (25 / 10000) prélevés sur l'entrée.
pub fn compute_amount_out(amount_in: u64, reserve_in: u128, reserve_out: u128) -> Result<u64> {
    if reserve_in == 0 || reserve_out == 0 {
        return Ok(0);
    }
    let amount_in = amount_in as u128;
    let fee = amount_in * TRADE_FEE_NUMERATOR / TRADE_FEE_DENOMINATOR;
    let amount_in_with_fee = amount_in - fee;

    let numerator = reserve_out
        .checked_mul(amount_in_with_fee)
        .ok_or_else(|| anyhow!("Overflow du numérateur"))?;
    let denominator = reserve_in
        .checked_add(amount_in_with_fee)
        .ok_or_else(|| anyhow!("Overflow du dénominateur"))?;

    u64::try_from(numerator / denominator).map_err(|_| anyhow!("Montant de sortie hors u64"))
}

/// Plancher de sortie pour une tolérance `slippage_bps` : `amount_out / (1 + slippage)`.
pub fn minimum_amount_out(amount_out: u64, slippage_bps: u16) -> u64 {
    let floor = amount_out as u128 * BPS_DENOMINATOR / (BPS_DENOMINATOR + slippage_bps as u128);
    floor as u64
}
