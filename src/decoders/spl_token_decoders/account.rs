// DANS : src/decoders/spl_token_decoders/account.rs

use anyhow::{bail, Result};
use solana_program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use spl_token::state::Account as SplTokenAccount;

pub const TOKEN_ACCOUNT_SPAN: usize = SplTokenAccount::LEN;
/// Offset du champ `owner` (après `mint`), utilisé par les filtres memcmp.
pub const TOKEN_ACCOUNT_OWNER_OFFSET: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccount {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

/// Décode un compte de jeton SPL ; le tracker de coffres ne garde que `amount`.
pub fn decode_account(data: &[u8]) -> Result<TokenAccount> {
    if data.len() != TOKEN_ACCOUNT_SPAN {
        bail!("Token account data length mismatch ({} != {}).", data.len(), TOKEN_ACCOUNT_SPAN);
    }
    let spl_account = SplTokenAccount::unpack(data)?;
    Ok(TokenAccount {
        mint: spl_account.mint,
        owner: spl_account.owner,
        amount: spl_account.amount,
    })
}

/// Construit les octets d'un compte de jeton initialisé (tests uniquement).
#[cfg(test)]
pub(crate) fn encode_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    use spl_token::state::AccountState;

    let account = SplTokenAccount {
        mint: *mint,
        owner: *owner,
        amount,
        state: AccountState::Initialized,
        ..SplTokenAccount::default()
    };
    let mut data = vec![0u8; TOKEN_ACCOUNT_SPAN];
    SplTokenAccount::pack(account, &mut data).expect("buffer de la bonne taille");
    data
}
