// DANS : src/error.rs

use solana_sdk::pubkey::Pubkey;
use std::fmt;
use thiserror::Error;

/// Le type d'entité concerné par une erreur, pour des messages lisibles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Pool,
    Market,
    OpenOrders,
    Vault,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Pool => "pool",
            EntityKind::Market => "market account",
            EntityKind::OpenOrders => "open orders account",
            EntityKind::Vault => "vault",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Absent après une vraie tentative de fetch. Seule erreur remontée aux appelants distants.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Pubkey },

    #[error("token amount of vault {0} not found")]
    VaultNotFound(Pubkey),

    /// Mauvaise taille ou programme propriétaire inconnu : ignoré, pas une faute.
    #[error("invalid {kind} account {id}: {reason}")]
    InvalidAccount {
        kind: EntityKind,
        id: Pubkey,
        reason: String,
    },

    /// Adresse nulle ou décimales à zéro : jamais mis en cache, persisté ni émis.
    #[error("{kind} {id} is structurally invalid")]
    StructurallyInvalid { kind: EntityKind, id: Pubkey },

    #[error("reserves of pool {0} would be negative")]
    ReserveUnderflow(Pubkey),

    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
}

impl SyncError {
    pub fn not_found(kind: EntityKind, id: Pubkey) -> Self {
        SyncError::NotFound { kind, id }
    }

    pub fn invalid(kind: EntityKind, id: Pubkey, reason: impl Into<String>) -> Self {
        SyncError::InvalidAccount {
            kind,
            id,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. } | SyncError::VaultNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
