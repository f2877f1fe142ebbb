// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyring error taxonomy.
//!
//! Every public operation returns [`KeyRingResult`]. Variants carry the vault
//! id or chain id that the caller needs to render a message; hardware failures
//! keep their typed [`LedgerSignError`] kind instead of collapsing into a
//! generic failure.

use crate::ledger::LedgerSignError;
use crate::storage::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum KeyRingError {
    #[error("vault not found: {vault_id}")]
    VaultNotFound { vault_id: String },

    #[error("key ring is locked")]
    VaultLocked,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("key ring is empty")]
    KeyRingEmpty,

    #[error("key ring already signed up")]
    AlreadySignedUp,

    #[error("chain not found: {chain_id}")]
    ChainNotFound { chain_id: String },

    #[error("{key_ring_type} key ring does not support chain {chain_id}: {reason}")]
    UnsupportedEcosystem {
        key_ring_type: &'static str,
        chain_id: String,
        reason: String,
    },

    #[error("{capability} is not implemented by the {key_ring_type} key ring")]
    CapabilityNotImplemented {
        capability: &'static str,
        key_ring_type: &'static str,
    },

    #[error("ledger is not initialized for {app}")]
    LedgerAppNotInitialized { app: String },

    #[error("ledger can't sign in the background, the signature must come from a foreground device session")]
    HardwareSigningNotSupportedInBackground,

    #[error(transparent)]
    Hardware(#[from] LedgerSignError),

    #[error("vault {vault_id} is corrupted: {reason}")]
    CorruptVaultData { vault_id: String, reason: String },

    #[error("coin type for chain {chain_id} is already finalized on vault {vault_id}")]
    CoinTypeAlreadyFinalized { vault_id: String, chain_id: String },

    #[error("coin type {coin_type} is not a candidate for chain {chain_id}")]
    InvalidCoinType { chain_id: String, coin_type: u32 },

    #[error("{origin} has no permission for {chain_id}")]
    PermissionDenied { origin: String, chain_id: String },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Storage(#[from] DatabaseError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl KeyRingError {
    pub fn vault_not_found(vault_id: impl Into<String>) -> Self {
        Self::VaultNotFound {
            vault_id: vault_id.into(),
        }
    }

    pub fn chain_not_found(chain_id: impl Into<String>) -> Self {
        Self::ChainNotFound {
            chain_id: chain_id.into(),
        }
    }

    pub fn corrupt(vault_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptVaultData {
            vault_id: vault_id.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for API consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            KeyRingError::VaultNotFound { .. } => "vault_not_found",
            KeyRingError::VaultLocked => "vault_locked",
            KeyRingError::InvalidCredential => "invalid_credential",
            KeyRingError::KeyRingEmpty => "key_ring_empty",
            KeyRingError::AlreadySignedUp => "already_signed_up",
            KeyRingError::ChainNotFound { .. } => "chain_not_found",
            KeyRingError::UnsupportedEcosystem { .. } => "unsupported_ecosystem",
            KeyRingError::CapabilityNotImplemented { .. } => "capability_not_implemented",
            KeyRingError::LedgerAppNotInitialized { .. } => "ledger_app_not_initialized",
            KeyRingError::HardwareSigningNotSupportedInBackground => {
                "hardware_signing_not_supported_in_background"
            }
            KeyRingError::Hardware(e) => e.error_code(),
            KeyRingError::CorruptVaultData { .. } => "corrupt_vault_data",
            KeyRingError::CoinTypeAlreadyFinalized { .. } => "coin_type_already_finalized",
            KeyRingError::InvalidCoinType { .. } => "invalid_coin_type",
            KeyRingError::PermissionDenied { .. } => "permission_denied",
            KeyRingError::InvalidKey(_) => "invalid_key",
            KeyRingError::InvalidArgument(_) => "invalid_argument",
            KeyRingError::Crypto(_) => "crypto_error",
            KeyRingError::Storage(_) => "storage_error",
            KeyRingError::Serde(_) => "serialization_error",
        }
    }
}

pub type KeyRingResult<T> = Result<T, KeyRingError>;
