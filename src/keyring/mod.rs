// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Keyring
//!
//! Key material lives in vaults of type `keyRing`. Each vault names its
//! backend in `insensitive.keyRingType`:
//!
//! | Backend       | Sensitive payload | Secp256k1 keys      | Starknet keys       | Background sign |
//! |---------------|-------------------|---------------------|---------------------|-----------------|
//! | `mnemonic`    | `{ mnemonic }`    | BIP-32 derivation   | via secp256k1 key   | yes             |
//! | `private-key` | `{ privateKey }`  | the single key      | via secp256k1 key   | yes             |
//! | `ledger`      | none              | recorded per app    | recorded `Starknet` | no              |
//!
//! The backend set is closed ([`KeyRingBackend`]); adding one means handling
//! it in every `match`.

pub mod auto_lock;
pub mod ledger;
pub mod mnemonic;
pub mod private_key;
pub mod service;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chains::{CosmosChainInfo, ModularChainInfo};
use crate::crypto::{DigestMethod, PubKeySecp256k1, PubKeyStarknet, SignatureRsv};
use crate::error::{KeyRingError, KeyRingResult};
use crate::vault::{PlainObject, Vault};

pub use auto_lock::AutoLocker;
pub use ledger::KeyRingLedger;
pub use mnemonic::KeyRingMnemonic;
pub use private_key::KeyRingPrivateKey;
pub use service::KeyRingService;

/// Insensitive field holding the backend discriminator.
pub const KEY_RING_TYPE_FIELD: &str = "keyRingType";
/// Insensitive field holding `{ name }`.
pub const KEY_RING_META_FIELD: &str = "keyRingMeta";
/// Insensitive field holding the vault's BIP-44 branch.
pub const BIP44_PATH_FIELD: &str = "bip44Path";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRingStatus {
    Empty,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyRingType {
    Mnemonic,
    PrivateKey,
    Ledger,
}

impl KeyRingType {
    pub const ALL: [KeyRingType; 3] = [
        KeyRingType::Mnemonic,
        KeyRingType::PrivateKey,
        KeyRingType::Ledger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRingType::Mnemonic => "mnemonic",
            KeyRingType::PrivateKey => "private-key",
            KeyRingType::Ledger => "ledger",
        }
    }

    /// Backend named by a vault's insensitive metadata.
    pub fn of_vault(vault: &Vault) -> KeyRingResult<Self> {
        let raw = vault
            .insensitive_str(KEY_RING_TYPE_FIELD)
            .ok_or_else(|| KeyRingError::corrupt(&vault.id, "missing keyRingType"))?;
        raw.parse()
            .map_err(|_| KeyRingError::corrupt(&vault.id, format!("unknown keyRingType {raw}")))
    }
}

impl fmt::Display for KeyRingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyRingType {
    type Err = KeyRingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| KeyRingError::InvalidArgument(format!("unknown key ring type {s}")))
    }
}

/// BIP-44 branch below the coin type: `m/44'/coin'/{account}'/{change}/{address_index}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BIP44HDPath {
    pub account: u32,
    pub change: u32,
    pub address_index: u32,
}

impl BIP44HDPath {
    /// Path recorded on the vault, default branch when absent.
    pub fn of_vault(vault: &Vault) -> KeyRingResult<Self> {
        match vault.insensitive.get(BIP44_PATH_FIELD) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| KeyRingError::corrupt(&vault.id, format!("bip44Path: {e}"))),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> KeyRingResult<()> {
        if self.change > 1 {
            return Err(KeyRingError::InvalidArgument(format!(
                "change must be 0 or 1, got {}",
                self.change
            )));
        }
        if self.account >= 0x8000_0000 || self.address_index >= 0x8000_0000 {
            return Err(KeyRingError::InvalidArgument(
                "path component out of range".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cosmos-SDK chain with Ethereum-style keys and addresses: coin type 60 or
/// one of the `eth-address-gen` / `eth-key-sign` features.
pub fn is_ethermint_like(cosmos: &CosmosChainInfo) -> bool {
    cosmos.bip44.coin_type == 60
        || cosmos.has_feature("eth-address-gen")
        || cosmos.has_feature("eth-key-sign")
}

/// Read-only projection of a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_ring_type: KeyRingType,
    pub is_selected: bool,
    pub insensitive: PlainObject,
}

/// Output of a backend's vault construction.
#[derive(Debug, Default)]
pub struct NewKeyRingVault {
    pub insensitive: PlainObject,
    pub sensitive: PlainObject,
}

/// Mnemonic / private-key vault exported with its decrypted secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKeyRingVault {
    #[serde(rename = "type")]
    pub key_ring_type: KeyRingType,
    pub id: String,
    pub insensitive: PlainObject,
    pub sensitive: String,
}

// =============================================================================
// Capability contract
// =============================================================================

/// Operations every backend supports.
pub trait KeyRing: Send + Sync {
    fn supported_key_ring_type(&self) -> KeyRingType;

    fn get_pub_key(
        &self,
        vault: &Vault,
        coin_type: u32,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeySecp256k1>;

    fn sign(
        &self,
        vault: &Vault,
        coin_type: u32,
        data: &[u8],
        digest_method: DigestMethod,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<SignatureRsv>;
}

/// Backends that hold a native Starknet public key.
pub trait StarknetCapable: Send + Sync {
    fn get_pub_key_starknet(
        &self,
        vault: &Vault,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeyStarknet>;
}

/// What a backend can do, for callers deciding how to route a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRingCapabilities {
    pub starknet_pub_key: bool,
    pub background_signing: bool,
    pub exportable: bool,
}

#[derive(Clone)]
pub enum KeyRingBackend {
    Mnemonic(Arc<KeyRingMnemonic>),
    PrivateKey(Arc<KeyRingPrivateKey>),
    Ledger(Arc<KeyRingLedger>),
}

impl KeyRingBackend {
    pub fn key_ring_type(&self) -> KeyRingType {
        self.as_key_ring().supported_key_ring_type()
    }

    pub fn as_key_ring(&self) -> &dyn KeyRing {
        match self {
            KeyRingBackend::Mnemonic(k) => k.as_ref(),
            KeyRingBackend::PrivateKey(k) => k.as_ref(),
            KeyRingBackend::Ledger(k) => k.as_ref(),
        }
    }

    pub fn as_starknet_capable(&self) -> Option<&dyn StarknetCapable> {
        match self {
            KeyRingBackend::Ledger(k) => Some(k.as_ref()),
            KeyRingBackend::Mnemonic(_) | KeyRingBackend::PrivateKey(_) => None,
        }
    }

    /// Probe the Starknet capability, failing with
    /// `CapabilityNotImplemented` instead of returning a placeholder key.
    pub fn get_pub_key_starknet(
        &self,
        vault: &Vault,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeyStarknet> {
        match self.as_starknet_capable() {
            Some(capable) => capable.get_pub_key_starknet(vault, chain),
            None => Err(KeyRingError::CapabilityNotImplemented {
                capability: "getPubKeyStarknet",
                key_ring_type: self.key_ring_type().as_str(),
            }),
        }
    }

    pub fn capabilities(&self) -> KeyRingCapabilities {
        match self {
            KeyRingBackend::Mnemonic(_) | KeyRingBackend::PrivateKey(_) => KeyRingCapabilities {
                starknet_pub_key: false,
                background_signing: true,
                exportable: true,
            },
            KeyRingBackend::Ledger(_) => KeyRingCapabilities {
                starknet_pub_key: true,
                background_signing: false,
                exportable: false,
            },
        }
    }

    /// Drop any derived key material held in memory.
    pub fn clear_cache(&self, vault_id: Option<&str>) {
        match self {
            KeyRingBackend::Mnemonic(k) => k.clear_cache(vault_id),
            KeyRingBackend::PrivateKey(_) | KeyRingBackend::Ledger(_) => {}
        }
    }
}

/// The fixed set of backends, one instance each.
#[derive(Clone)]
pub struct KeyRingBackends {
    pub mnemonic: Arc<KeyRingMnemonic>,
    pub private_key: Arc<KeyRingPrivateKey>,
    pub ledger: Arc<KeyRingLedger>,
}

impl KeyRingBackends {
    pub fn get(&self, key_ring_type: KeyRingType) -> KeyRingBackend {
        match key_ring_type {
            KeyRingType::Mnemonic => KeyRingBackend::Mnemonic(self.mnemonic.clone()),
            KeyRingType::PrivateKey => KeyRingBackend::PrivateKey(self.private_key.clone()),
            KeyRingType::Ledger => KeyRingBackend::Ledger(self.ledger.clone()),
        }
    }

    pub fn for_vault(&self, vault: &Vault) -> KeyRingResult<KeyRingBackend> {
        Ok(self.get(KeyRingType::of_vault(vault)?))
    }

    pub fn all(&self) -> [KeyRingBackend; 3] {
        KeyRingType::ALL.map(|t| self.get(t))
    }
}
