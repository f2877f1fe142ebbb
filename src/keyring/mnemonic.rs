// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! BIP-39 mnemonic backend.
//!
//! Keys are derived at `m/{purpose}'/{coin_type}'/{account}'/{change}/{index}`
//! where purpose is 44, or the payment type's purpose (84 / 86) on Bitcoin
//! chains. Derived private keys are cached per vault and path until the
//! keyring locks.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use lru::LruCache;
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

use super::{BIP44HDPath, KeyRing, KeyRingType, NewKeyRingVault, BIP44_PATH_FIELD};
use crate::chains::ModularChainInfo;
use crate::crypto::{DigestMethod, PrivKeySecp256k1, PubKeySecp256k1, SignatureRsv};
use crate::error::{KeyRingError, KeyRingResult};
use crate::vault::{PlainObject, Vault, VaultService};

/// Sensitive field holding the phrase.
pub const MNEMONIC_FIELD: &str = "mnemonic";
/// Insensitive map of `coin type → compressed pubkey hex` recorded at creation.
pub const PUB_KEYS_FIELD: &str = "pubKeys";
/// Coin type whose public key is recorded when the vault is created.
pub const RECORDED_COIN_TYPE: u32 = 118;

const PRIVATE_KEY_CACHE_SIZE: usize = 32;
const BIP44_PURPOSE: u32 = 44;

pub struct KeyRingMnemonic {
    vault_service: Arc<VaultService>,
    cache: Mutex<LruCache<String, Zeroizing<[u8; 32]>>>,
}

impl KeyRingMnemonic {
    pub fn new(vault_service: Arc<VaultService>) -> Self {
        Self {
            vault_service,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PRIVATE_KEY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Validate the phrase and build the vault payloads.
    pub fn create_key_ring_vault(
        &self,
        mnemonic: &str,
        bip44_path: BIP44HDPath,
    ) -> KeyRingResult<NewKeyRingVault> {
        bip44_path.validate()?;
        let mnemonic = parse_mnemonic(mnemonic)
            .map_err(|e| KeyRingError::InvalidArgument(format!("invalid mnemonic: {e}")))?;

        let path = derivation_path(BIP44_PURPOSE, RECORDED_COIN_TYPE, &bip44_path);
        let pub_key = derive_private_key(&mnemonic, &path)?.pub_key();

        let mut insensitive = PlainObject::new();
        insensitive.insert(BIP44_PATH_FIELD.to_string(), serde_json::to_value(bip44_path)?);
        let mut pub_keys = PlainObject::new();
        pub_keys.insert(RECORDED_COIN_TYPE.to_string(), Value::String(pub_key.to_hex()));
        insensitive.insert(PUB_KEYS_FIELD.to_string(), Value::Object(pub_keys));

        let mut sensitive = PlainObject::new();
        sensitive.insert(MNEMONIC_FIELD.to_string(), Value::String(mnemonic.to_string()));

        Ok(NewKeyRingVault {
            insensitive,
            sensitive,
        })
    }

    /// Drop cached keys of one vault, or all of them.
    pub fn clear_cache(&self, vault_id: Option<&str>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        match vault_id {
            None => cache.clear(),
            Some(id) => {
                let prefix = format!("{id}:");
                let stale: Vec<String> = cache
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in stale {
                    cache.pop(&key);
                }
            }
        }
    }

    fn private_key(
        &self,
        vault: &Vault,
        coin_type: u32,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PrivKeySecp256k1> {
        if self.vault_service.is_locked() {
            return Err(KeyRingError::VaultLocked);
        }

        let bip44_path = BIP44HDPath::of_vault(vault)?;
        let path = derivation_path(purpose_for(chain), coin_type, &bip44_path);
        let cache_key = format!("{}:{path}", vault.id);

        if let Some(bytes) = self.cached(&cache_key) {
            return PrivKeySecp256k1::from_bytes(&bytes[..]);
        }

        let sensitive = self.vault_service.decrypt(vault)?;
        let phrase = sensitive
            .get_str(MNEMONIC_FIELD)
            .ok_or_else(|| KeyRingError::corrupt(&vault.id, "mnemonic is missing"))?;
        let mnemonic =
            parse_mnemonic(phrase).map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))?;
        let key = derive_private_key(&mnemonic, &path)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(cache_key, key.to_bytes());
        }
        debug!(vault_id = %vault.id, path = %path, "Derived mnemonic key");
        Ok(key)
    }

    fn cached(&self, cache_key: &str) -> Option<Zeroizing<[u8; 32]>> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(cache_key).cloned()
    }
}

impl KeyRing for KeyRingMnemonic {
    fn supported_key_ring_type(&self) -> KeyRingType {
        KeyRingType::Mnemonic
    }

    fn get_pub_key(
        &self,
        vault: &Vault,
        coin_type: u32,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeySecp256k1> {
        let pub_key = self.private_key(vault, coin_type, chain)?.pub_key();

        if purpose_for(chain) == BIP44_PURPOSE {
            let recorded = vault
                .insensitive
                .get(PUB_KEYS_FIELD)
                .and_then(|keys| keys.get(coin_type.to_string()))
                .and_then(Value::as_str);
            if let Some(recorded) = recorded {
                if recorded != pub_key.to_hex() {
                    return Err(KeyRingError::corrupt(
                        &vault.id,
                        format!("derived public key for coin type {coin_type} does not match"),
                    ));
                }
            }
        }
        Ok(pub_key)
    }

    fn sign(
        &self,
        vault: &Vault,
        coin_type: u32,
        data: &[u8],
        digest_method: DigestMethod,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<SignatureRsv> {
        let digest = digest_method.digest(data)?;
        self.private_key(vault, coin_type, chain)?
            .sign_digest32(&digest)
    }
}

pub fn derivation_path(purpose: u32, coin_type: u32, path: &BIP44HDPath) -> String {
    format!(
        "m/{purpose}'/{coin_type}'/{}'/{}/{}",
        path.account, path.change, path.address_index
    )
}

fn purpose_for(chain: &ModularChainInfo) -> u32 {
    chain
        .bitcoin()
        .map(|bitcoin| bitcoin.payment_type.purpose())
        .unwrap_or(BIP44_PURPOSE)
}

fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, bip39::Error> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    Mnemonic::parse_in(Language::English, normalized.as_str())
}

fn derive_private_key(mnemonic: &Mnemonic, path: &str) -> KeyRingResult<PrivKeySecp256k1> {
    let seed = Zeroizing::new(mnemonic.to_seed(""));
    let path = DerivationPath::from_str(path)
        .map_err(|e| KeyRingError::InvalidArgument(format!("derivation path {path}: {e}")))?;
    let xprv = XPrv::derive_from_path(&seed[..], &path)
        .map_err(|e| KeyRingError::Crypto(e.to_string()))?;
    Ok(PrivKeySecp256k1::from_signing_key(xprv.private_key().clone()))
}

/// BIP-39 reference phrase used by the known-answer tests.
#[cfg(test)]
pub(crate) const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::chains::fixtures::{bitcoin_chain, cosmos_chain};
    use crate::crypto::bitcoin::{native_segwit_address, taproot_address, BitcoinNetwork};
    use crate::crypto::bitcoin::SupportedPaymentType;
    use crate::keyring::KEY_RING_TYPE_FIELD;
    use crate::storage::KeyringDatabase;
    use crate::vault::{KdfParams, KEY_RING_VAULT_TYPE};

    fn setup() -> (Arc<VaultService>, KeyRingMnemonic, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(KeyringDatabase::open(&dir.path().join("keyring.redb")).unwrap());
        let vault_service = Arc::new(VaultService::new(db, KdfParams::insecure_for_tests()));
        vault_service.sign_up("password").unwrap();
        let backend = KeyRingMnemonic::new(vault_service.clone());
        (vault_service, backend, dir)
    }

    fn store(vault_service: &VaultService, created: NewKeyRingVault) -> Vault {
        let mut insensitive = created.insensitive;
        insensitive.insert(KEY_RING_TYPE_FIELD.to_string(), json!("mnemonic"));
        let id = vault_service
            .add_vault(KEY_RING_VAULT_TYPE, insensitive, &created.sensitive)
            .unwrap();
        vault_service.get_vault(KEY_RING_VAULT_TYPE, &id).unwrap().unwrap()
    }

    #[test]
    fn known_addresses() {
        let (vault_service, backend, _dir) = setup();
        let created = backend
            .create_key_ring_vault(ABANDON, BIP44HDPath::default())
            .unwrap();
        let vault = store(&vault_service, created);

        let cosmos = cosmos_chain("cosmoshub-4", "cosmos", 118);
        let pub_key = backend.get_pub_key(&vault, 118, &cosmos).unwrap();
        assert_eq!(
            pub_key.to_bech32("cosmos").unwrap(),
            "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4"
        );

        let eth = backend.get_pub_key(&vault, 60, &cosmos).unwrap();
        assert_eq!(
            eth.eth_hex_address(),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );

        let segwit = bitcoin_chain("bip122:mainnet:native-segwit", SupportedPaymentType::NativeSegwit);
        let key = backend.get_pub_key(&vault, 0, &segwit).unwrap();
        assert_eq!(
            native_segwit_address(&key, BitcoinNetwork::Mainnet).unwrap(),
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );

        let taproot = bitcoin_chain("bip122:mainnet:taproot", SupportedPaymentType::Taproot);
        let key = backend.get_pub_key(&vault, 0, &taproot).unwrap();
        assert_eq!(
            taproot_address(&key, BitcoinNetwork::Mainnet).unwrap(),
            "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"
        );
    }

    #[test]
    fn creation_records_the_cosmos_key() {
        let (vault_service, backend, _dir) = setup();
        let created = backend
            .create_key_ring_vault(&ABANDON.to_uppercase(), BIP44HDPath::default())
            .unwrap();
        assert_eq!(created.sensitive[MNEMONIC_FIELD], json!(ABANDON));
        let vault = store(&vault_service, created);

        let recorded = vault.insensitive[PUB_KEYS_FIELD]["118"].as_str().unwrap().to_string();
        let cosmos = cosmos_chain("cosmoshub-4", "cosmos", 118);
        let first = backend.get_pub_key(&vault, 118, &cosmos).unwrap();
        let second = backend.get_pub_key(&vault, 118, &cosmos).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_hex(), recorded);
    }

    #[test]
    fn mismatched_record_is_corruption() {
        let (vault_service, backend, _dir) = setup();
        let mut created = backend
            .create_key_ring_vault(ABANDON, BIP44HDPath::default())
            .unwrap();
        created.insensitive.insert(
            PUB_KEYS_FIELD.to_string(),
            json!({ "118": "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798" }),
        );
        let vault = store(&vault_service, created);

        let cosmos = cosmos_chain("cosmoshub-4", "cosmos", 118);
        assert!(matches!(
            backend.get_pub_key(&vault, 118, &cosmos),
            Err(KeyRingError::CorruptVaultData { .. })
        ));
    }

    #[test]
    fn locked_store_refuses_derivation() {
        let (vault_service, backend, _dir) = setup();
        let created = backend
            .create_key_ring_vault(ABANDON, BIP44HDPath::default())
            .unwrap();
        let vault = store(&vault_service, created);
        let cosmos = cosmos_chain("cosmoshub-4", "cosmos", 118);
        backend.get_pub_key(&vault, 118, &cosmos).unwrap();

        vault_service.lock();
        assert!(matches!(
            backend.get_pub_key(&vault, 118, &cosmos),
            Err(KeyRingError::VaultLocked)
        ));
    }

    #[test]
    fn sign_produces_recoverable_signature() {
        let (vault_service, backend, _dir) = setup();
        let created = backend
            .create_key_ring_vault(ABANDON, BIP44HDPath::default())
            .unwrap();
        let vault = store(&vault_service, created);
        let cosmos = cosmos_chain("cosmoshub-4", "cosmos", 118);

        let sig = backend
            .sign(&vault, 118, b"hello", DigestMethod::Sha256, &cosmos)
            .unwrap();
        assert!(sig.v.is_some());
        let again = backend
            .sign(&vault, 118, b"hello", DigestMethod::Sha256, &cosmos)
            .unwrap();
        assert_eq!(sig, again);
    }

    #[test]
    fn cache_eviction_per_vault() {
        let (vault_service, backend, _dir) = setup();
        let vault = store(
            &vault_service,
            backend
                .create_key_ring_vault(ABANDON, BIP44HDPath::default())
                .unwrap(),
        );
        let cosmos = cosmos_chain("cosmoshub-4", "cosmos", 118);
        backend.get_pub_key(&vault, 118, &cosmos).unwrap();
        assert_eq!(backend.cache.lock().unwrap().len(), 1);

        backend.clear_cache(Some("other"));
        assert_eq!(backend.cache.lock().unwrap().len(), 1);
        backend.clear_cache(Some(&vault.id));
        assert_eq!(backend.cache.lock().unwrap().len(), 0);
    }

    #[test]
    fn rejects_bad_input() {
        let (_vault_service, backend, _dir) = setup();
        assert!(matches!(
            backend.create_key_ring_vault("abandon abandon", BIP44HDPath::default()),
            Err(KeyRingError::InvalidArgument(_))
        ));
        let bad_path = BIP44HDPath {
            change: 5,
            ..Default::default()
        };
        assert!(backend.create_key_ring_vault(ABANDON, bad_path).is_err());
    }

    #[test]
    fn derivation_path_format() {
        let path = BIP44HDPath {
            account: 1,
            change: 0,
            address_index: 4,
        };
        assert_eq!(derivation_path(44, 118, &path), "m/44'/118'/1'/0/4");
    }
}
