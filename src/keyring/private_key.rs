// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single imported secp256k1 private key. The coin type is ignored; every
//! chain sees the same key.

use std::sync::Arc;

use serde_json::Value;

use super::{KeyRing, KeyRingType, NewKeyRingVault};
use crate::chains::ModularChainInfo;
use crate::crypto::{DigestMethod, PrivKeySecp256k1, PubKeySecp256k1, SignatureRsv};
use crate::error::{KeyRingError, KeyRingResult};
use crate::vault::{PlainObject, Vault, VaultService};

/// Sensitive field holding the key as hex.
pub const PRIVATE_KEY_FIELD: &str = "privateKey";
/// Insensitive field holding the compressed public key as hex.
pub const PUBLIC_KEY_FIELD: &str = "publicKey";
/// Insensitive field for caller-supplied metadata (e.g. the social login
/// that produced the key).
pub const KEY_META_FIELD: &str = "meta";

pub struct KeyRingPrivateKey {
    vault_service: Arc<VaultService>,
}

impl KeyRingPrivateKey {
    pub fn new(vault_service: Arc<VaultService>) -> Self {
        Self { vault_service }
    }

    pub fn create_key_ring_vault(
        &self,
        private_key: &[u8],
        meta: PlainObject,
    ) -> KeyRingResult<NewKeyRingVault> {
        let key = PrivKeySecp256k1::from_bytes(private_key)?;

        let mut insensitive = PlainObject::new();
        insensitive.insert(PUBLIC_KEY_FIELD.to_string(), Value::String(key.pub_key().to_hex()));
        if !meta.is_empty() {
            insensitive.insert(KEY_META_FIELD.to_string(), Value::Object(meta));
        }

        let mut sensitive = PlainObject::new();
        sensitive.insert(
            PRIVATE_KEY_FIELD.to_string(),
            Value::String(alloy::hex::encode(&key.to_bytes()[..])),
        );

        Ok(NewKeyRingVault {
            insensitive,
            sensitive,
        })
    }

    fn private_key(&self, vault: &Vault) -> KeyRingResult<PrivKeySecp256k1> {
        let sensitive = self.vault_service.decrypt(vault)?;
        let hex = sensitive
            .get_str(PRIVATE_KEY_FIELD)
            .ok_or_else(|| KeyRingError::corrupt(&vault.id, "private key is missing"))?;
        let key = PrivKeySecp256k1::from_hex(hex)
            .map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))?;

        if let Some(recorded) = vault.insensitive_str(PUBLIC_KEY_FIELD) {
            if recorded != key.pub_key().to_hex() {
                return Err(KeyRingError::corrupt(
                    &vault.id,
                    "private key does not match the recorded public key",
                ));
            }
        }
        Ok(key)
    }
}

impl KeyRing for KeyRingPrivateKey {
    fn supported_key_ring_type(&self) -> KeyRingType {
        KeyRingType::PrivateKey
    }

    fn get_pub_key(
        &self,
        vault: &Vault,
        _coin_type: u32,
        _chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeySecp256k1> {
        Ok(self.private_key(vault)?.pub_key())
    }

    fn sign(
        &self,
        vault: &Vault,
        _coin_type: u32,
        data: &[u8],
        digest_method: DigestMethod,
        _chain: &ModularChainInfo,
    ) -> KeyRingResult<SignatureRsv> {
        let digest = digest_method.digest(data)?;
        self.private_key(vault)?.sign_digest32(&digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::cosmos_chain;
    use crate::keyring::KEY_RING_TYPE_FIELD;
    use crate::storage::KeyringDatabase;
    use crate::vault::{KdfParams, KEY_RING_VAULT_TYPE};
    use serde_json::json;

    fn key_one() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        bytes
    }

    fn setup() -> (Arc<VaultService>, KeyRingPrivateKey, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(KeyringDatabase::open(&dir.path().join("keyring.redb")).unwrap());
        let vault_service = Arc::new(VaultService::new(db, KdfParams::insecure_for_tests()));
        vault_service.sign_up("password").unwrap();
        let backend = KeyRingPrivateKey::new(vault_service.clone());
        (vault_service, backend, dir)
    }

    fn store(vault_service: &VaultService, created: NewKeyRingVault) -> Vault {
        let mut insensitive = created.insensitive;
        insensitive.insert(KEY_RING_TYPE_FIELD.to_string(), json!("private-key"));
        let id = vault_service
            .add_vault(KEY_RING_VAULT_TYPE, insensitive, &created.sensitive)
            .unwrap();
        vault_service.get_vault(KEY_RING_VAULT_TYPE, &id).unwrap().unwrap()
    }

    #[test]
    fn same_key_for_every_coin_type() {
        let (vault_service, backend, _dir) = setup();
        let created = backend
            .create_key_ring_vault(&key_one(), PlainObject::new())
            .unwrap();
        assert!(!created.insensitive.contains_key(KEY_META_FIELD));
        let vault = store(&vault_service, created);
        let chain = cosmos_chain("cosmoshub-4", "cosmos", 118);

        let a = backend.get_pub_key(&vault, 118, &chain).unwrap();
        let b = backend.get_pub_key(&vault, 60, &chain).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.eth_hex_address(), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
        assert_eq!(vault.insensitive_str(PUBLIC_KEY_FIELD), Some(a.to_hex().as_str()));
    }

    #[test]
    fn keccak_signature_is_recoverable() {
        let (vault_service, backend, _dir) = setup();
        let vault = store(
            &vault_service,
            backend
                .create_key_ring_vault(&key_one(), PlainObject::new())
                .unwrap(),
        );
        let chain = cosmos_chain("evmos_9001-2", "evmos", 60);
        let sig = backend
            .sign(&vault, 60, b"payload", DigestMethod::Keccak256, &chain)
            .unwrap();
        assert!(matches!(sig.v, Some(0) | Some(1)));
    }

    #[test]
    fn tampered_public_key_is_corruption() {
        let (vault_service, backend, _dir) = setup();
        let mut created = backend
            .create_key_ring_vault(&key_one(), PlainObject::new())
            .unwrap();
        created
            .insensitive
            .insert(PUBLIC_KEY_FIELD.to_string(), json!("02deadbeef"));
        let vault = store(&vault_service, created);
        let chain = cosmos_chain("cosmoshub-4", "cosmos", 118);
        assert!(matches!(
            backend.get_pub_key(&vault, 118, &chain),
            Err(KeyRingError::CorruptVaultData { .. })
        ));
    }

    #[test]
    fn locked_and_invalid_input() {
        let (vault_service, backend, _dir) = setup();
        assert!(matches!(
            backend.create_key_ring_vault(&[0u8; 32], PlainObject::new()),
            Err(KeyRingError::InvalidKey(_))
        ));

        let mut meta = PlainObject::new();
        meta.insert("email".to_string(), json!("user@example.com"));
        let vault = store(
            &vault_service,
            backend.create_key_ring_vault(&key_one(), meta).unwrap(),
        );
        assert_eq!(vault.insensitive[KEY_META_FIELD]["email"], "user@example.com");

        vault_service.lock();
        let chain = cosmos_chain("cosmoshub-4", "cosmos", 118);
        assert!(matches!(
            backend.get_pub_key(&vault, 118, &chain),
            Err(KeyRingError::VaultLocked)
        ));
    }
}
