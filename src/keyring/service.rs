// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # KeyRing Service
//!
//! Owns the keyring status and the selected vault, and routes every
//! `get_pub_key` / `sign` / `get_pub_key_starknet` to the backend named by
//! the vault's `keyRingType`.
//!
//! ## Coin type finalization
//!
//! A mnemonic vault used on a chain with `alternativeBIP44s` has more than
//! one candidate address. Until the caller picks one with
//! [`KeyRingService::finalize_key_coin_type`], `get_pub_key` uses the
//! chain's primary coin type. The choice is recorded in `insensitive` under
//! `keyRing-{chainIdentifier}-coinType`.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ledger::KeyRingLedger;
use super::mnemonic::MNEMONIC_FIELD;
use super::private_key::PRIVATE_KEY_FIELD;
use super::{
    is_ethermint_like, BIP44HDPath, ExportedKeyRingVault, KeyInfo, KeyRingBackend,
    KeyRingBackends, KeyRingCapabilities, KeyRingStatus, KeyRingType, NewKeyRingVault,
    KEY_RING_META_FIELD, KEY_RING_TYPE_FIELD,
};
use crate::chains::{ChainIdHelper, ChainModule, ChainsService, ModularChainInfo};
use crate::crypto::{DigestMethod, PubKeySecp256k1, PubKeyStarknet, SignatureRsv};
use crate::error::{KeyRingError, KeyRingResult};
use crate::ledger::LedgerApp;
use crate::state::{KeyRingSnapshot, KeyRingState};
use crate::storage::KEYRING_META;
use crate::vault::{PlainObject, Vault, VaultService, KEY_RING_VAULT_TYPE};

const SELECTED_VAULT_KEY: &str = "selected_vault_id";

/// Insensitive key recording the finalized coin type of a chain.
pub fn coin_type_tag(chain_id: &str) -> String {
    format!("keyRing-{}-coinType", ChainIdHelper::parse(chain_id).identifier)
}

pub struct KeyRingService {
    vault_service: Arc<VaultService>,
    chains: Arc<ChainsService>,
    backends: KeyRingBackends,
    state: Arc<KeyRingState>,
    last_activity: Mutex<Instant>,
}

impl KeyRingService {
    pub fn new(
        vault_service: Arc<VaultService>,
        chains: Arc<ChainsService>,
        backends: KeyRingBackends,
        state: Arc<KeyRingState>,
    ) -> Self {
        Self {
            vault_service,
            chains,
            backends,
            state,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Restore the selection and publish the current status. Registers the
    /// removal handler that drops a vault's cached key material.
    pub fn init(self: &Arc<Self>) -> KeyRingResult<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.vault_service
            .add_vault_removed_handler(move |vault_type, vault_id| {
                if vault_type != KEY_RING_VAULT_TYPE {
                    return;
                }
                if let Some(service) = weak.upgrade() {
                    for backend in service.backends.all() {
                        backend.clear_cache(Some(vault_id));
                    }
                }
            });

        let stored: Option<String> = self
            .vault_service
            .database()
            .get_json(KEYRING_META, SELECTED_VAULT_KEY)?;
        let selected = match stored {
            Some(id) if self.find_vault(&id)?.is_some() => Some(id),
            _ => self.first_vault_id()?,
        };
        self.state.set_selected_vault_id(selected);
        self.refresh_status()?;

        let snapshot = self.state.snapshot();
        info!(
            status = ?snapshot.status,
            selected_vault_id = ?snapshot.selected_vault_id,
            "Key ring initialized"
        );
        Ok(())
    }

    pub fn vault_service(&self) -> &Arc<VaultService> {
        &self.vault_service
    }

    pub fn chains(&self) -> &Arc<ChainsService> {
        &self.chains
    }

    pub fn backends(&self) -> &KeyRingBackends {
        &self.backends
    }

    // =========================================================================
    // Status and selection
    // =========================================================================

    pub fn key_ring_status(&self) -> KeyRingResult<KeyRingStatus> {
        if !self.vault_service.is_signed_up()?
            || self.vault_service.get_vaults(KEY_RING_VAULT_TYPE)?.is_empty()
        {
            return Ok(KeyRingStatus::Empty);
        }
        if self.vault_service.is_locked() {
            Ok(KeyRingStatus::Locked)
        } else {
            Ok(KeyRingStatus::Unlocked)
        }
    }

    pub fn selected_vault_id(&self) -> Option<String> {
        self.state.selected_vault_id()
    }

    pub fn subscribe(&self) -> watch::Receiver<KeyRingSnapshot> {
        self.state.subscribe()
    }

    pub fn select_key_ring(&self, vault_id: &str) -> KeyRingResult<()> {
        self.get_vault_or_err(vault_id)?;
        self.persist_selection(Some(vault_id))?;
        debug!(vault_id = %vault_id, "Key ring selected");
        Ok(())
    }

    pub fn get_key_infos(&self) -> KeyRingResult<Vec<KeyInfo>> {
        let selected = self.selected_vault_id();
        self.vault_service
            .get_vaults(KEY_RING_VAULT_TYPE)?
            .into_iter()
            .map(|vault| key_info(vault, selected.as_deref()))
            .collect()
    }

    pub fn get_key_info(&self, vault_id: &str) -> KeyRingResult<KeyInfo> {
        let vault = self.get_vault_or_err(vault_id)?;
        key_info(vault, self.selected_vault_id().as_deref())
    }

    pub fn get_key_ring_type(&self, vault_id: &str) -> KeyRingResult<KeyRingType> {
        KeyRingType::of_vault(&self.get_vault_or_err(vault_id)?)
    }

    pub fn get_key_ring_name(&self, vault_id: &str) -> KeyRingResult<String> {
        Ok(key_ring_name(&self.get_vault_or_err(vault_id)?))
    }

    pub fn capabilities(&self, vault_id: &str) -> KeyRingResult<KeyRingCapabilities> {
        let vault = self.get_vault_or_err(vault_id)?;
        Ok(self.backends.for_vault(&vault)?.capabilities())
    }

    // =========================================================================
    // Lock lifecycle
    // =========================================================================

    pub fn unlock(&self, password: &str) -> KeyRingResult<()> {
        self.vault_service.unlock(password)?;
        self.touch();
        self.refresh_status()
    }

    /// Lock and forget every derived key held in memory.
    pub fn lock(&self) -> KeyRingResult<()> {
        self.vault_service.lock();
        for backend in self.backends.all() {
            backend.clear_cache(None);
        }
        self.refresh_status()
    }

    pub fn verify_password(&self, password: &str) -> KeyRingResult<()> {
        self.vault_service.verify_password(password)
    }

    pub fn change_user_password(&self, prev_password: &str, new_password: &str) -> KeyRingResult<()> {
        self.vault_service
            .change_user_password(prev_password, new_password)
    }

    /// Record user activity for the auto-locker.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    // =========================================================================
    // Vault creation and removal
    // =========================================================================

    /// Import a mnemonic. `password` signs the store up when this is the
    /// first key ring and is ignored otherwise.
    pub fn create_mnemonic_key_ring(
        &self,
        mnemonic: &str,
        bip44_path: BIP44HDPath,
        name: &str,
        password: Option<&str>,
    ) -> KeyRingResult<String> {
        self.ensure_ready_for_new_vault(password)?;
        let created = self
            .backends
            .mnemonic
            .create_key_ring_vault(mnemonic, bip44_path)?;
        self.add_key_ring_vault(KeyRingType::Mnemonic, name, created)
    }

    pub fn create_private_key_key_ring(
        &self,
        private_key: &[u8],
        meta: PlainObject,
        name: &str,
        password: Option<&str>,
    ) -> KeyRingResult<String> {
        self.ensure_ready_for_new_vault(password)?;
        let created = self
            .backends
            .private_key
            .create_key_ring_vault(private_key, meta)?;
        self.add_key_ring_vault(KeyRingType::PrivateKey, name, created)
    }

    /// Pair a Ledger device. The device is read before anything is stored.
    pub async fn create_ledger_key_ring(
        &self,
        app: LedgerApp,
        bip44_path: BIP44HDPath,
        name: &str,
        password: Option<&str>,
    ) -> KeyRingResult<String> {
        self.ensure_ready_for_new_vault(password)?;
        let created = self
            .backends
            .ledger
            .create_key_ring_vault(app, bip44_path)
            .await?;
        self.add_key_ring_vault(KeyRingType::Ledger, name, created)
    }

    /// Record another Ledger app's public key on an existing pairing.
    pub async fn append_ledger_key_app(&self, vault_id: &str, app: LedgerApp) -> KeyRingResult<()> {
        if self.vault_service.is_locked() {
            return Err(KeyRingError::VaultLocked);
        }
        let vault = self.get_vault_or_err(vault_id)?;
        if KeyRingType::of_vault(&vault)? != KeyRingType::Ledger {
            return Err(KeyRingError::InvalidArgument(format!(
                "vault {vault_id} is not a ledger key ring"
            )));
        }
        if KeyRingLedger::initialized_apps(&vault).contains(&app) {
            return Err(KeyRingError::InvalidArgument(format!(
                "{} app is already appended",
                app.as_str()
            )));
        }

        let patch = self.backends.ledger.append_app(&vault, app).await?;
        self.vault_service
            .set_and_merge_insensitive(KEY_RING_VAULT_TYPE, vault_id, patch)?;
        Ok(())
    }

    pub fn change_key_ring_name(&self, vault_id: &str, name: &str) -> KeyRingResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KeyRingError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        self.get_vault_or_err(vault_id)?;
        let mut patch = PlainObject::new();
        patch.insert(KEY_RING_META_FIELD.to_string(), name_meta(name));
        self.vault_service
            .set_and_merge_insensitive(KEY_RING_VAULT_TYPE, vault_id, patch)?;
        Ok(())
    }

    /// Delete a key ring after checking the password. Deleting the last one
    /// resets the whole store. Returns whether the store is now empty.
    pub fn delete_key_ring(&self, vault_id: &str, password: &str) -> KeyRingResult<bool> {
        self.vault_service.verify_password(password)?;
        self.get_vault_or_err(vault_id)?;

        let remaining = self
            .vault_service
            .get_vaults(KEY_RING_VAULT_TYPE)?
            .len();
        let emptied = remaining <= 1;
        if emptied {
            self.vault_service.clear_all_unchecked()?;
            self.state.set_selected_vault_id(None);
        } else {
            self.vault_service
                .remove_vault(KEY_RING_VAULT_TYPE, vault_id)?;
            if self.selected_vault_id().as_deref() == Some(vault_id) {
                let next = self.first_vault_id()?;
                self.persist_selection(next.as_deref())?;
            }
        }

        info!(vault_id = %vault_id, emptied, "Key ring deleted");
        self.refresh_status()?;
        Ok(emptied)
    }

    /// Full wallet reset.
    pub fn reset(&self, password: &str) -> KeyRingResult<()> {
        self.vault_service.clear_all(password)?;
        self.state.set_selected_vault_id(None);
        self.refresh_status()
    }

    /// Decrypted secrets of every software key ring.
    pub fn export_key_ring_vaults(&self, password: &str) -> KeyRingResult<Vec<ExportedKeyRingVault>> {
        self.vault_service.verify_password(password)?;

        let mut exported = Vec::new();
        for vault in self.vault_service.get_vaults(KEY_RING_VAULT_TYPE)? {
            let key_ring_type = KeyRingType::of_vault(&vault)?;
            let field = match key_ring_type {
                KeyRingType::Mnemonic => MNEMONIC_FIELD,
                KeyRingType::PrivateKey => PRIVATE_KEY_FIELD,
                KeyRingType::Ledger => continue,
            };
            let sensitive = self.vault_service.decrypt(&vault)?;
            let secret = sensitive
                .get_str(field)
                .ok_or_else(|| KeyRingError::corrupt(&vault.id, format!("{field} is missing")))?
                .to_string();
            exported.push(ExportedKeyRingVault {
                key_ring_type,
                id: vault.id,
                insensitive: vault.insensitive,
                sensitive: secret,
            });
        }
        info!(count = exported.len(), "Key ring vaults exported");
        Ok(exported)
    }

    // =========================================================================
    // Keys and signatures
    // =========================================================================

    pub fn is_ethermint_like(&self, chain_id: &str) -> KeyRingResult<bool> {
        let chain = self.chains.get_modular_chain_info_or_err(chain_id)?;
        Ok(chain.cosmos().map(is_ethermint_like).unwrap_or(false))
    }

    pub fn get_pub_key(&self, chain_id: &str, vault_id: &str) -> KeyRingResult<PubKeySecp256k1> {
        let (vault, chain) = self.vault_and_chain(vault_id, chain_id)?;
        let coin_type = self.coin_type_for(&vault, &chain)?;
        self.backends
            .for_vault(&vault)?
            .as_key_ring()
            .get_pub_key(&vault, coin_type, &chain)
    }

    pub fn get_pub_key_starknet(&self, chain_id: &str, vault_id: &str) -> KeyRingResult<PubKeyStarknet> {
        let (vault, chain) = self.vault_and_chain(vault_id, chain_id)?;
        let starknet = chain.starknet().ok_or_else(|| KeyRingError::InvalidArgument(format!(
            "{chain_id} is not a Starknet chain"
        )))?;

        let backend = self.backends.for_vault(&vault)?;
        if backend.as_starknet_capable().is_some() {
            return backend.get_pub_key_starknet(&vault, &chain);
        }

        // Software accounts use the secp256k1 key at the Starknet coin type.
        let pub_key = backend
            .as_key_ring()
            .get_pub_key(&vault, starknet.coin_type, &chain)?;
        PubKeyStarknet::from_bytes(&pub_key.to_uncompressed_bytes())
    }

    pub fn sign(
        &self,
        chain_id: &str,
        vault_id: &str,
        data: &[u8],
        digest_method: DigestMethod,
    ) -> KeyRingResult<SignatureRsv> {
        let (vault, chain) = self.vault_and_chain(vault_id, chain_id)?;
        let coin_type = self.coin_type_for(&vault, &chain)?;
        let backend = self.backends.for_vault(&vault)?;

        debug!(
            vault_id = %vault_id,
            chain_id = %chain_id,
            key_ring_type = backend.key_ring_type().as_str(),
            digest = digest_method.as_str(),
            "Signing"
        );
        backend
            .as_key_ring()
            .sign(&vault, coin_type, data, digest_method, &chain)
    }

    /// Backend of a vault, for callers that need the variant itself (the
    /// Ledger foreground flow).
    pub fn backend_for(&self, vault_id: &str) -> KeyRingResult<KeyRingBackend> {
        let vault = self.get_vault_or_err(vault_id)?;
        self.backends.for_vault(&vault)
    }

    // =========================================================================
    // Coin type finalization
    // =========================================================================

    pub fn need_key_coin_type_finalize(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<bool> {
        let vault = self.get_vault_or_err(vault_id)?;
        let chain = self.chains.get_modular_chain_info_or_err(chain_id)?;

        let Some(cosmos) = chain.cosmos() else {
            return Ok(false);
        };
        if cosmos.alternative_bip44s.is_empty() {
            return Ok(false);
        }
        if KeyRingType::of_vault(&vault)? != KeyRingType::Mnemonic {
            return Ok(false);
        }
        Ok(finalized_coin_type(&vault, chain_id).is_none())
    }

    /// Primary and alternative coin types of a Cosmos chain.
    pub fn candidate_coin_types(&self, chain_id: &str) -> KeyRingResult<Vec<u32>> {
        let cosmos = self.chains.get_cosmos_chain_info_or_err(chain_id)?;
        let mut coin_types = vec![cosmos.bip44.coin_type];
        for alternative in &cosmos.alternative_bip44s {
            if !coin_types.contains(&alternative.coin_type) {
                coin_types.push(alternative.coin_type);
            }
        }
        Ok(coin_types)
    }

    /// Public key at a candidate coin type of a not yet finalized chain.
    /// Reads only; nothing is recorded on the vault.
    pub fn get_pub_key_with_not_finalized_coin_type(
        &self,
        chain_id: &str,
        vault_id: &str,
        coin_type: u32,
    ) -> KeyRingResult<PubKeySecp256k1> {
        let (vault, chain) = self.vault_and_chain(vault_id, chain_id)?;
        self.check_finalizable(&vault, chain_id, coin_type)?;
        self.backends
            .for_vault(&vault)?
            .as_key_ring()
            .get_pub_key(&vault, coin_type, &chain)
    }

    pub fn finalize_key_coin_type(
        &self,
        vault_id: &str,
        chain_id: &str,
        coin_type: u32,
    ) -> KeyRingResult<()> {
        let vault = self.get_vault_or_err(vault_id)?;
        self.check_finalizable(&vault, chain_id, coin_type)?;

        let mut patch = PlainObject::new();
        patch.insert(coin_type_tag(chain_id), Value::from(coin_type));
        self.vault_service
            .set_and_merge_insensitive(KEY_RING_VAULT_TYPE, vault_id, patch)?;

        info!(vault_id = %vault_id, chain_id = %chain_id, coin_type, "Coin type finalized");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_finalizable(&self, vault: &Vault, chain_id: &str, coin_type: u32) -> KeyRingResult<()> {
        if finalized_coin_type(vault, chain_id).is_some() {
            return Err(KeyRingError::CoinTypeAlreadyFinalized {
                vault_id: vault.id.clone(),
                chain_id: chain_id.to_string(),
            });
        }
        if !self.candidate_coin_types(chain_id)?.contains(&coin_type) {
            return Err(KeyRingError::InvalidCoinType {
                chain_id: chain_id.to_string(),
                coin_type,
            });
        }
        Ok(())
    }

    fn coin_type_for(&self, vault: &Vault, chain: &ModularChainInfo) -> KeyRingResult<u32> {
        Ok(match &chain.module {
            ChainModule::Cosmos(cosmos) => {
                finalized_coin_type(vault, &chain.chain_id).unwrap_or(cosmos.bip44.coin_type)
            }
            ChainModule::Starknet(starknet) => starknet.coin_type,
            ChainModule::Bitcoin(bitcoin) => bitcoin.bip44.coin_type,
        })
    }

    /// Lock check first, then vault, then chain; nothing is derived unless
    /// all three hold.
    fn vault_and_chain(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<(Vault, ModularChainInfo)> {
        if self.vault_service.is_locked() {
            return Err(KeyRingError::VaultLocked);
        }
        let vault = self.get_vault_or_err(vault_id)?;
        let chain = self.chains.get_modular_chain_info_or_err(chain_id)?;
        Ok((vault, chain))
    }

    fn ensure_ready_for_new_vault(&self, password: Option<&str>) -> KeyRingResult<()> {
        if !self.vault_service.is_signed_up()? {
            let password = password.ok_or_else(|| {
                KeyRingError::InvalidArgument("password is required for the first key ring".to_string())
            })?;
            self.vault_service.sign_up(password)?;
        }
        if self.vault_service.is_locked() {
            return Err(KeyRingError::VaultLocked);
        }
        Ok(())
    }

    fn add_key_ring_vault(
        &self,
        key_ring_type: KeyRingType,
        name: &str,
        created: NewKeyRingVault,
    ) -> KeyRingResult<String> {
        let mut insensitive = created.insensitive;
        insensitive.insert(
            KEY_RING_TYPE_FIELD.to_string(),
            Value::String(key_ring_type.as_str().to_string()),
        );
        insensitive.insert(KEY_RING_META_FIELD.to_string(), name_meta(name.trim()));

        let vault_id =
            self.vault_service
                .add_vault(KEY_RING_VAULT_TYPE, insensitive, &created.sensitive)?;
        self.persist_selection(Some(&vault_id))?;
        self.touch();
        self.refresh_status()?;

        info!(
            vault_id = %vault_id,
            key_ring_type = key_ring_type.as_str(),
            "Key ring created"
        );
        Ok(vault_id)
    }

    fn persist_selection(&self, vault_id: Option<&str>) -> KeyRingResult<()> {
        let db = self.vault_service.database();
        match vault_id {
            Some(id) => db.put_json(KEYRING_META, SELECTED_VAULT_KEY, &id)?,
            None => {
                db.delete(KEYRING_META, SELECTED_VAULT_KEY)?;
            }
        }
        self.state.set_selected_vault_id(vault_id.map(str::to_string));
        Ok(())
    }

    fn refresh_status(&self) -> KeyRingResult<()> {
        let status = self.key_ring_status()?;
        self.state.set_status(status);
        Ok(())
    }

    fn find_vault(&self, vault_id: &str) -> KeyRingResult<Option<Vault>> {
        self.vault_service.get_vault(KEY_RING_VAULT_TYPE, vault_id)
    }

    fn get_vault_or_err(&self, vault_id: &str) -> KeyRingResult<Vault> {
        self.find_vault(vault_id)?
            .ok_or_else(|| KeyRingError::vault_not_found(vault_id))
    }

    fn first_vault_id(&self) -> KeyRingResult<Option<String>> {
        Ok(self
            .vault_service
            .get_vaults(KEY_RING_VAULT_TYPE)?
            .into_iter()
            .next()
            .map(|vault| vault.id))
    }
}

fn name_meta(name: &str) -> Value {
    let mut meta = PlainObject::new();
    meta.insert("name".to_string(), Value::String(name.to_string()));
    Value::Object(meta)
}

fn key_ring_name(vault: &Vault) -> String {
    vault
        .insensitive
        .get(KEY_RING_META_FIELD)
        .and_then(|meta| meta.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn finalized_coin_type(vault: &Vault, chain_id: &str) -> Option<u32> {
    let value = vault.insensitive.get(&coin_type_tag(chain_id))?;
    match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
        Some(coin_type) => Some(coin_type),
        None => {
            warn!(vault_id = %vault.id, chain_id = %chain_id, "Ignoring malformed coin type tag");
            None
        }
    }
}

fn key_info(vault: Vault, selected: Option<&str>) -> KeyRingResult<KeyInfo> {
    Ok(KeyInfo {
        key_ring_type: KeyRingType::of_vault(&vault)?,
        name: key_ring_name(&vault),
        is_selected: selected == Some(vault.id.as_str()),
        id: vault.id,
        insensitive: vault.insensitive,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::chains::ModularChainInfo;
    use crate::keyring::{KeyRingLedger, KeyRingMnemonic, KeyRingPrivateKey};
    use crate::ledger::fake::FakeDevice;
    use crate::ledger::TransportKind;
    use crate::storage::KeyringDatabase;
    use crate::vault::KdfParams;

    pub const PASSWORD: &str = "correct horse";

    pub struct Harness {
        pub service: Arc<KeyRingService>,
        pub vault_service: Arc<VaultService>,
        pub chains: Arc<ChainsService>,
        pub state: Arc<KeyRingState>,
        pub _dir: tempfile::TempDir,
    }

    pub fn harness(chains: Vec<ModularChainInfo>, device: FakeDevice) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(KeyringDatabase::open(&dir.path().join("keyring.redb")).unwrap());
        let vault_service = Arc::new(VaultService::new(db, KdfParams::insecure_for_tests()));
        let chains = Arc::new(ChainsService::new(chains));
        let backends = KeyRingBackends {
            mnemonic: Arc::new(KeyRingMnemonic::new(vault_service.clone())),
            private_key: Arc::new(KeyRingPrivateKey::new(vault_service.clone())),
            ledger: Arc::new(KeyRingLedger::new(Arc::new(device), TransportKind::Hid)),
        };
        let state = Arc::new(KeyRingState::new());
        let service = Arc::new(KeyRingService::new(
            vault_service.clone(),
            chains.clone(),
            backends,
            state.clone(),
        ));
        service.init().unwrap();
        Harness {
            service,
            vault_service,
            chains,
            state,
            _dir: dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::chains::fixtures::{cosmos_chain, legacy_cosmos_chain, starknet_chain};
    use crate::crypto::PrivKeySecp256k1;
    use crate::keyring::mnemonic::ABANDON;
    use crate::ledger::fake::FakeDevice;

    fn chains() -> Vec<ModularChainInfo> {
        vec![
            cosmos_chain("cosmoshub-4", "cosmos", 118),
            legacy_cosmos_chain("legacy-1", "legacy"),
            starknet_chain("starknet:SN_MAIN"),
        ]
    }

    fn device() -> FakeDevice {
        let key = PrivKeySecp256k1::from_bytes(&[9; 32]).unwrap().pub_key();
        FakeDevice::new(LedgerApp::Cosmos, key.to_bytes())
    }

    #[test]
    fn status_transitions() {
        let h = harness(chains(), device());
        assert_eq!(h.service.key_ring_status().unwrap(), KeyRingStatus::Empty);

        let id = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();
        assert_eq!(h.state.status(), KeyRingStatus::Unlocked);
        assert_eq!(h.service.selected_vault_id(), Some(id.clone()));

        h.service.lock().unwrap();
        assert_eq!(h.state.status(), KeyRingStatus::Locked);
        assert!(matches!(
            h.service.unlock("wrong"),
            Err(KeyRingError::InvalidCredential)
        ));
        h.service.unlock(PASSWORD).unwrap();
        assert_eq!(h.state.status(), KeyRingStatus::Unlocked);
    }

    #[test]
    fn first_key_ring_needs_a_password() {
        let h = harness(chains(), device());
        assert!(matches!(
            h.service
                .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", None),
            Err(KeyRingError::InvalidArgument(_))
        ));
        assert_eq!(h.service.key_ring_status().unwrap(), KeyRingStatus::Empty);
    }

    #[test]
    fn pub_keys_are_deterministic() {
        let h = harness(chains(), device());
        let id = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();

        let a = h.service.get_pub_key("cosmoshub-4", &id).unwrap();
        let b = h.service.get_pub_key("cosmoshub-4", &id).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(
            a.to_bech32("cosmos").unwrap(),
            "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4"
        );
    }

    #[test]
    fn lookups_fail_before_any_derivation() {
        let h = harness(chains(), device());
        let id = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();

        assert!(matches!(
            h.service.get_pub_key("cosmoshub-4", "missing"),
            Err(KeyRingError::VaultNotFound { .. })
        ));
        assert!(matches!(
            h.service.get_pub_key("unknown-1", &id),
            Err(KeyRingError::ChainNotFound { .. })
        ));
        h.service.lock().unwrap();
        assert!(matches!(
            h.service.get_pub_key("cosmoshub-4", &id),
            Err(KeyRingError::VaultLocked)
        ));
    }

    #[test]
    fn legacy_vault_finalizes_coin_type() {
        let h = harness(chains(), device());
        let id = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();

        assert!(h.service.need_key_coin_type_finalize(&id, "legacy-1").unwrap());
        assert!(!h.service.need_key_coin_type_finalize(&id, "cosmoshub-4").unwrap());
        assert_eq!(h.service.candidate_coin_types("legacy-1").unwrap(), vec![60, 118]);

        let k60 = h
            .service
            .get_pub_key_with_not_finalized_coin_type("legacy-1", &id, 60)
            .unwrap();
        let k118 = h
            .service
            .get_pub_key_with_not_finalized_coin_type("legacy-1", &id, 118)
            .unwrap();
        assert_ne!(k60, k118);
        assert!(matches!(
            h.service
                .get_pub_key_with_not_finalized_coin_type("legacy-1", &id, 529),
            Err(KeyRingError::InvalidCoinType { .. })
        ));
        // Reading candidates records nothing.
        assert!(h.service.need_key_coin_type_finalize(&id, "legacy-1").unwrap());
        assert_eq!(h.service.get_pub_key("legacy-1", &id).unwrap(), k60);

        h.service.finalize_key_coin_type(&id, "legacy-1", 118).unwrap();
        assert!(!h.service.need_key_coin_type_finalize(&id, "legacy-1").unwrap());
        assert_eq!(h.service.get_pub_key("legacy-1", &id).unwrap(), k118);
        assert!(matches!(
            h.service.finalize_key_coin_type(&id, "legacy-1", 60),
            Err(KeyRingError::CoinTypeAlreadyFinalized { .. })
        ));
    }

    #[test]
    fn starknet_keys_for_software_and_hardware() {
        let h = harness(chains(), device());
        let mut one = [0u8; 32];
        one[31] = 1;
        let id = h
            .service
            .create_private_key_key_ring(&one, PlainObject::new(), "pk", Some(PASSWORD))
            .unwrap();

        let stark = h.service.get_pub_key_starknet("starknet:SN_MAIN", &id).unwrap();
        let secp = h.service.get_pub_key("starknet:SN_MAIN", &id).unwrap();
        assert_eq!(stark.to_bytes(), secp.to_uncompressed_bytes());
        assert!(matches!(
            h.service.get_pub_key_starknet("cosmoshub-4", &id),
            Err(KeyRingError::InvalidArgument(_))
        ));
        assert!(matches!(
            h.service.backend_for(&id).unwrap().get_pub_key_starknet(
                &h.vault_service.get_vault(KEY_RING_VAULT_TYPE, &id).unwrap().unwrap(),
                &starknet_chain("starknet:SN_MAIN")
            ),
            Err(KeyRingError::CapabilityNotImplemented { .. })
        ));
    }

    #[tokio::test]
    async fn ledger_pairing_and_apps() {
        let h = harness(chains(), device());
        let id = h
            .service
            .create_ledger_key_ring(LedgerApp::Cosmos, BIP44HDPath::default(), "nano", Some(PASSWORD))
            .await
            .unwrap();

        let info = h.service.get_key_info(&id).unwrap();
        assert_eq!(info.key_ring_type, KeyRingType::Ledger);
        assert_eq!(info.name, "nano");
        assert!(info.is_selected);
        assert!(!h.service.capabilities(&id).unwrap().background_signing);

        assert!(h.service.get_pub_key("cosmoshub-4", &id).is_ok());
        assert!(matches!(
            h.service
                .sign("cosmoshub-4", &id, b"msg", DigestMethod::Sha256),
            Err(KeyRingError::HardwareSigningNotSupportedInBackground)
        ));
        assert!(matches!(
            h.service.append_ledger_key_app(&id, LedgerApp::Cosmos).await,
            Err(KeyRingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rename_select_and_delete() {
        let h = harness(chains(), device());
        let first = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "first", Some(PASSWORD))
            .unwrap();
        let mut one = [0u8; 32];
        one[31] = 1;
        let second = h
            .service
            .create_private_key_key_ring(&one, PlainObject::new(), "second", None)
            .unwrap();
        assert_eq!(h.service.selected_vault_id(), Some(second.clone()));

        h.service.change_key_ring_name(&first, "  renamed ").unwrap();
        assert_eq!(h.service.get_key_ring_name(&first).unwrap(), "renamed");
        assert!(h.service.change_key_ring_name(&first, " ").is_err());

        let mut rx = h.service.subscribe();
        assert!(matches!(
            h.service.delete_key_ring(&second, "wrong"),
            Err(KeyRingError::InvalidCredential)
        ));
        assert!(!h.service.delete_key_ring(&second, PASSWORD).unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().selected_vault_id, Some(first.clone()));

        assert!(h.service.delete_key_ring(&first, PASSWORD).unwrap());
        assert_eq!(h.state.status(), KeyRingStatus::Empty);
        assert!(!h.vault_service.is_signed_up().unwrap());
        assert!(h.service.get_key_infos().unwrap().is_empty());
    }

    #[test]
    fn export_skips_hardware_and_needs_password() {
        let h = harness(chains(), device());
        h.service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();
        assert!(h.service.export_key_ring_vaults("wrong").is_err());

        let exported = h.service.export_key_ring_vaults(PASSWORD).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].sensitive, ABANDON);
        assert_eq!(exported[0].key_ring_type, KeyRingType::Mnemonic);
    }

    #[test]
    fn selection_survives_restart() {
        let h = harness(chains(), device());
        let first = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "first", Some(PASSWORD))
            .unwrap();
        let mut one = [0u8; 32];
        one[31] = 1;
        h.service
            .create_private_key_key_ring(&one, PlainObject::new(), "second", None)
            .unwrap();
        h.service.select_key_ring(&first).unwrap();
        assert!(h.service.select_key_ring("missing").is_err());

        let restarted = Arc::new(KeyRingService::new(
            h.vault_service.clone(),
            h.chains.clone(),
            h.service.backends().clone(),
            Arc::new(KeyRingState::new()),
        ));
        restarted.init().unwrap();
        assert_eq!(restarted.selected_vault_id(), Some(first));
    }
}
