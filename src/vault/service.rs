// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault store with lock/unlock lifecycle.
//!
//! The master key lives in memory only between `unlock` and `lock`. Every
//! mutation is committed to redb before the call returns.

use std::sync::{Arc, RwLock};

use base64ct::{Base64, Encoding};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::crypto::{random_salt, KdfParams, MasterKey};
use super::{PlainObject, SensitiveData, Vault};
use crate::error::{KeyRingError, KeyRingResult};
use crate::storage::{KeyringDatabase, PendingWrite, KEYRING_META, PERMISSIONS, TOKEN_SCANS, VAULTS};

/// Namespace of vaults owned by the keyring.
pub const KEY_RING_VAULT_TYPE: &str = "keyRing";

/// Current layout version of the vault meta record.
pub const VAULT_SCHEMA_VERSION: u32 = 1;

const VAULT_META_KEY: &str = "vault_meta";

/// Called with `(vault_type, vault_id)` before a vault is deleted.
pub type VaultRemovedHandler = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultMeta {
    version: u32,
    /// Salt for key derivation (base64)
    salt: String,
    password_check: String,
    #[serde(default)]
    kdf: KdfParams,
}

pub struct VaultService {
    db: Arc<KeyringDatabase>,
    kdf: KdfParams,
    master_key: RwLock<Option<MasterKey>>,
    removed_handlers: RwLock<Vec<VaultRemovedHandler>>,
}

impl VaultService {
    /// `kdf` applies to the next sign-up; existing keyrings keep the
    /// parameters recorded in their meta.
    pub fn new(db: Arc<KeyringDatabase>, kdf: KdfParams) -> Self {
        Self {
            db,
            kdf,
            master_key: RwLock::new(None),
            removed_handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn database(&self) -> &Arc<KeyringDatabase> {
        &self.db
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_signed_up(&self) -> KeyRingResult<bool> {
        Ok(self.load_meta()?.is_some())
    }

    pub fn is_locked(&self) -> bool {
        self.master_key
            .read()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    /// Create the password meta and leave the store unlocked.
    pub fn sign_up(&self, password: &str) -> KeyRingResult<()> {
        if self.is_signed_up()? {
            return Err(KeyRingError::AlreadySignedUp);
        }
        if password.is_empty() {
            return Err(KeyRingError::InvalidArgument(
                "password must not be empty".to_string(),
            ));
        }

        let salt = random_salt();
        let key = MasterKey::derive(password, &salt, self.kdf)?;
        let meta = VaultMeta {
            version: VAULT_SCHEMA_VERSION,
            salt: Base64::encode_string(&salt),
            password_check: key.password_check()?,
            kdf: self.kdf,
        };
        self.db.put_json(KEYRING_META, VAULT_META_KEY, &meta)?;
        self.set_master_key(Some(key));

        info!("Vault store signed up");
        Ok(())
    }

    pub fn unlock(&self, password: &str) -> KeyRingResult<()> {
        let key = self.derive_verified(password)?;
        self.set_master_key(Some(key));
        info!("Vault store unlocked");
        Ok(())
    }

    pub fn lock(&self) {
        self.set_master_key(None);
        info!("Vault store locked");
    }

    /// Check a password without changing the lock state.
    pub fn verify_password(&self, password: &str) -> KeyRingResult<()> {
        self.derive_verified(password).map(|_| ())
    }

    /// Re-encrypt every sensitive payload under a key derived from
    /// `new_password`. All records and the new meta commit together.
    pub fn change_user_password(&self, prev_password: &str, new_password: &str) -> KeyRingResult<()> {
        if new_password.is_empty() {
            return Err(KeyRingError::InvalidArgument(
                "password must not be empty".to_string(),
            ));
        }
        let old_key = self.derive_verified(prev_password)?;

        let salt = random_salt();
        let new_key = MasterKey::derive(new_password, &salt, self.kdf)?;
        let meta = VaultMeta {
            version: VAULT_SCHEMA_VERSION,
            salt: Base64::encode_string(&salt),
            password_check: new_key.password_check()?,
            kdf: self.kdf,
        };

        let mut vaults = self.all_vaults()?;
        for vault in vaults.iter_mut() {
            if let Some(blob) = &vault.sensitive {
                let plain = old_key
                    .decrypt(blob)
                    .map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))?;
                vault.sensitive = Some(new_key.encrypt(plain.as_bytes())?);
            }
        }

        let mut writes = Vec::with_capacity(vaults.len() + 1);
        for vault in &vaults {
            writes.push(PendingWrite::json(VAULTS, &vault.id, vault)?);
        }
        writes.push(PendingWrite::json(KEYRING_META, VAULT_META_KEY, &meta)?);
        self.db.put_many(&writes)?;

        self.set_master_key(Some(new_key));
        info!(vaults = vaults.len(), "Vault store password changed");
        Ok(())
    }

    // =========================================================================
    // Vault CRUD
    // =========================================================================

    /// Persist a new vault. The store must be unlocked.
    ///
    /// An empty `sensitive` object is stored as no blob at all.
    pub fn add_vault(
        &self,
        vault_type: &str,
        insensitive: PlainObject,
        sensitive: &PlainObject,
    ) -> KeyRingResult<String> {
        let sealed = {
            let guard = self.read_master_key();
            let key = guard.as_ref().ok_or(KeyRingError::VaultLocked)?;
            if sensitive.is_empty() {
                None
            } else {
                let mut plaintext = serde_json::to_vec(sensitive)?;
                let sealed = key.encrypt(&plaintext);
                zeroize::Zeroize::zeroize(&mut plaintext);
                Some(sealed?)
            }
        };

        let vault = Vault {
            id: uuid::Uuid::new_v4().to_string(),
            vault_type: vault_type.to_string(),
            insensitive,
            sensitive: sealed,
            created_at: Utc::now(),
        };
        self.db.put_json(VAULTS, &vault.id, &vault)?;

        info!(vault_id = %vault.id, vault_type = %vault_type, "Vault created");
        Ok(vault.id)
    }

    pub fn get_vault(&self, vault_type: &str, vault_id: &str) -> KeyRingResult<Option<Vault>> {
        let vault: Option<Vault> = self.db.get_json(VAULTS, vault_id)?;
        Ok(vault.filter(|v| v.vault_type == vault_type))
    }

    /// Vaults of one namespace, oldest first.
    pub fn get_vaults(&self, vault_type: &str) -> KeyRingResult<Vec<Vault>> {
        let mut vaults: Vec<Vault> = self
            .all_vaults()?
            .into_iter()
            .filter(|v| v.vault_type == vault_type)
            .collect();
        vaults.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(vaults)
    }

    /// Shallow-merge `patch` into the vault's insensitive metadata.
    pub fn set_and_merge_insensitive(
        &self,
        vault_type: &str,
        vault_id: &str,
        patch: PlainObject,
    ) -> KeyRingResult<Vault> {
        let mut type_matches = true;
        let updated = self.db.update_json(VAULTS, vault_id, |vault: &mut Vault| {
            if vault.vault_type != vault_type {
                type_matches = false;
                return;
            }
            for (key, value) in patch {
                vault.insensitive.insert(key, value);
            }
        })?;

        match updated {
            Some(vault) if type_matches => {
                debug!(vault_id = %vault_id, "Vault insensitive metadata updated");
                Ok(vault)
            }
            _ => Err(KeyRingError::vault_not_found(vault_id)),
        }
    }

    /// Decrypt the sensitive payload. Fails with `VaultLocked` while locked.
    pub fn decrypt(&self, vault: &Vault) -> KeyRingResult<SensitiveData> {
        let guard = self.read_master_key();
        let key = guard.as_ref().ok_or(KeyRingError::VaultLocked)?;

        let Some(blob) = &vault.sensitive else {
            return Ok(SensitiveData::empty());
        };
        let plain = key
            .decrypt(blob)
            .map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))?;
        let object: PlainObject = serde_json::from_slice(plain.as_bytes())
            .map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))?;
        Ok(SensitiveData::new(object))
    }

    /// Delete a vault. Removal handlers run first so dependents can evict
    /// their per-vault state.
    pub fn remove_vault(&self, vault_type: &str, vault_id: &str) -> KeyRingResult<()> {
        if self.get_vault(vault_type, vault_id)?.is_none() {
            return Err(KeyRingError::vault_not_found(vault_id));
        }

        self.notify_removed(vault_type, vault_id);
        self.db.delete(VAULTS, vault_id)?;

        info!(vault_id = %vault_id, vault_type = %vault_type, "Vault removed");
        Ok(())
    }

    pub fn add_vault_removed_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        match self.removed_handlers.write() {
            Ok(mut handlers) => handlers.push(Box::new(handler)),
            Err(_) => warn!("Vault removed handler list poisoned; handler not registered"),
        }
    }

    /// Full wallet reset after verifying the password.
    pub fn clear_all(&self, password: &str) -> KeyRingResult<()> {
        self.verify_password(password)?;
        self.clear_all_unchecked()
    }

    /// Drop every vault and the password meta; the store returns to its
    /// pre-sign-up state.
    pub(crate) fn clear_all_unchecked(&self) -> KeyRingResult<()> {
        for vault in self.all_vaults()? {
            self.notify_removed(&vault.vault_type, &vault.id);
        }
        self.db
            .clear_tables(&[VAULTS, KEYRING_META, TOKEN_SCANS, PERMISSIONS])?;
        self.set_master_key(None);

        info!("Vault store cleared");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn load_meta(&self) -> KeyRingResult<Option<VaultMeta>> {
        Ok(self.db.get_json(KEYRING_META, VAULT_META_KEY)?)
    }

    fn all_vaults(&self) -> KeyRingResult<Vec<Vault>> {
        Ok(self
            .db
            .list_json::<Vault>(VAULTS)?
            .into_iter()
            .map(|(_, vault)| vault)
            .collect())
    }

    fn derive_verified(&self, password: &str) -> KeyRingResult<MasterKey> {
        let meta = self.load_meta()?.ok_or(KeyRingError::KeyRingEmpty)?;
        let salt =
            Base64::decode_vec(&meta.salt).map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        let key = MasterKey::derive(password, &salt, meta.kdf)?;
        if !key.verify_password_check(&meta.password_check)? {
            warn!("Vault store credential rejected");
            return Err(KeyRingError::InvalidCredential);
        }
        Ok(key)
    }

    fn notify_removed(&self, vault_type: &str, vault_id: &str) {
        if let Ok(handlers) = self.removed_handlers.read() {
            for handler in handlers.iter() {
                handler(vault_type, vault_id);
            }
        }
    }

    fn read_master_key(&self) -> std::sync::RwLockReadGuard<'_, Option<MasterKey>> {
        // A poisoned lock still holds a valid Option; recover it
        self.master_key
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_master_key(&self, key: Option<MasterKey>) {
        let mut guard = self
            .master_key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = key;
    }
}
