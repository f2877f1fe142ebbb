// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-vault enabled chains.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, warn};

use super::ChainIdHelper;
use crate::error::KeyRingResult;
use crate::storage::{KeyringDatabase, KEYRING_META};
use crate::vault::{VaultService, KEY_RING_VAULT_TYPE};

const ENABLED_CHAINS_KEY: &str = "enabled_chains";

/// Called with `(vault_id, newly enabled chain identifiers)`.
pub type ChainUiEnabledChangedHandler = Box<dyn Fn(&str, &[String]) + Send + Sync>;

type EnabledMap = BTreeMap<String, BTreeSet<String>>;

pub struct ChainsUiService {
    db: Arc<KeyringDatabase>,
    enabled: RwLock<EnabledMap>,
    handlers: RwLock<Vec<ChainUiEnabledChangedHandler>>,
}

impl ChainsUiService {
    pub fn new(db: Arc<KeyringDatabase>) -> KeyRingResult<Self> {
        let enabled: EnabledMap = db.get_json(KEYRING_META, ENABLED_CHAINS_KEY)?.unwrap_or_default();
        Ok(Self {
            db,
            enabled: RwLock::new(enabled),
            handlers: RwLock::new(Vec::new()),
        })
    }

    /// Evict a vault's selection when the vault is removed.
    pub fn init(self: &Arc<Self>, vault_service: &VaultService) {
        let weak: Weak<Self> = Arc::downgrade(self);
        vault_service.add_vault_removed_handler(move |vault_type, vault_id| {
            if vault_type != KEY_RING_VAULT_TYPE {
                return;
            }
            if let Some(service) = weak.upgrade() {
                if let Err(e) = service.remove_vault(vault_id) {
                    warn!(vault_id = %vault_id, error = %e, "Failed to evict enabled chains");
                }
            }
        });
    }

    pub fn is_enabled(&self, vault_id: &str, chain_id: &str) -> bool {
        let identifier = ChainIdHelper::parse(chain_id).identifier;
        self.read()
            .get(vault_id)
            .map(|set| set.contains(&identifier))
            .unwrap_or(false)
    }

    pub fn enabled_chain_identifiers(&self, vault_id: &str) -> Vec<String> {
        self.read()
            .get(vault_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn enable_chain(&self, vault_id: &str, chain_ids: &[&str]) -> KeyRingResult<()> {
        let newly_enabled: Vec<String> = {
            let mut enabled = self.write();
            let set = enabled.entry(vault_id.to_string()).or_default();
            chain_ids
                .iter()
                .map(|id| ChainIdHelper::parse(id).identifier)
                .filter(|identifier| set.insert(identifier.clone()))
                .collect()
        };
        if newly_enabled.is_empty() {
            return Ok(());
        }
        self.persist()?;
        debug!(vault_id = %vault_id, chains = ?newly_enabled, "Chains enabled");

        match self.handlers.read() {
            Ok(handlers) => {
                for handler in handlers.iter() {
                    handler(vault_id, &newly_enabled);
                }
            }
            Err(_) => warn!("Chain UI handler list poisoned"),
        }
        Ok(())
    }

    pub fn disable_chain(&self, vault_id: &str, chain_ids: &[&str]) -> KeyRingResult<()> {
        let changed = {
            let mut enabled = self.write();
            let Some(set) = enabled.get_mut(vault_id) else {
                return Ok(());
            };
            let mut changed = false;
            for id in chain_ids {
                changed |= set.remove(&ChainIdHelper::parse(id).identifier);
            }
            changed
        };
        if changed {
            self.persist()?;
            debug!(vault_id = %vault_id, "Chains disabled");
        }
        Ok(())
    }

    pub fn add_chain_ui_enabled_changed_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[String]) + Send + Sync + 'static,
    {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(Box::new(handler)),
            Err(_) => warn!("Chain UI handler list poisoned; handler not registered"),
        }
    }

    fn remove_vault(&self, vault_id: &str) -> KeyRingResult<()> {
        let removed = self.write().remove(vault_id).is_some();
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> KeyRingResult<()> {
        let snapshot = self.read().clone();
        self.db.put_json(KEYRING_META, ENABLED_CHAINS_KEY, &snapshot)?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, EnabledMap> {
        match self.enabled.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, EnabledMap> {
        match self.enabled.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
