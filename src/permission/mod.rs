// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Permissions
//!
//! Which origins may use which chains, per vault. Grants are keyed by chain
//! identifier so a chain upgrade (`cosmoshub-3` → `cosmoshub-4`) keeps them.
//!
//! ## Storage
//!
//! One `permissions` row per vault: `{ origin: [chain identifier] }`. The row
//! is deleted when the vault is removed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chains::{ChainIdHelper, ChainsService};
use crate::error::{KeyRingError, KeyRingResult};
use crate::storage::{KeyringDatabase, PERMISSIONS};
use crate::vault::{VaultService, KEY_RING_VAULT_TYPE};

type OriginGrants = BTreeMap<String, BTreeSet<String>>;

pub struct PermissionService {
    db: Arc<KeyringDatabase>,
    chains: Arc<ChainsService>,
}

impl PermissionService {
    pub fn new(db: Arc<KeyringDatabase>, chains: Arc<ChainsService>) -> Self {
        Self { db, chains }
    }

    /// Drop a vault's grants when the vault is removed.
    pub fn init(&self, vault_service: &VaultService) {
        let db = self.db.clone();
        vault_service.add_vault_removed_handler(move |vault_type, vault_id| {
            if vault_type != KEY_RING_VAULT_TYPE {
                return;
            }
            match db.delete(PERMISSIONS, vault_id) {
                Ok(true) => debug!(vault_id = %vault_id, "Permissions evicted"),
                Ok(false) => {}
                Err(e) => warn!(vault_id = %vault_id, error = %e, "Failed to evict permissions"),
            }
        });
    }

    pub fn has_permission(&self, vault_id: &str, origin: &str, chain_id: &str) -> KeyRingResult<bool> {
        let identifier = ChainIdHelper::parse(chain_id).identifier;
        Ok(self
            .load(vault_id)?
            .get(origin)
            .map(|chains| chains.contains(&identifier))
            .unwrap_or(false))
    }

    pub fn check_permission(&self, vault_id: &str, origin: &str, chain_id: &str) -> KeyRingResult<()> {
        if self.has_permission(vault_id, origin, chain_id)? {
            Ok(())
        } else {
            Err(KeyRingError::PermissionDenied {
                origin: origin.to_string(),
                chain_id: chain_id.to_string(),
            })
        }
    }

    /// Grant `origin` access to known chains. Unknown chain ids are refused
    /// before anything is written.
    pub fn grant(&self, vault_id: &str, origin: &str, chain_ids: &[&str]) -> KeyRingResult<()> {
        if origin.is_empty() {
            return Err(KeyRingError::InvalidArgument("origin must not be empty".to_string()));
        }
        let identifiers = chain_ids
            .iter()
            .map(|chain_id| {
                self.chains
                    .get_modular_chain_info_or_err(chain_id)
                    .map(|chain| chain.identifier())
            })
            .collect::<KeyRingResult<Vec<_>>>()?;

        let mut grants = self.load(vault_id)?;
        grants
            .entry(origin.to_string())
            .or_default()
            .extend(identifiers);
        self.store(vault_id, &grants)?;

        info!(vault_id = %vault_id, origin = %origin, chains = chain_ids.len(), "Permission granted");
        Ok(())
    }

    /// Revoke some chains, or every chain when `chain_ids` is `None`.
    pub fn revoke(&self, vault_id: &str, origin: &str, chain_ids: Option<&[&str]>) -> KeyRingResult<()> {
        let mut grants = self.load(vault_id)?;
        match chain_ids {
            None => {
                grants.remove(origin);
            }
            Some(chain_ids) => {
                if let Some(chains) = grants.get_mut(origin) {
                    for chain_id in chain_ids {
                        chains.remove(&ChainIdHelper::parse(chain_id).identifier);
                    }
                    if chains.is_empty() {
                        grants.remove(origin);
                    }
                }
            }
        }
        self.store(vault_id, &grants)?;
        info!(vault_id = %vault_id, origin = %origin, "Permission revoked");
        Ok(())
    }

    pub fn get_permitted_chains(&self, vault_id: &str, origin: &str) -> KeyRingResult<Vec<String>> {
        Ok(self
            .load(vault_id)?
            .remove(origin)
            .map(|chains| chains.into_iter().collect())
            .unwrap_or_default())
    }

    /// Every grant of a vault, by origin.
    pub fn get_all_permissions(&self, vault_id: &str) -> KeyRingResult<BTreeMap<String, Vec<String>>> {
        Ok(self
            .load(vault_id)?
            .into_iter()
            .map(|(origin, chains)| (origin, chains.into_iter().collect()))
            .collect())
    }

    fn load(&self, vault_id: &str) -> KeyRingResult<OriginGrants> {
        Ok(self.db.get_json(PERMISSIONS, vault_id)?.unwrap_or_default())
    }

    fn store(&self, vault_id: &str, grants: &OriginGrants) -> KeyRingResult<()> {
        if grants.is_empty() {
            self.db.delete(PERMISSIONS, vault_id)?;
        } else {
            self.db.put_json(PERMISSIONS, vault_id, grants)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::{cosmos_chain, starknet_chain};
    use crate::vault::{KdfParams, PlainObject};

    const ORIGIN: &str = "https://app.example";

    fn setup() -> (Arc<VaultService>, PermissionService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(KeyringDatabase::open(&dir.path().join("keyring.redb")).unwrap());
        let vault_service = Arc::new(VaultService::new(db.clone(), KdfParams::insecure_for_tests()));
        vault_service.sign_up("password").unwrap();
        let chains = Arc::new(ChainsService::new(vec![
            cosmos_chain("cosmoshub-4", "cosmos", 118),
            starknet_chain("starknet:SN_MAIN"),
        ]));
        let permissions = PermissionService::new(db, chains);
        permissions.init(&vault_service);
        (vault_service, permissions, dir)
    }

    fn add_vault(vault_service: &VaultService) -> String {
        vault_service
            .add_vault(KEY_RING_VAULT_TYPE, PlainObject::new(), &PlainObject::new())
            .unwrap()
    }

    #[test]
    fn grants_follow_the_chain_identifier() {
        let (vault_service, permissions, _dir) = setup();
        let vault = add_vault(&vault_service);

        permissions.grant(&vault, ORIGIN, &["cosmoshub-4"]).unwrap();
        assert!(permissions.has_permission(&vault, ORIGIN, "cosmoshub-4").unwrap());
        assert!(permissions.has_permission(&vault, ORIGIN, "cosmoshub-5").unwrap());
        assert!(!permissions.has_permission(&vault, ORIGIN, "starknet:SN_MAIN").unwrap());
        assert!(matches!(
            permissions.check_permission(&vault, "https://other.example", "cosmoshub-4"),
            Err(KeyRingError::PermissionDenied { .. })
        ));
        assert!(matches!(
            permissions.grant(&vault, ORIGIN, &["starknet:SN_MAIN", "unknown-1"]),
            Err(KeyRingError::ChainNotFound { .. })
        ));
        assert_eq!(
            permissions.get_permitted_chains(&vault, ORIGIN).unwrap(),
            vec!["cosmoshub".to_string()]
        );
    }

    #[test]
    fn revoke_some_or_all() {
        let (vault_service, permissions, _dir) = setup();
        let vault = add_vault(&vault_service);
        permissions
            .grant(&vault, ORIGIN, &["cosmoshub-4", "starknet:SN_MAIN"])
            .unwrap();

        permissions.revoke(&vault, ORIGIN, Some(&["cosmoshub-4"])).unwrap();
        assert!(!permissions.has_permission(&vault, ORIGIN, "cosmoshub-4").unwrap());
        assert!(permissions.has_permission(&vault, ORIGIN, "starknet:SN_MAIN").unwrap());

        permissions.revoke(&vault, ORIGIN, None).unwrap();
        assert!(permissions.get_all_permissions(&vault).unwrap().is_empty());
    }

    #[test]
    fn vault_removal_evicts_only_that_vault() {
        let (vault_service, permissions, _dir) = setup();
        let a = add_vault(&vault_service);
        let b = add_vault(&vault_service);
        permissions.grant(&a, ORIGIN, &["cosmoshub-4"]).unwrap();
        permissions.grant(&b, ORIGIN, &["cosmoshub-4"]).unwrap();

        vault_service.remove_vault(KEY_RING_VAULT_TYPE, &a).unwrap();
        assert!(permissions.get_all_permissions(&a).unwrap().is_empty());
        assert!(permissions.has_permission(&b, ORIGIN, "cosmoshub-4").unwrap());
    }
}
