// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-wide state: the observable keyring snapshot and the wired set of
//! services built from a [`KeyringConfig`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::chains::{ChainsService, ChainsUiService};
use crate::config::KeyringConfig;
use crate::ecosystem::{
    KeyRingBitcoinService, KeyRingCosmosService, KeyRingEthereumService, KeyRingStarknetService,
};
use crate::error::KeyRingResult;
use crate::keyring::{
    KeyRingBackends, KeyRingLedger, KeyRingMnemonic, KeyRingPrivateKey, KeyRingService,
    KeyRingStatus,
};
use crate::ledger::{TransportKind, TransportOpener};
use crate::permission::PermissionService;
use crate::storage::{KeyringDatabase, StoragePaths};
use crate::token_scan::{BalanceFetcher, TokenScanService};
use crate::vault::VaultService;

/// What consumers render: keyring status and the selected vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRingSnapshot {
    pub status: KeyRingStatus,
    pub selected_vault_id: Option<String>,
}

impl Default for KeyRingSnapshot {
    fn default() -> Self {
        Self {
            status: KeyRingStatus::Empty,
            selected_vault_id: None,
        }
    }
}

/// Holder of the process-wide keyring state. Passed by reference to the
/// services that change it; UIs follow it through [`KeyRingState::subscribe`].
#[derive(Debug)]
pub struct KeyRingState {
    tx: watch::Sender<KeyRingSnapshot>,
}

impl KeyRingState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(KeyRingSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> KeyRingSnapshot {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> KeyRingStatus {
        self.tx.borrow().status
    }

    pub fn selected_vault_id(&self) -> Option<String> {
        self.tx.borrow().selected_vault_id.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<KeyRingSnapshot> {
        self.tx.subscribe()
    }

    /// Subscribers are woken only when a field actually changes.
    pub fn set_status(&self, status: KeyRingStatus) {
        self.tx.send_if_modified(|snapshot| {
            let changed = snapshot.status != status;
            snapshot.status = status;
            changed
        });
    }

    pub fn set_selected_vault_id(&self, vault_id: Option<String>) {
        self.tx.send_if_modified(|snapshot| {
            let changed = snapshot.selected_vault_id != vault_id;
            snapshot.selected_vault_id = vault_id;
            changed
        });
    }
}

impl Default for KeyRingState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Service wiring
// =============================================================================

/// Every service, sharing one database and one keyring state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<KeyringDatabase>,
    pub vault_service: Arc<VaultService>,
    pub chains: Arc<ChainsService>,
    pub chains_ui: Arc<ChainsUiService>,
    pub key_ring_state: Arc<KeyRingState>,
    pub key_ring: Arc<KeyRingService>,
    pub cosmos: Arc<KeyRingCosmosService>,
    pub ethereum: Arc<KeyRingEthereumService>,
    pub starknet: Arc<KeyRingStarknetService>,
    pub bitcoin: Arc<KeyRingBitcoinService>,
    pub permissions: Arc<PermissionService>,
    pub token_scan: Arc<TokenScanService>,
}

impl AppState {
    /// Open the database under `config.data_dir`, load the chain registry and
    /// initialise every service. Removal handlers are registered here, so a
    /// removed vault is evicted from every per-vault store.
    pub fn open(
        config: &KeyringConfig,
        opener: Arc<dyn TransportOpener>,
        fetcher: Arc<dyn BalanceFetcher>,
    ) -> KeyRingResult<Self> {
        let paths = StoragePaths::new(&config.data_dir);
        let db = Arc::new(KeyringDatabase::open(&paths.keyring_db())?);

        let chains = match &config.chains_file {
            Some(path) => ChainsService::load_file(path)?,
            None => Vec::new(),
        };
        let chains = Arc::new(ChainsService::new(chains));

        let vault_service = Arc::new(VaultService::new(db.clone(), config.kdf));
        let backends = KeyRingBackends {
            mnemonic: Arc::new(KeyRingMnemonic::new(vault_service.clone())),
            private_key: Arc::new(KeyRingPrivateKey::new(vault_service.clone())),
            ledger: Arc::new(KeyRingLedger::new(opener, TransportKind::default())),
        };
        let key_ring_state = Arc::new(KeyRingState::new());
        let key_ring = Arc::new(KeyRingService::new(
            vault_service.clone(),
            chains.clone(),
            backends,
            key_ring_state.clone(),
        ));
        key_ring.init()?;

        let chains_ui = Arc::new(ChainsUiService::new(db.clone())?);
        chains_ui.init(&vault_service);

        let permissions = Arc::new(PermissionService::new(db.clone(), chains.clone()));
        permissions.init(&vault_service);

        let token_scan = Arc::new(TokenScanService::new(
            db.clone(),
            chains.clone(),
            chains_ui.clone(),
            key_ring.clone(),
            fetcher,
            config.token_scan_concurrency,
        ));
        token_scan.init(&vault_service)?;

        info!(
            data_dir = %paths.root().display(),
            chains = chains.get_modular_chain_infos().len(),
            status = ?key_ring.key_ring_status()?,
            "Keyring state opened"
        );

        Ok(Self {
            cosmos: Arc::new(KeyRingCosmosService::new(key_ring.clone())),
            ethereum: Arc::new(KeyRingEthereumService::new(key_ring.clone())),
            starknet: Arc::new(KeyRingStarknetService::new(key_ring.clone())),
            bitcoin: Arc::new(KeyRingBitcoinService::new(key_ring.clone())),
            db,
            vault_service,
            chains,
            chains_ui,
            key_ring_state,
            key_ring,
            permissions,
            token_scan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::cosmos_chain;
    use crate::keyring::mnemonic::ABANDON;
    use crate::keyring::BIP44HDPath;
    use crate::ledger::NoDeviceOpener;
    use crate::token_scan::UnavailableFetcher;
    use crate::vault::KdfParams;

    fn open(dir: &tempfile::TempDir, chains_file: Option<std::path::PathBuf>) -> AppState {
        let config = KeyringConfig {
            data_dir: dir.path().to_path_buf(),
            kdf: KdfParams::insecure_for_tests(),
            chains_file,
            ..KeyringConfig::default()
        };
        AppState::open(&config, Arc::new(NoDeviceOpener), Arc::new(UnavailableFetcher)).unwrap()
    }

    #[test]
    fn snapshot_follows_status_changes() {
        let state = KeyRingState::new();
        let mut rx = state.subscribe();
        state.set_status(KeyRingStatus::Locked);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, KeyRingStatus::Locked);

        state.set_status(KeyRingStatus::Locked);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn removal_cascades_through_every_service() {
        let dir = tempfile::tempdir().unwrap();
        let chains_file = dir.path().join("chains.json");
        std::fs::write(
            &chains_file,
            serde_json::to_vec(&vec![cosmos_chain("cosmoshub-4", "cosmos", 118)]).unwrap(),
        )
        .unwrap();
        let app = open(&dir, Some(chains_file));
        assert_eq!(app.key_ring.key_ring_status().unwrap(), KeyRingStatus::Empty);

        let keep = app
            .key_ring
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "keep", Some("pw"))
            .unwrap();
        let gone = app
            .key_ring
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "gone", None)
            .unwrap();
        for vault in [&keep, &gone] {
            app.chains_ui.enable_chain(vault, &["cosmoshub-4"]).unwrap();
            app.permissions
                .grant(vault, "https://app.example", &["cosmoshub-4"])
                .unwrap();
        }

        // Scans fail without a balance source and cache nothing.
        app.chains_ui.disable_chain(&keep, &["cosmoshub-4"]).unwrap();
        let report = app.token_scan.scan_all(&keep).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.scans.is_empty());

        app.key_ring.delete_key_ring(&gone, "pw").unwrap();

        assert!(!app.chains_ui.is_enabled(&gone, "cosmoshub-4"));
        assert!(app.permissions.get_all_permissions(&gone).unwrap().is_empty());
        assert!(app
            .permissions
            .has_permission(&keep, "https://app.example", "cosmoshub-4")
            .unwrap());
        assert_eq!(app.key_ring_state.selected_vault_id(), Some(keep));
    }

    #[test]
    fn reopening_restores_the_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let app = open(&dir, None);
            app.key_ring
                .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some("pw"))
                .unwrap()
        };

        let app = open(&dir, None);
        assert_eq!(app.key_ring.key_ring_status().unwrap(), KeyRingStatus::Locked);
        app.key_ring.unlock("pw").unwrap();
        assert_eq!(app.key_ring.selected_vault_id(), Some(id));
    }
}
