// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Token Scan
//!
//! Finds chains where a vault holds funds but which the user has not
//! enabled, so the UI can suggest them.
//!
//! ## Strategy
//!
//! - One vault, many chains ([`TokenScanService::scan_all`]): chains are
//!   scanned in parallel, bounded by `TOKEN_SCAN_CONCURRENCY`. A failing
//!   chain does not stop the others; it is reported in
//!   [`ScanReport::failures`].
//! - One chain, many vaults ([`TokenScanService::scan_with_all_vaults`]):
//!   vaults are scanned one after another, selected vault first. The number
//!   of vaults is unbounded, so this never fans out.
//!
//! Results are cached per vault in the `token_scans` table. The cache entry
//! of a vault is dropped when the vault is removed, and a chain's entry is
//! dropped once the user enables that chain.

pub mod fetcher;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, RwLock, Weak};

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

use crate::chains::{ChainIdHelper, ChainModule, ChainsService, ChainsUiService, Currency, ModularChainInfo};
use crate::crypto::bitcoin::SupportedPaymentType;
use crate::crypto::starknet::{felt_from_hex, Call, Felt};
use crate::ecosystem::{KeyRingBitcoinService, KeyRingCosmosService, KeyRingStarknetService};
use crate::error::{KeyRingError, KeyRingResult};
use crate::keyring::{KeyRingService, KeyRingStatus};
use crate::storage::{KeyringDatabase, TOKEN_SCANS};
use crate::vault::{VaultService, KEY_RING_VAULT_TYPE};

pub use fetcher::{AddressChainStats, BalanceFetcher, Coin, FetchError, UnavailableFetcher};

/// Coin type reported for EVM-only chain accounts.
const EVM_COIN_TYPE: u32 = 60;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenScanAsset {
    pub currency: Currency,
    /// Base units, decimal.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinScanAddress {
    pub bech32_address: String,
    pub payment_type: SupportedPaymentType,
}

/// Funds found for one account of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenScanInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bech32_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethereum_hex_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starknet_hex_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitcoin_address: Option<BitcoinScanAddress>,
    /// Set when the account is one candidate of a not yet finalized chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_type: Option<u32>,
    pub assets: Vec<TokenScanAsset>,
}

impl TokenScanInfo {
    fn with_assets(assets: Vec<TokenScanAsset>) -> Self {
        Self {
            bech32_address: None,
            ethereum_hex_address: None,
            starknet_hex_address: None,
            bitcoin_address: None,
            coin_type: None,
            assets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenScan {
    pub chain_id: String,
    pub infos: Vec<TokenScanInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_chain_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailure {
    pub chain_id: String,
    pub reason: String,
}

/// Outcome of a multi-chain scan: what was found and which chains failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scans: Vec<TokenScan>,
    pub failures: Vec<ScanFailure>,
}

/// Outcome of one chain: fetch failures stay typed until they are reported.
#[derive(Debug, thiserror::Error)]
enum ScanError {
    #[error(transparent)]
    KeyRing(#[from] KeyRingError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

type VaultScans = BTreeMap<String, Vec<TokenScan>>;

// =============================================================================
// Service
// =============================================================================

pub struct TokenScanService {
    db: Arc<KeyringDatabase>,
    chains: Arc<ChainsService>,
    chains_ui: Arc<ChainsUiService>,
    key_ring: Arc<KeyRingService>,
    cosmos: KeyRingCosmosService,
    starknet: KeyRingStarknetService,
    bitcoin: KeyRingBitcoinService,
    fetcher: Arc<dyn BalanceFetcher>,
    scan_concurrency: usize,
    scans: RwLock<VaultScans>,
}

impl TokenScanService {
    pub fn new(
        db: Arc<KeyringDatabase>,
        chains: Arc<ChainsService>,
        chains_ui: Arc<ChainsUiService>,
        key_ring: Arc<KeyRingService>,
        fetcher: Arc<dyn BalanceFetcher>,
        scan_concurrency: usize,
    ) -> Self {
        Self {
            db,
            chains,
            chains_ui,
            cosmos: KeyRingCosmosService::new(key_ring.clone()),
            starknet: KeyRingStarknetService::new(key_ring.clone()),
            bitcoin: KeyRingBitcoinService::new(key_ring.clone()),
            key_ring,
            fetcher,
            scan_concurrency: scan_concurrency.max(1),
            scans: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load the cache and register the handlers that keep it consistent.
    pub fn init(self: &Arc<Self>, vault_service: &VaultService) -> KeyRingResult<()> {
        let stored: Vec<(String, Vec<TokenScan>)> = self.db.list_json(TOKEN_SCANS)?;
        let count = stored.len();
        *self.write() = stored.into_iter().collect();
        debug!(vaults = count, "Token scans loaded");

        let weak: Weak<Self> = Arc::downgrade(self);
        vault_service.add_vault_removed_handler(move |vault_type, vault_id| {
            if vault_type != KEY_RING_VAULT_TYPE {
                return;
            }
            if let Some(service) = weak.upgrade() {
                service.evict_vault(vault_id);
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        self.chains.add_chain_suggested_handler(move |chain| {
            let Some(service) = weak.upgrade() else {
                return;
            };
            let chain_id = chain.chain_id.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        service.scan_with_all_vaults(&chain_id).await;
                    });
                }
                Err(_) => debug!(chain_id = %chain_id, "No runtime; suggested chain not scanned"),
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        self.chains_ui
            .add_chain_ui_enabled_changed_handler(move |vault_id, identifiers| {
                if let Some(service) = weak.upgrade() {
                    service.drop_enabled(vault_id, identifiers);
                }
            });
        Ok(())
    }

    /// Cached scans of a vault for known chains. Entries sharing a linked
    /// chain key are merged into the first one; the result is sorted by
    /// chain name.
    pub fn get_token_scans(&self, vault_id: &str) -> Vec<TokenScan> {
        let cached = self.read().get(vault_id).cloned().unwrap_or_default();

        let mut named: Vec<(String, TokenScan)> = Vec::new();
        let mut linked: BTreeMap<String, usize> = BTreeMap::new();
        for scan in cached {
            let Some(chain) = self.chains.get_modular_chain_info(&scan.chain_id) else {
                continue;
            };
            match scan.linked_chain_key.clone() {
                Some(key) => match linked.get(&key) {
                    Some(&index) => named[index].1.infos.extend(scan.infos),
                    None => {
                        linked.insert(key, named.len());
                        named.push((chain.chain_name, scan));
                    }
                },
                None => named.push((chain.chain_name, scan)),
            }
        }

        named.sort_by(|(a, _), (b, _)| a.to_lowercase().cmp(&b.to_lowercase()));
        named.into_iter().map(|(_, scan)| scan).collect()
    }

    /// Scan one chain for every vault, selected vault first, one vault at a
    /// time.
    pub async fn scan_with_all_vaults(&self, chain_id: &str) {
        if !self.is_unlocked() {
            return;
        }
        match self.chains.get_modular_chain_info(chain_id) {
            Some(chain) if !chain.is_hidden() => {}
            _ => return,
        }

        let mut vault_ids: Vec<String> = match self.key_ring.get_key_infos() {
            Ok(infos) => infos.into_iter().map(|info| info.id).collect(),
            Err(e) => {
                warn!(error = %e, "Token scan: failed to list vaults");
                return;
            }
        };
        if let Some(selected) = self.key_ring.selected_vault_id() {
            if let Some(index) = vault_ids.iter().position(|id| *id == selected) {
                let selected = vault_ids.remove(index);
                vault_ids.insert(0, selected);
            }
        }

        for vault_id in vault_ids {
            if let Err(e) = self.scan(&vault_id, chain_id).await {
                warn!(vault_id = %vault_id, chain_id = %chain_id, error = %e, "Token scan failed");
            }
        }
    }

    /// Scan one chain for one vault and cache the result unless the chain
    /// is already enabled.
    pub async fn scan(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<Option<TokenScan>> {
        if !self.is_unlocked() {
            return Ok(None);
        }
        let chain = self.chains.get_modular_chain_info_or_err(chain_id)?;
        let scan = match self.calculate(vault_id, &chain).await {
            Ok(scan) => scan,
            Err(ScanError::KeyRing(e)) => return Err(e),
            Err(ScanError::Fetch(e)) => {
                warn!(vault_id = %vault_id, chain_id = %chain_id, error = %e, "Token scan fetch failed");
                return Ok(None);
            }
        };

        let Some(scan) = scan else {
            return Ok(None);
        };
        if self.chains_ui.is_enabled(vault_id, chain_id) {
            return Ok(None);
        }
        self.merge(vault_id, std::slice::from_ref(&scan))?;
        Ok(Some(scan))
    }

    /// Scan every chain the vault has not enabled, in parallel.
    pub async fn scan_all(self: &Arc<Self>, vault_id: &str) -> KeyRingResult<ScanReport> {
        if !self.is_unlocked() {
            return Ok(ScanReport::default());
        }
        let chains: Vec<ModularChainInfo> = self
            .chains
            .get_modular_chain_infos()
            .into_iter()
            .filter(|chain| !chain.is_hidden() && !self.chains_ui.is_enabled(vault_id, &chain.chain_id))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.scan_concurrency));
        let mut task_chains: HashMap<task::Id, String> = HashMap::new();
        let mut tasks = JoinSet::new();
        for chain in chains {
            let chain_id = chain.chain_id.clone();
            let service = self.clone();
            let semaphore = semaphore.clone();
            let vault_id = vault_id.to_string();
            let handle = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => service.calculate(&vault_id, &chain).await,
                    Err(e) => Err(ScanError::Fetch(FetchError::Request(e.to_string()))),
                };
                (chain.chain_id, result)
            });
            task_chains.insert(handle.id(), chain_id);
        }

        let mut report = ScanReport::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (chain_id, result))) => {
                    match result {
                        Ok(Some(scan)) => report.scans.push(scan),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(vault_id = %vault_id, chain_id = %chain_id, error = %e, "Token scan failed");
                            report.failures.push(ScanFailure {
                                chain_id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                // Panicked or cancelled; the task id names its chain.
                Err(e) => {
                    let Some(chain_id) = task_chains.remove(&e.id()) else {
                        warn!(vault_id = %vault_id, error = %e, "Unknown token scan task failed");
                        continue;
                    };
                    warn!(vault_id = %vault_id, chain_id = %chain_id, error = %e, "Token scan task failed");
                    report.failures.push(ScanFailure {
                        chain_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.merge(vault_id, &report.scans)?;
        report.scans.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
        report.failures.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));

        info!(
            vault_id = %vault_id,
            found = report.scans.len(),
            failed = report.failures.len(),
            "Token scan finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Calculation
    // =========================================================================

    async fn calculate(&self, vault_id: &str, chain: &ModularChainInfo) -> Result<Option<TokenScan>, ScanError> {
        let infos = match &chain.module {
            ChainModule::Cosmos(_) if self.chains.is_evm_only_chain(&chain.chain_id) => {
                self.calculate_evm(vault_id, chain).await?
            }
            ChainModule::Cosmos(_) => self.calculate_cosmos(vault_id, chain).await?,
            ChainModule::Starknet(_) => self.calculate_starknet(vault_id, chain).await?,
            ChainModule::Bitcoin(_) => self.calculate_bitcoin(vault_id, chain).await?,
        };

        if infos.is_empty() {
            return Ok(None);
        }
        Ok(Some(TokenScan {
            chain_id: chain.chain_id.clone(),
            infos,
            linked_chain_key: chain.linked_chain_key.clone(),
        }))
    }

    async fn calculate_evm(&self, vault_id: &str, chain: &ModularChainInfo) -> Result<Vec<TokenScanInfo>, ScanError> {
        let evm = self.chains.get_evm_info_or_err(&chain.chain_id)?;
        let cosmos = self.chains.get_cosmos_chain_info_or_err(&chain.chain_id)?;
        let key = self.cosmos.get_key(vault_id, &chain.chain_id)?;

        let balance = self
            .fetcher
            .evm_balance(&chain.chain_id, &evm, &key.ethereum_hex_address)
            .await?;
        let native = cosmos.stake_currency.or_else(|| cosmos.currencies.first().cloned());
        let (Some(currency), false) = (native, balance.is_zero()) else {
            return Ok(Vec::new());
        };

        let mut info = TokenScanInfo::with_assets(vec![TokenScanAsset {
            currency,
            amount: balance.to_string(),
        }]);
        info.ethereum_hex_address = Some(key.ethereum_hex_address);
        info.coin_type = Some(EVM_COIN_TYPE);
        Ok(vec![info])
    }

    async fn calculate_cosmos(&self, vault_id: &str, chain: &ModularChainInfo) -> Result<Vec<TokenScanInfo>, ScanError> {
        let cosmos = self.chains.get_cosmos_chain_info_or_err(&chain.chain_id)?;

        let accounts: Vec<(String, Option<u32>)> =
            if self.key_ring.need_key_coin_type_finalize(vault_id, &chain.chain_id)? {
                self.cosmos
                    .compute_not_finalized_key_addresses(vault_id, &chain.chain_id)?
                    .into_iter()
                    .map(|candidate| (candidate.bech32_address, Some(candidate.coin_type)))
                    .collect()
            } else {
                let key = self.cosmos.get_key(vault_id, &chain.chain_id)?;
                vec![(key.bech32_address, None)]
            };

        let mut infos = Vec::new();
        for (address, coin_type) in accounts {
            let balances = self
                .fetcher
                .cosmos_balances(&chain.chain_id, &cosmos, &address)
                .await?;
            let assets: Vec<TokenScanAsset> = balances
                .into_iter()
                .filter_map(|coin| {
                    let currency = cosmos
                        .currencies
                        .iter()
                        .find(|c| c.coin_minimal_denom == coin.denom)?;
                    positive(&coin.amount).map(|amount| TokenScanAsset {
                        currency: currency.clone(),
                        amount,
                    })
                })
                .collect();
            if assets.is_empty() {
                continue;
            }
            let mut info = TokenScanInfo::with_assets(assets);
            info.bech32_address = Some(address);
            info.coin_type = coin_type;
            infos.push(info);
        }
        Ok(infos)
    }

    async fn calculate_starknet(&self, vault_id: &str, chain: &ModularChainInfo) -> Result<Vec<TokenScanInfo>, ScanError> {
        let starknet = self.chains.get_starknet_chain_info_or_err(&chain.chain_id)?;
        let key = self.starknet.get_starknet_key(vault_id, &chain.chain_id)?;
        let owner = felt_from_hex(&key.hex_address)?;

        let mut assets = Vec::new();
        for currency in &starknet.currencies {
            let Some(contract) = &currency.contract_address else {
                continue;
            };
            let call = balance_of_call(felt_from_hex(contract)?, owner);
            let result = self
                .fetcher
                .starknet_call(&chain.chain_id, &starknet, &call)
                .await?;
            let amount = u256_from_felts(&result)?;
            if !amount.is_zero() {
                assets.push(TokenScanAsset {
                    currency: currency.clone(),
                    amount: amount.to_string(),
                });
            }
        }
        if assets.is_empty() {
            return Ok(Vec::new());
        }
        let mut info = TokenScanInfo::with_assets(assets);
        info.starknet_hex_address = Some(key.hex_address);
        Ok(vec![info])
    }

    async fn calculate_bitcoin(&self, vault_id: &str, chain: &ModularChainInfo) -> Result<Vec<TokenScanInfo>, ScanError> {
        let bitcoin = self.chains.get_bitcoin_chain_info_or_err(&chain.chain_id)?;
        let key = self.bitcoin.get_bitcoin_key(vault_id, &chain.chain_id)?;

        let stats = self
            .fetcher
            .bitcoin_address_stats(&chain.chain_id, &bitcoin, &key.address)
            .await?;
        let balance = stats.funded_txo_sum.saturating_sub(stats.spent_txo_sum);
        let (Some(currency), true) = (bitcoin.currencies.first().cloned(), balance > 0) else {
            return Ok(Vec::new());
        };

        let mut info = TokenScanInfo::with_assets(vec![TokenScanAsset {
            currency,
            amount: balance.to_string(),
        }]);
        info.bitcoin_address = Some(BitcoinScanAddress {
            bech32_address: key.address,
            payment_type: key.payment_type,
        });
        Ok(vec![info])
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Replace entries with the same chain identifier, append the rest, and
    /// drop chains the vault has enabled since.
    fn merge(&self, vault_id: &str, scans: &[TokenScan]) -> KeyRingResult<()> {
        let snapshot = {
            let mut cache = self.write();
            let entry = cache.entry(vault_id.to_string()).or_default();
            for scan in scans {
                let identifier = ChainIdHelper::parse(&scan.chain_id).identifier;
                match entry
                    .iter()
                    .position(|s| ChainIdHelper::parse(&s.chain_id).identifier == identifier)
                {
                    Some(index) => entry[index] = scan.clone(),
                    None => entry.push(scan.clone()),
                }
            }
            entry.retain(|s| !self.chains_ui.is_enabled(vault_id, &s.chain_id));
            entry.clone()
        };
        self.persist(vault_id, &snapshot)
    }

    fn evict_vault(&self, vault_id: &str) {
        let removed = self.write().remove(vault_id).is_some();
        match self.db.delete(TOKEN_SCANS, vault_id) {
            Ok(_) if removed => debug!(vault_id = %vault_id, "Token scans evicted"),
            Ok(_) => {}
            Err(e) => warn!(vault_id = %vault_id, error = %e, "Failed to evict token scans"),
        }
    }

    fn drop_enabled(&self, vault_id: &str, identifiers: &[String]) {
        let snapshot = {
            let mut cache = self.write();
            let Some(entry) = cache.get_mut(vault_id) else {
                return;
            };
            let before = entry.len();
            entry.retain(|s| !identifiers.contains(&ChainIdHelper::parse(&s.chain_id).identifier));
            if entry.len() == before {
                return;
            }
            entry.clone()
        };
        if let Err(e) = self.persist(vault_id, &snapshot) {
            warn!(vault_id = %vault_id, error = %e, "Failed to persist token scans");
        }
    }

    fn persist(&self, vault_id: &str, scans: &[TokenScan]) -> KeyRingResult<()> {
        if scans.is_empty() {
            self.db.delete(TOKEN_SCANS, vault_id)?;
        } else {
            self.db.put_json(TOKEN_SCANS, vault_id, &scans)?;
        }
        Ok(())
    }

    fn is_unlocked(&self) -> bool {
        matches!(self.key_ring.key_ring_status(), Ok(KeyRingStatus::Unlocked))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VaultScans> {
        self.scans
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, VaultScans> {
        self.scans
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// ERC-20 `balanceOf(owner)`.
pub fn balance_of_call(token: Felt, owner: Felt) -> Call {
    Call {
        contract_address: token,
        entrypoint: "balanceOf".to_string(),
        calldata: vec![owner],
    }
}

/// `Uint256 { low, high }` returned as two felts.
fn u256_from_felts(result: &[Felt]) -> Result<U256, FetchError> {
    let [low, high] = result else {
        return Err(FetchError::InvalidResponse(format!(
            "balanceOf returned {} felts",
            result.len()
        )));
    };
    let low = low.to_bytes_be();
    let high = high.to_bytes_be();
    if low[..16].iter().chain(&high[..16]).any(|b| *b != 0) {
        return Err(FetchError::InvalidResponse(
            "balanceOf limb exceeds 128 bits".to_string(),
        ));
    }
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(&high[16..]);
    bytes[16..].copy_from_slice(&low[16..]);
    Ok(U256::from_be_bytes(bytes))
}

/// Normalized decimal amount when it parses and is non-zero.
fn positive(amount: &str) -> Option<String> {
    let value = U256::from_str(amount).ok()?;
    (!value.is_zero()).then(|| value.to_string())
}
