// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain registry.
//!
//! A chain is described by a [`ModularChainInfo`] carrying exactly one
//! ecosystem module (Cosmos, Starknet or Bitcoin). Lookups go through the
//! chain identifier (`cosmoshub-4` and `cosmoshub-5` are the same chain), so
//! per-chain state survives chain upgrades.

pub mod ui;

use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::bitcoin::{BitcoinNetwork, SupportedPaymentType};
use crate::error::{KeyRingError, KeyRingResult};

pub use ui::ChainsUiService;

/// Default BIP-44 coin type of Starknet accounts derived from a mnemonic.
pub const STARKNET_COIN_TYPE: u32 = 9004;

// =============================================================================
// Chain info types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    pub coin_denom: String,
    pub coin_minimal_denom: String,
    pub coin_decimals: u8,
    /// Token contract (Starknet ERC-20 style currencies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bip44 {
    pub coin_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bech32Config {
    pub bech32_prefix_acc_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmInfo {
    pub chain_id: u64,
    pub rpc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmosChainInfo {
    pub rest: String,
    pub bip44: Bip44,
    /// Extra coin types a legacy vault may have used for this chain.
    #[serde(default, rename = "alternativeBIP44s")]
    pub alternative_bip44s: Vec<Bip44>,
    pub bech32_config: Bech32Config,
    pub currencies: Vec<Currency>,
    #[serde(default)]
    pub stake_currency: Option<Currency>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub evm: Option<EvmInfo>,
    #[serde(default, rename = "hideInUI")]
    pub hide_in_ui: bool,
}

impl CosmosChainInfo {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarknetChainInfo {
    pub rpc: String,
    /// Class hash of the secp256k1-signer account contract used for
    /// software-backed vaults.
    pub eth_account_class_hash: String,
    pub currencies: Vec<Currency>,
    #[serde(default = "default_starknet_coin_type")]
    pub coin_type: u32,
}

fn default_starknet_coin_type() -> u32 {
    STARKNET_COIN_TYPE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinChainInfo {
    pub rest: String,
    pub bip44: Bip44,
    pub network: BitcoinNetwork,
    pub payment_type: SupportedPaymentType,
    pub currencies: Vec<Currency>,
}

/// Ecosystem module of a chain. Serialized as a single key next to the
/// common fields: `{"chainId": ..., "cosmos": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainModule {
    Cosmos(CosmosChainInfo),
    Starknet(StarknetChainInfo),
    Bitcoin(BitcoinChainInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModularChainInfo {
    pub chain_id: String,
    pub chain_name: String,
    /// Groups chains that are shown as one (e.g. the payment types of one
    /// Bitcoin network).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_chain_key: Option<String>,
    #[serde(flatten)]
    pub module: ChainModule,
}

impl ModularChainInfo {
    pub fn cosmos(&self) -> Option<&CosmosChainInfo> {
        match &self.module {
            ChainModule::Cosmos(info) => Some(info),
            _ => None,
        }
    }

    pub fn starknet(&self) -> Option<&StarknetChainInfo> {
        match &self.module {
            ChainModule::Starknet(info) => Some(info),
            _ => None,
        }
    }

    pub fn bitcoin(&self) -> Option<&BitcoinChainInfo> {
        match &self.module {
            ChainModule::Bitcoin(info) => Some(info),
            _ => None,
        }
    }

    pub fn ecosystem(&self) -> &'static str {
        match &self.module {
            ChainModule::Cosmos(_) => "cosmos",
            ChainModule::Starknet(_) => "starknet",
            ChainModule::Bitcoin(_) => "bitcoin",
        }
    }

    pub fn identifier(&self) -> String {
        ChainIdHelper::parse(&self.chain_id).identifier
    }

    pub fn is_hidden(&self) -> bool {
        self.cosmos().map(|c| c.hide_in_ui).unwrap_or(false)
    }
}

// =============================================================================
// Chain id parsing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIdentifier {
    pub identifier: String,
    pub version: u64,
}

pub struct ChainIdHelper;

impl ChainIdHelper {
    /// `{identifier}-{version}` when the chain id ends in a numeric
    /// revision, otherwise the whole id with version 0.
    pub fn parse(chain_id: &str) -> ChainIdentifier {
        if let Some((identifier, version)) = chain_id.rsplit_once('-') {
            if !identifier.is_empty()
                && !version.is_empty()
                && version.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(version) = version.parse() {
                    return ChainIdentifier {
                        identifier: identifier.to_string(),
                        version,
                    };
                }
            }
        }
        ChainIdentifier {
            identifier: chain_id.to_string(),
            version: 0,
        }
    }

    pub fn same_chain(a: &str, b: &str) -> bool {
        Self::parse(a).identifier == Self::parse(b).identifier
    }
}

// =============================================================================
// Registry
// =============================================================================

pub type ChainSuggestedHandler = Box<dyn Fn(&ModularChainInfo) + Send + Sync>;

pub struct ChainsService {
    chains: RwLock<Vec<ModularChainInfo>>,
    suggested_handlers: RwLock<Vec<ChainSuggestedHandler>>,
}

impl ChainsService {
    pub fn new(chains: Vec<ModularChainInfo>) -> Self {
        Self {
            chains: RwLock::new(chains),
            suggested_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Load a JSON array of chain infos.
    pub fn load_file(path: &Path) -> KeyRingResult<Vec<ModularChainInfo>> {
        let raw = std::fs::read(path).map_err(|e| {
            KeyRingError::InvalidArgument(format!("chains file {}: {e}", path.display()))
        })?;
        let chains: Vec<ModularChainInfo> = serde_json::from_slice(&raw)?;
        info!(path = %path.display(), chains = chains.len(), "Chain registry loaded");
        Ok(chains)
    }

    pub fn get_modular_chain_info(&self, chain_id: &str) -> Option<ModularChainInfo> {
        let identifier = ChainIdHelper::parse(chain_id).identifier;
        self.read()
            .iter()
            .find(|c| c.identifier() == identifier)
            .cloned()
    }

    pub fn get_modular_chain_info_or_err(&self, chain_id: &str) -> KeyRingResult<ModularChainInfo> {
        self.get_modular_chain_info(chain_id)
            .ok_or_else(|| KeyRingError::chain_not_found(chain_id))
    }

    pub fn has_modular_chain_info(&self, chain_id: &str) -> bool {
        self.get_modular_chain_info(chain_id).is_some()
    }

    pub fn get_modular_chain_infos(&self) -> Vec<ModularChainInfo> {
        self.read().clone()
    }

    pub fn get_cosmos_chain_info_or_err(&self, chain_id: &str) -> KeyRingResult<CosmosChainInfo> {
        let info = self.get_modular_chain_info_or_err(chain_id)?;
        match info.module {
            ChainModule::Cosmos(cosmos) => Ok(cosmos),
            _ => Err(KeyRingError::InvalidArgument(format!(
                "{chain_id} is not a cosmos chain"
            ))),
        }
    }

    pub fn get_starknet_chain_info_or_err(
        &self,
        chain_id: &str,
    ) -> KeyRingResult<StarknetChainInfo> {
        let info = self.get_modular_chain_info_or_err(chain_id)?;
        match info.module {
            ChainModule::Starknet(starknet) => Ok(starknet),
            _ => Err(KeyRingError::InvalidArgument(format!(
                "{chain_id} is not a starknet chain"
            ))),
        }
    }

    pub fn get_bitcoin_chain_info_or_err(&self, chain_id: &str) -> KeyRingResult<BitcoinChainInfo> {
        let info = self.get_modular_chain_info_or_err(chain_id)?;
        match info.module {
            ChainModule::Bitcoin(bitcoin) => Ok(bitcoin),
            _ => Err(KeyRingError::InvalidArgument(format!(
                "{chain_id} is not a bitcoin chain"
            ))),
        }
    }

    pub fn get_evm_info_or_err(&self, chain_id: &str) -> KeyRingResult<EvmInfo> {
        self.get_cosmos_chain_info_or_err(chain_id)?
            .evm
            .ok_or_else(|| KeyRingError::InvalidArgument(format!("{chain_id} has no EVM info")))
    }

    /// EVM chains are registered under the `eip155:` namespace.
    pub fn is_evm_only_chain(&self, chain_id: &str) -> bool {
        chain_id.starts_with("eip155:")
    }

    /// Register (or replace, by identifier) a chain and notify listeners.
    pub fn suggest_chain(&self, chain: ModularChainInfo) {
        let identifier = chain.identifier();
        {
            let mut chains = match self.chains.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match chains.iter_mut().find(|c| c.identifier() == identifier) {
                Some(existing) => *existing = chain.clone(),
                None => chains.push(chain.clone()),
            }
        }
        info!(chain_id = %chain.chain_id, "Chain suggested");

        match self.suggested_handlers.read() {
            Ok(handlers) => {
                for handler in handlers.iter() {
                    handler(&chain);
                }
            }
            Err(_) => warn!("Chain suggested handler list poisoned"),
        }
    }

    pub fn add_chain_suggested_handler<F>(&self, handler: F)
    where
        F: Fn(&ModularChainInfo) + Send + Sync + 'static,
    {
        match self.suggested_handlers.write() {
            Ok(mut handlers) => handlers.push(Box::new(handler)),
            Err(_) => warn!("Chain suggested handler list poisoned; handler not registered"),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ModularChainInfo>> {
        match self.chains.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// =============================================================================
// Test fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn currency(denom: &str) -> Currency {
        Currency {
            coin_denom: denom.to_uppercase(),
            coin_minimal_denom: format!("u{denom}"),
            coin_decimals: 6,
            contract_address: None,
        }
    }

    pub fn cosmos_chain(chain_id: &str, prefix: &str, coin_type: u32) -> ModularChainInfo {
        ModularChainInfo {
            chain_id: chain_id.to_string(),
            chain_name: prefix.to_string(),
            linked_chain_key: None,
            module: ChainModule::Cosmos(CosmosChainInfo {
                rest: format!("https://rest.{prefix}.example"),
                bip44: Bip44 { coin_type },
                alternative_bip44s: Vec::new(),
                bech32_config: Bech32Config {
                    bech32_prefix_acc_addr: prefix.to_string(),
                },
                currencies: vec![currency(prefix)],
                stake_currency: None,
                features: Vec::new(),
                evm: None,
                hide_in_ui: false,
            }),
        }
    }

    pub fn legacy_cosmos_chain(chain_id: &str, prefix: &str) -> ModularChainInfo {
        let mut chain = cosmos_chain(chain_id, prefix, 60);
        if let ChainModule::Cosmos(cosmos) = &mut chain.module {
            cosmos.alternative_bip44s = vec![Bip44 { coin_type: 118 }];
        }
        chain
    }

    pub fn ethermint_chain(chain_id: &str, prefix: &str) -> ModularChainInfo {
        let mut chain = cosmos_chain(chain_id, prefix, 60);
        if let ChainModule::Cosmos(cosmos) = &mut chain.module {
            cosmos.features = vec!["eth-address-gen".to_string(), "eth-key-sign".to_string()];
        }
        chain
    }

    pub fn evm_chain(chain_id: u64) -> ModularChainInfo {
        let mut chain = cosmos_chain(&format!("eip155:{chain_id}"), "evm", 60);
        if let ChainModule::Cosmos(cosmos) = &mut chain.module {
            cosmos.evm = Some(EvmInfo {
                chain_id,
                rpc: "https://rpc.evm.example".to_string(),
            });
        }
        chain
    }

    pub fn starknet_chain(chain_id: &str) -> ModularChainInfo {
        ModularChainInfo {
            chain_id: chain_id.to_string(),
            chain_name: "Starknet".to_string(),
            linked_chain_key: None,
            module: ChainModule::Starknet(StarknetChainInfo {
                rpc: "https://rpc.starknet.example".to_string(),
                eth_account_class_hash:
                    "0x3e327de1c40540b98d05cbcb13552008e36f0ec8d61d46956d2f9752c294328".to_string(),
                currencies: vec![Currency {
                    coin_denom: "ETH".to_string(),
                    coin_minimal_denom: "erc20:eth".to_string(),
                    coin_decimals: 18,
                    contract_address: Some(
                        "0x49d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7"
                            .to_string(),
                    ),
                }],
                coin_type: STARKNET_COIN_TYPE,
            }),
        }
    }

    pub fn bitcoin_chain(chain_id: &str, payment_type: SupportedPaymentType) -> ModularChainInfo {
        ModularChainInfo {
            chain_id: chain_id.to_string(),
            chain_name: format!("Bitcoin {}", payment_type.as_str()),
            linked_chain_key: Some("bitcoin".to_string()),
            module: ChainModule::Bitcoin(BitcoinChainInfo {
                rest: "https://mempool.example/api".to_string(),
                bip44: Bip44 { coin_type: 0 },
                network: BitcoinNetwork::Mainnet,
                payment_type,
                currencies: vec![Currency {
                    coin_denom: "BTC".to_string(),
                    coin_minimal_denom: "sat".to_string(),
                    coin_decimals: 8,
                    contract_address: None,
                }],
            }),
        }
    }
}
