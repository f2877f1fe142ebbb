// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger backend.
//!
//! The vault holds no secret. Pairing reads one app's public key from the
//! device and records it in `insensitive` as `{ [app]: { pubKey }, bip44Path }`;
//! every later public key request is answered from that record. Bitcoin apps
//! record one key per BIP-43 purpose: `pubKey` for native segwit (84) and
//! `pubKey86` for taproot. Signing is
//! never done here: it needs a foreground device session (see
//! [`crate::ledger::StarknetLedgerSigner`]).

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::{
    is_ethermint_like, BIP44HDPath, KeyRing, KeyRingType, NewKeyRingVault, StarknetCapable,
    BIP44_PATH_FIELD,
};
use crate::chains::{ChainModule, ModularChainInfo};
use crate::crypto::bitcoin::BitcoinNetwork;
use crate::crypto::{DigestMethod, PubKeySecp256k1, PubKeyStarknet, SignatureRsv};
use crate::error::{KeyRingError, KeyRingResult};
use crate::ledger::{read_app_public_key, LedgerApp, TransportKind, TransportOpener};
use crate::vault::{PlainObject, Vault};

const PUB_KEY_FIELD: &str = "pubKey";

pub struct KeyRingLedger {
    opener: Arc<dyn TransportOpener>,
    transport_kind: TransportKind,
}

impl KeyRingLedger {
    pub fn new(opener: Arc<dyn TransportOpener>, transport_kind: TransportKind) -> Self {
        Self {
            opener,
            transport_kind,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    pub fn opener(&self) -> Arc<dyn TransportOpener> {
        self.opener.clone()
    }

    /// Pair a device: read `app`'s public key and build the vault payloads.
    pub async fn create_key_ring_vault(
        &self,
        app: LedgerApp,
        bip44_path: BIP44HDPath,
    ) -> KeyRingResult<NewKeyRingVault> {
        bip44_path.validate()?;
        let record = self.read_app_record(app, &bip44_path).await?;

        let mut insensitive = PlainObject::new();
        insensitive.insert(app.as_str().to_string(), record);
        insensitive.insert(BIP44_PATH_FIELD.to_string(), serde_json::to_value(bip44_path)?);

        info!(app = app.as_str(), "Paired ledger device");
        Ok(NewKeyRingVault {
            insensitive,
            sensitive: PlainObject::new(),
        })
    }

    /// Read another app's public key for an existing pairing. Returns the
    /// insensitive patch to merge into the vault.
    pub async fn append_app(&self, vault: &Vault, app: LedgerApp) -> KeyRingResult<PlainObject> {
        let bip44_path = BIP44HDPath::of_vault(vault)?;
        let record = self.read_app_record(app, &bip44_path).await?;

        let mut patch = PlainObject::new();
        patch.insert(app.as_str().to_string(), record);
        info!(vault_id = %vault.id, app = app.as_str(), "Appended ledger app");
        Ok(patch)
    }

    /// Apps whose public key the vault has recorded.
    pub fn initialized_apps(vault: &Vault) -> Vec<LedgerApp> {
        LedgerApp::ALL
            .into_iter()
            .filter(|app| recorded_pub_key(vault, *app, app.primary_purpose()).is_some())
            .collect()
    }

    /// Read the app's key under every purpose it serves.
    async fn read_app_record(&self, app: LedgerApp, path: &BIP44HDPath) -> KeyRingResult<Value> {
        let mut record = PlainObject::new();
        for &purpose in app.purposes() {
            let derivation_path = app.derivation_path_with_purpose(purpose, path);
            let pub_key = self.read_pub_key(app, &derivation_path).await?;
            record.insert(
                pub_key_field(app, purpose),
                Value::String(alloy::hex::encode(pub_key)),
            );
        }
        Ok(Value::Object(record))
    }

    async fn read_pub_key(&self, app: LedgerApp, derivation_path: &str) -> KeyRingResult<Vec<u8>> {
        let pub_key = read_app_public_key(
            self.opener.as_ref(),
            self.transport_kind,
            app,
            derivation_path,
        )
        .await?;

        // Refuse to record something we could not use later.
        match app {
            LedgerApp::Starknet => {
                PubKeyStarknet::from_bytes(&pub_key)?;
            }
            _ => {
                PubKeySecp256k1::from_bytes(&pub_key)?;
            }
        }
        Ok(pub_key)
    }

    /// App and purpose whose key serves `chain`.
    fn app_for_chain(
        &self,
        vault: &Vault,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<(LedgerApp, u32)> {
        match &chain.module {
            ChainModule::Starknet(_) => Err(KeyRingError::UnsupportedEcosystem {
                key_ring_type: KeyRingType::Ledger.as_str(),
                chain_id: chain.chain_id.clone(),
                reason: "use getPubKeyStarknet for Starknet chains".to_string(),
            }),
            ChainModule::Bitcoin(bitcoin) => {
                let app = match bitcoin.network {
                    BitcoinNetwork::Mainnet => LedgerApp::Bitcoin,
                    _ => LedgerApp::BitcoinTest,
                };
                Ok((app, bitcoin.payment_type.purpose()))
            }
            ChainModule::Cosmos(cosmos) => {
                if is_ethermint_like(cosmos) {
                    return Ok((LedgerApp::Ethereum, LedgerApp::Ethereum.primary_purpose()));
                }
                // Terra and Secret pairings replace the Cosmos app key.
                let mut app = LedgerApp::Cosmos;
                for candidate in [LedgerApp::Terra, LedgerApp::Secret] {
                    if recorded_pub_key(vault, candidate, candidate.primary_purpose()).is_some() {
                        app = candidate;
                    }
                }
                Ok((app, app.primary_purpose()))
            }
        }
    }
}

impl KeyRing for KeyRingLedger {
    fn supported_key_ring_type(&self) -> KeyRingType {
        KeyRingType::Ledger
    }

    fn get_pub_key(
        &self,
        vault: &Vault,
        _coin_type: u32,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeySecp256k1> {
        let (app, purpose) = self.app_for_chain(vault, chain)?;
        let hex = recorded_pub_key(vault, app, purpose).ok_or_else(|| KeyRingError::LedgerAppNotInitialized {
            app: app.as_str().to_string(),
        })?;
        PubKeySecp256k1::from_hex(hex).map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))
    }

    fn sign(
        &self,
        _vault: &Vault,
        _coin_type: u32,
        _data: &[u8],
        _digest_method: DigestMethod,
        _chain: &ModularChainInfo,
    ) -> KeyRingResult<SignatureRsv> {
        Err(KeyRingError::HardwareSigningNotSupportedInBackground)
    }
}

impl StarknetCapable for KeyRingLedger {
    fn get_pub_key_starknet(
        &self,
        vault: &Vault,
        chain: &ModularChainInfo,
    ) -> KeyRingResult<PubKeyStarknet> {
        if chain.starknet().is_none() {
            return Err(KeyRingError::InvalidArgument(format!(
                "{} is not a Starknet chain",
                chain.chain_id
            )));
        }
        let starknet = LedgerApp::Starknet;
        let hex = recorded_pub_key(vault, starknet, starknet.primary_purpose()).ok_or_else(|| {
            KeyRingError::LedgerAppNotInitialized {
                app: LedgerApp::Starknet.as_str().to_string(),
            }
        })?;
        PubKeyStarknet::from_hex(hex).map_err(|e| KeyRingError::corrupt(&vault.id, e.to_string()))
    }
}

fn pub_key_field(app: LedgerApp, purpose: u32) -> String {
    if purpose == app.primary_purpose() {
        PUB_KEY_FIELD.to_string()
    } else {
        format!("{PUB_KEY_FIELD}{purpose}")
    }
}

fn recorded_pub_key(vault: &Vault, app: LedgerApp, purpose: u32) -> Option<&str> {
    vault
        .insensitive
        .get(app.as_str())
        .and_then(|record| record.get(pub_key_field(app, purpose)))
        .and_then(Value::as_str)
}
