// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cosmos keys: bech32 accounts, coin-type candidates, and amino-style
//! signatures.

use std::sync::Arc;

use alloy::primitives::Address;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use crate::chains::CosmosChainInfo;
use crate::crypto::secp256k1::encode_bech32_address;
use crate::crypto::{DigestMethod, PubKeySecp256k1};
use crate::error::KeyRingResult;
use crate::keyring::{is_ethermint_like, KeyRingService, KeyRingType};

/// Resolved Cosmos account of a vault on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmosKey {
    pub name: String,
    /// `secp256k1`, or `ethsecp256k1` on Ethermint-like chains.
    pub algo: String,
    /// Compressed public key, hex.
    pub pub_key: String,
    /// Raw 20-byte address, hex.
    pub address: String,
    pub bech32_address: String,
    pub ethereum_hex_address: String,
    pub is_nano_ledger: bool,
}

/// One candidate account of a chain whose coin type is not finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinTypeAddress {
    pub coin_type: u32,
    pub bech32_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyValue {
    #[serde(rename = "type")]
    pub key_type: String,
    /// Compressed key, base64.
    pub value: String,
}

/// Amino `StdSignature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdSignature {
    pub pub_key: PubKeyValue,
    /// `r || s`, base64.
    pub signature: String,
}

pub struct KeyRingCosmosService {
    key_ring: Arc<KeyRingService>,
}

impl KeyRingCosmosService {
    pub fn new(key_ring: Arc<KeyRingService>) -> Self {
        Self { key_ring }
    }

    pub fn get_key(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<CosmosKey> {
        let cosmos = self.key_ring.chains().get_cosmos_chain_info_or_err(chain_id)?;
        let pub_key = self.key_ring.get_pub_key(chain_id, vault_id)?;
        let name = self.key_ring.get_key_ring_name(vault_id)?;
        let key_ring_type = self.key_ring.get_key_ring_type(vault_id)?;

        let ethermint = is_ethermint_like(&cosmos);
        let address = account_address(&pub_key, ethermint);
        Ok(CosmosKey {
            name,
            algo: if ethermint { "ethsecp256k1" } else { "secp256k1" }.to_string(),
            pub_key: pub_key.to_hex(),
            address: alloy::hex::encode(address),
            bech32_address: encode_bech32_address(
                &cosmos.bech32_config.bech32_prefix_acc_addr,
                &address,
            )?,
            ethereum_hex_address: Address::from(address).to_checksum(None),
            is_nano_ledger: key_ring_type == KeyRingType::Ledger,
        })
    }

    /// Accounts at every candidate coin type, primary first. Nothing is
    /// recorded on the vault.
    pub fn compute_not_finalized_key_addresses(
        &self,
        vault_id: &str,
        chain_id: &str,
    ) -> KeyRingResult<Vec<CoinTypeAddress>> {
        let cosmos = self.key_ring.chains().get_cosmos_chain_info_or_err(chain_id)?;
        let ethermint = is_ethermint_like(&cosmos);

        self.key_ring
            .candidate_coin_types(chain_id)?
            .into_iter()
            .map(|coin_type| {
                let pub_key = self
                    .key_ring
                    .get_pub_key_with_not_finalized_coin_type(chain_id, vault_id, coin_type)?;
                Ok(CoinTypeAddress {
                    coin_type,
                    bech32_address: encode_bech32_address(
                        &cosmos.bech32_config.bech32_prefix_acc_addr,
                        &account_address(&pub_key, ethermint),
                    )?,
                })
            })
            .collect()
    }

    /// Sign sign-doc bytes: sha256, or keccak256 on Ethermint-like chains.
    pub fn sign_bytes(&self, vault_id: &str, chain_id: &str, sign_doc: &[u8]) -> KeyRingResult<StdSignature> {
        let cosmos = self.key_ring.chains().get_cosmos_chain_info_or_err(chain_id)?;
        let ethermint = is_ethermint_like(&cosmos);
        let digest = digest_method_for(&cosmos);

        let signature = self.key_ring.sign(chain_id, vault_id, sign_doc, digest)?;
        let pub_key = self.key_ring.get_pub_key(chain_id, vault_id)?;

        Ok(StdSignature {
            pub_key: PubKeyValue {
                key_type: if ethermint {
                    "ethermint/PubKeyEthSecp256k1"
                } else {
                    "tendermint/PubKeySecp256k1"
                }
                .to_string(),
                value: Base64::encode_string(&pub_key.to_bytes()),
            },
            signature: Base64::encode_string(&signature.to_compact()),
        })
    }
}

fn account_address(pub_key: &PubKeySecp256k1, ethermint: bool) -> [u8; 20] {
    if ethermint {
        pub_key.eth_address().0 .0
    } else {
        pub_key.cosmos_address()
    }
}

fn digest_method_for(cosmos: &CosmosChainInfo) -> DigestMethod {
    if is_ethermint_like(cosmos) {
        DigestMethod::Keccak256
    } else {
        DigestMethod::Sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::{cosmos_chain, ethermint_chain, legacy_cosmos_chain};
    use crate::crypto::PrivKeySecp256k1;
    use crate::keyring::mnemonic::ABANDON;
    use crate::keyring::service::test_support::{harness, Harness, PASSWORD};
    use crate::keyring::BIP44HDPath;
    use crate::ledger::fake::FakeDevice;
    use crate::ledger::LedgerApp;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use k256::ecdsa::{Signature, VerifyingKey};
    use sha2::{Digest, Sha256};

    fn setup() -> (Harness, KeyRingCosmosService, String) {
        let device_key = PrivKeySecp256k1::from_bytes(&[9; 32]).unwrap().pub_key();
        let h = harness(
            vec![
                cosmos_chain("cosmoshub-4", "cosmos", 118),
                ethermint_chain("evmos_9001-2", "evmos"),
                legacy_cosmos_chain("legacy-1", "legacy"),
            ],
            FakeDevice::new(LedgerApp::Cosmos, device_key.to_bytes()),
        );
        let id = h
            .service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();
        let cosmos = KeyRingCosmosService::new(h.service.clone());
        (h, cosmos, id)
    }

    #[test]
    fn cosmos_hub_key() {
        let (_h, cosmos, id) = setup();
        let key = cosmos.get_key(&id, "cosmoshub-4").unwrap();
        assert_eq!(key.algo, "secp256k1");
        assert_eq!(key.name, "main");
        assert!(!key.is_nano_ledger);
        assert_eq!(
            key.bech32_address,
            "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4"
        );
        assert_eq!(key.address.len(), 40);
    }

    #[test]
    fn ethermint_key_uses_the_ethereum_address() {
        let (_h, cosmos, id) = setup();
        let key = cosmos.get_key(&id, "evmos_9001-2").unwrap();
        assert_eq!(key.algo, "ethsecp256k1");
        // m/44'/60'/0'/0/0 of the reference mnemonic
        assert_eq!(
            key.ethereum_hex_address,
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
        assert!(key.bech32_address.starts_with("evmos1"));
    }

    #[test]
    fn two_candidates_for_a_legacy_chain() {
        let (h, cosmos, id) = setup();
        let candidates = cosmos.compute_not_finalized_key_addresses(&id, "legacy-1").unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].coin_type, 60);
        assert_eq!(candidates[1].coin_type, 118);
        assert_ne!(candidates[0].bech32_address, candidates[1].bech32_address);
        assert!(h.service.need_key_coin_type_finalize(&id, "legacy-1").unwrap());
    }

    #[test]
    fn sign_bytes_verifies_against_the_account_key() {
        let (h, cosmos, id) = setup();
        let doc = br#"{"chain_id":"cosmoshub-4"}"#;
        let signed = cosmos.sign_bytes(&id, "cosmoshub-4", doc).unwrap();
        assert_eq!(signed.pub_key.key_type, "tendermint/PubKeySecp256k1");

        let pub_key = h.service.get_pub_key("cosmoshub-4", &id).unwrap();
        let verifying = VerifyingKey::from_sec1_bytes(&pub_key.to_bytes()).unwrap();
        let sig_bytes = Base64::decode_vec(&signed.signature).unwrap();
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        let digest: [u8; 32] = Sha256::digest(doc).into();
        assert!(verifying.verify_prehash(&digest, &signature).is_ok());
    }
}
