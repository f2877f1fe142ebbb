// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ethereum accounts on EVM and Ethermint-like chains.

use std::sync::Arc;

use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::crypto::{DigestMethod, SignatureRsv};
use crate::error::{KeyRingError, KeyRingResult};
use crate::keyring::{is_ethermint_like, KeyRingService, KeyRingType};

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumKey {
    /// Compressed public key, hex.
    pub pub_key: String,
    /// EIP-55 checksummed.
    pub address: String,
    pub is_nano_ledger: bool,
}

pub struct KeyRingEthereumService {
    key_ring: Arc<KeyRingService>,
}

impl KeyRingEthereumService {
    pub fn new(key_ring: Arc<KeyRingService>) -> Self {
        Self { key_ring }
    }

    pub fn get_ethereum_key(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<EthereumKey> {
        self.ensure_evm(chain_id)?;
        let pub_key = self.key_ring.get_pub_key(chain_id, vault_id)?;
        Ok(EthereumKey {
            pub_key: pub_key.to_hex(),
            address: pub_key.eth_hex_address(),
            is_nano_ledger: self.key_ring.get_key_ring_type(vault_id)? == KeyRingType::Ledger,
        })
    }

    /// EIP-191 `personal_sign`. Returns `0x{r}{s}{v}` with `v` in {27, 28}.
    pub fn sign_personal_message(
        &self,
        vault_id: &str,
        chain_id: &str,
        message: &[u8],
    ) -> KeyRingResult<String> {
        self.ensure_evm(chain_id)?;
        let hash = personal_message_hash(message);
        let signature = self
            .key_ring
            .sign(chain_id, vault_id, &hash, DigestMethod::Noop)?;
        Ok(to_rpc_signature(&signature))
    }

    /// EIP-712: signs `keccak256(0x1901 || domainSeparator || structHash)`.
    pub fn sign_typed_data_hash(
        &self,
        vault_id: &str,
        chain_id: &str,
        domain_separator: &[u8; 32],
        struct_hash: &[u8; 32],
    ) -> KeyRingResult<String> {
        self.ensure_evm(chain_id)?;
        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(domain_separator);
        preimage.extend_from_slice(struct_hash);
        let signature = self.key_ring.sign(
            chain_id,
            vault_id,
            &preimage,
            DigestMethod::Keccak256,
        )?;
        Ok(to_rpc_signature(&signature))
    }

    fn ensure_evm(&self, chain_id: &str) -> KeyRingResult<()> {
        let chain = self.key_ring.chains().get_modular_chain_info_or_err(chain_id)?;
        match chain.cosmos() {
            Some(cosmos) if cosmos.evm.is_some() || is_ethermint_like(cosmos) => Ok(()),
            _ => Err(KeyRingError::InvalidArgument(format!(
                "{chain_id} is not an EVM chain"
            ))),
        }
    }
}

pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut preimage = format!("{PERSONAL_MESSAGE_PREFIX}{}", message.len()).into_bytes();
    preimage.extend_from_slice(message);
    keccak256(&preimage).0
}

fn to_rpc_signature(signature: &SignatureRsv) -> String {
    let v = 27 + signature.v.unwrap_or(0);
    format!(
        "0x{}{}{:02x}",
        alloy::hex::encode(signature.r),
        alloy::hex::encode(signature.s),
        v
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::{cosmos_chain, evm_chain};
    use crate::crypto::PrivKeySecp256k1;
    use crate::keyring::service::test_support::{harness, PASSWORD};
    use crate::ledger::fake::FakeDevice;
    use crate::ledger::LedgerApp;
    use crate::vault::PlainObject;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    fn key_one() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        bytes
    }

    #[test]
    fn personal_sign_recovers_to_the_account() {
        let device_key = PrivKeySecp256k1::from_bytes(&[9; 32]).unwrap().pub_key();
        let h = harness(
            vec![evm_chain(1), cosmos_chain("cosmoshub-4", "cosmos", 118)],
            FakeDevice::new(LedgerApp::Ethereum, device_key.to_bytes()),
        );
        let id = h
            .service
            .create_private_key_key_ring(&key_one(), PlainObject::new(), "pk", Some(PASSWORD))
            .unwrap();
        let eth = KeyRingEthereumService::new(h.service.clone());

        let key = eth.get_ethereum_key(&id, "eip155:1").unwrap();
        assert_eq!(key.address, "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");

        let rpc = eth.sign_personal_message(&id, "eip155:1", b"hello").unwrap();
        let bytes = alloy::hex::decode(&rpc).unwrap();
        assert_eq!(bytes.len(), 65);
        assert!(bytes[64] == 27 || bytes[64] == 28);

        let signature = Signature::from_slice(&bytes[..64]).unwrap();
        let recovery = RecoveryId::from_byte(bytes[64] - 27).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(
            &personal_message_hash(b"hello"),
            &signature,
            recovery,
        )
        .unwrap();
        let expected = PrivKeySecp256k1::from_bytes(&key_one()).unwrap().pub_key();
        assert_eq!(
            recovered.to_encoded_point(true).as_bytes(),
            expected.to_bytes().as_slice()
        );

        assert!(eth.get_ethereum_key(&id, "cosmoshub-4").is_err());
    }

    #[test]
    fn personal_message_prefix() {
        // keccak256("\x19Ethereum Signed Message:\n0")
        assert_eq!(
            alloy::hex::encode(personal_message_hash(b"")),
            "5f35dce98ba4fba25530a026ed80b2cecdaa31091ba4958b99b52ea1d068adad"
        );
    }
}
