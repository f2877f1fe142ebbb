// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Starknet accounts.
//!
//! The account address is the counterfactual deployment address of the
//! chain's account class for the vault's public key. Software accounts sign
//! transaction hashes with the secp256k1 key; the signature is
//! `[r.low, r.high, s.low, s.high, v]`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::starknet::{
    chain_id_felt, compile_execute_calldata, felt_from_hex, felt_to_padded_hex,
    invoke_v1_transaction_hash, split_u256, Call, Felt,
};
use crate::crypto::{DigestMethod, PubKeyStarknet};
use crate::error::KeyRingResult;
use crate::keyring::{KeyRingService, KeyRingType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarknetKey {
    pub name: String,
    /// Zero-padded account address.
    pub hex_address: String,
    /// `0x04 || x || y`, hex.
    pub pub_key: String,
    pub is_nano_ledger: bool,
}

/// Signed v1 invoke, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInvoke {
    pub sender_address: Felt,
    pub calldata: Vec<Felt>,
    pub transaction_hash: Felt,
    pub signature: Vec<Felt>,
}

pub struct KeyRingStarknetService {
    key_ring: Arc<KeyRingService>,
}

impl KeyRingStarknetService {
    pub fn new(key_ring: Arc<KeyRingService>) -> Self {
        Self { key_ring }
    }

    pub fn get_starknet_key(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<StarknetKey> {
        let (pub_key, address) = self.account(vault_id, chain_id)?;
        Ok(StarknetKey {
            name: self.key_ring.get_key_ring_name(vault_id)?,
            hex_address: felt_to_padded_hex(&address),
            pub_key: pub_key.to_hex(),
            is_nano_ledger: self.key_ring.get_key_ring_type(vault_id)? == KeyRingType::Ledger,
        })
    }

    /// Sign a transaction hash computed upstream.
    pub fn sign_transaction_hash(
        &self,
        vault_id: &str,
        chain_id: &str,
        hash: &Felt,
    ) -> KeyRingResult<Vec<Felt>> {
        self.key_ring
            .chains()
            .get_starknet_chain_info_or_err(chain_id)?;
        let signature = self.key_ring.sign(
            chain_id,
            vault_id,
            &hash.to_bytes_be(),
            DigestMethod::Noop,
        )?;

        let (r_high, r_low) = split_u256(&signature.r);
        let (s_high, s_low) = split_u256(&signature.s);
        let v = Felt::from(signature.v.unwrap_or(0));
        Ok(vec![r_low, r_high, s_low, s_high, v])
    }

    /// Build and sign a v1 invoke from the vault's account.
    pub fn sign_invoke_v1(
        &self,
        vault_id: &str,
        chain_id: &str,
        calls: &[Call],
        max_fee: &Felt,
        nonce: &Felt,
    ) -> KeyRingResult<SignedInvoke> {
        let (_, sender_address) = self.account(vault_id, chain_id)?;
        let calldata = compile_execute_calldata(calls);
        let transaction_hash = invoke_v1_transaction_hash(
            &sender_address,
            &calldata,
            max_fee,
            &chain_id_felt(chain_id)?,
            nonce,
        );
        let signature = self.sign_transaction_hash(vault_id, chain_id, &transaction_hash)?;
        Ok(SignedInvoke {
            sender_address,
            calldata,
            transaction_hash,
            signature,
        })
    }

    fn account(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<(PubKeyStarknet, Felt)> {
        let starknet = self
            .key_ring
            .chains()
            .get_starknet_chain_info_or_err(chain_id)?;
        let pub_key = self.key_ring.get_pub_key_starknet(chain_id, vault_id)?;
        let class_hash = felt_from_hex(&starknet.eth_account_class_hash)?;
        let address = pub_key.compute_address(&class_hash);
        Ok((pub_key, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::{cosmos_chain, starknet_chain};
    use crate::crypto::starknet::get_selector_from_name;
    use crate::crypto::PrivKeySecp256k1;
    use crate::error::KeyRingError;
    use crate::keyring::service::test_support::{harness, PASSWORD};
    use crate::keyring::BIP44HDPath;
    use crate::ledger::fake::FakeDevice;
    use crate::ledger::LedgerApp;
    use crate::vault::PlainObject;

    const CHAIN: &str = "starknet:SN_MAIN";

    fn key_one() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        bytes
    }

    #[test]
    fn software_account_signs_hashes() {
        let device_key = PrivKeySecp256k1::from_bytes(&[9; 32]).unwrap().pub_key();
        let h = harness(
            vec![starknet_chain(CHAIN), cosmos_chain("cosmoshub-4", "cosmos", 118)],
            FakeDevice::new(LedgerApp::Cosmos, device_key.to_bytes()),
        );
        let id = h
            .service
            .create_private_key_key_ring(&key_one(), PlainObject::new(), "pk", Some(PASSWORD))
            .unwrap();
        let starknet = KeyRingStarknetService::new(h.service.clone());

        let key = starknet.get_starknet_key(&id, CHAIN).unwrap();
        assert_eq!(key.hex_address.len(), 66);
        assert!(key.pub_key.starts_with("04"));
        assert_eq!(key, starknet.get_starknet_key(&id, CHAIN).unwrap());

        let hash = Felt::from(0x1234u64);
        let signature = starknet.sign_transaction_hash(&id, CHAIN, &hash).unwrap();
        assert_eq!(signature.len(), 5);
        assert!(signature[4] == Felt::ZERO || signature[4] == Felt::ONE);

        assert!(matches!(
            starknet.sign_transaction_hash(&id, "cosmoshub-4", &hash),
            Err(KeyRingError::InvalidArgument(_)) | Err(KeyRingError::ChainNotFound { .. })
        ));
    }

    #[test]
    fn invoke_is_hashed_from_the_account() {
        let device_key = PrivKeySecp256k1::from_bytes(&[9; 32]).unwrap().pub_key();
        let h = harness(
            vec![starknet_chain(CHAIN)],
            FakeDevice::new(LedgerApp::Cosmos, device_key.to_bytes()),
        );
        let id = h
            .service
            .create_private_key_key_ring(&key_one(), PlainObject::new(), "pk", Some(PASSWORD))
            .unwrap();
        let starknet = KeyRingStarknetService::new(h.service.clone());

        let call = Call {
            contract_address: Felt::from(0xabcu64),
            entrypoint: "transfer".to_string(),
            calldata: vec![Felt::ONE, Felt::TWO, Felt::ZERO],
        };
        let signed = starknet
            .sign_invoke_v1(&id, CHAIN, &[call], &Felt::from(1000u64), &Felt::ZERO)
            .unwrap();
        assert_eq!(signed.calldata[2], get_selector_from_name("transfer"));
        let key = starknet.get_starknet_key(&id, CHAIN).unwrap();
        assert_eq!(felt_to_padded_hex(&signed.sender_address), key.hex_address);
        assert_eq!(signed.signature.len(), 5);
    }

    #[tokio::test]
    async fn ledger_account_uses_the_recorded_starknet_key() {
        let stark_key = PrivKeySecp256k1::from_bytes(&[5; 32])
            .unwrap()
            .pub_key()
            .to_uncompressed_bytes()
            .to_vec();
        let h = harness(
            vec![starknet_chain(CHAIN)],
            FakeDevice::new(LedgerApp::Starknet, stark_key.clone()),
        );
        let id = h
            .service
            .create_ledger_key_ring(LedgerApp::Starknet, BIP44HDPath::default(), "nano", Some(PASSWORD))
            .await
            .unwrap();
        let starknet = KeyRingStarknetService::new(h.service.clone());

        let key = starknet.get_starknet_key(&id, CHAIN).unwrap();
        assert!(key.is_nano_ledger);
        assert_eq!(key.pub_key, alloy::hex::encode(&stark_key));
        assert!(matches!(
            starknet.sign_transaction_hash(&id, CHAIN, &Felt::ONE),
            Err(KeyRingError::HardwareSigningNotSupportedInBackground)
        ));
    }
}
