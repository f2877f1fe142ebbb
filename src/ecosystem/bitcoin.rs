// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bitcoin accounts. The chain's payment type picks both the derivation
//! purpose (84 native segwit, 86 taproot) and the address encoding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::bitcoin::{payment_address, SupportedPaymentType};
use crate::error::KeyRingResult;
use crate::keyring::{KeyRingService, KeyRingType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinKey {
    pub name: String,
    /// Compressed public key, hex.
    pub pub_key: String,
    pub address: String,
    pub payment_type: SupportedPaymentType,
    pub is_nano_ledger: bool,
}

pub struct KeyRingBitcoinService {
    key_ring: Arc<KeyRingService>,
}

impl KeyRingBitcoinService {
    pub fn new(key_ring: Arc<KeyRingService>) -> Self {
        Self { key_ring }
    }

    pub fn get_bitcoin_key(&self, vault_id: &str, chain_id: &str) -> KeyRingResult<BitcoinKey> {
        let bitcoin = self
            .key_ring
            .chains()
            .get_bitcoin_chain_info_or_err(chain_id)?;
        let pub_key = self.key_ring.get_pub_key(chain_id, vault_id)?;

        Ok(BitcoinKey {
            name: self.key_ring.get_key_ring_name(vault_id)?,
            pub_key: pub_key.to_hex(),
            address: payment_address(&pub_key, bitcoin.payment_type, bitcoin.network)?,
            payment_type: bitcoin.payment_type,
            is_nano_ledger: self.key_ring.get_key_ring_type(vault_id)? == KeyRingType::Ledger,
        })
    }
}
