// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bitcoin payment-type address encoding on top of the `bitcoin` crate.
//!
//! - native segwit: P2WPKH, witness v0, bech32 (BIP-84 derivation)
//! - taproot: P2TR key-path only, witness v1, bech32m (BIP-86 derivation)

use bitcoin::key::{TapTweak, UntweakedPublicKey};
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, Network};
use serde::{Deserialize, Serialize};

use super::PubKeySecp256k1;
use crate::error::{KeyRingError, KeyRingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupportedPaymentType {
    NativeSegwit,
    Taproot,
}

impl SupportedPaymentType {
    /// BIP-43 purpose used to derive keys for this payment type.
    pub fn purpose(&self) -> u32 {
        match self {
            SupportedPaymentType::NativeSegwit => 84,
            SupportedPaymentType::Taproot => 86,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedPaymentType::NativeSegwit => "native-segwit",
            SupportedPaymentType::Taproot => "taproot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl BitcoinNetwork {
    /// Network parameters for address encoding.
    pub fn network(&self) -> Network {
        match self {
            BitcoinNetwork::Mainnet => Network::Bitcoin,
            BitcoinNetwork::Testnet => Network::Testnet,
            BitcoinNetwork::Signet => Network::Signet,
            BitcoinNetwork::Regtest => Network::Regtest,
        }
    }
}

/// Address for the given payment type.
pub fn payment_address(
    pub_key: &PubKeySecp256k1,
    payment_type: SupportedPaymentType,
    network: BitcoinNetwork,
) -> KeyRingResult<String> {
    match payment_type {
        SupportedPaymentType::NativeSegwit => native_segwit_address(pub_key, network),
        SupportedPaymentType::Taproot => taproot_address(pub_key, network),
    }
}

/// P2WPKH: witness v0 over `hash160(compressed pubkey)`.
pub fn native_segwit_address(
    pub_key: &PubKeySecp256k1,
    network: BitcoinNetwork,
) -> KeyRingResult<String> {
    let compressed = CompressedPublicKey::from_slice(&pub_key.to_bytes())
        .map_err(|e| KeyRingError::Crypto(e.to_string()))?;
    Ok(Address::p2wpkh(&compressed, network.network()).to_string())
}

/// P2TR key-path only: witness v1 over the BIP-341 tweaked key, no script tree.
pub fn taproot_address(pub_key: &PubKeySecp256k1, network: BitcoinNetwork) -> KeyRingResult<String> {
    let secp = Secp256k1::verification_only();
    let internal = internal_key(pub_key)?;
    Ok(Address::p2tr(&secp, internal, None, network.network()).to_string())
}

/// x-only output key `Q = P + t*G`, `t = tagged_hash("TapTweak", P.x)`.
pub fn taproot_output_key(pub_key: &PubKeySecp256k1) -> KeyRingResult<[u8; 32]> {
    let secp = Secp256k1::verification_only();
    let (output, _parity) = internal_key(pub_key)?.tap_tweak(&secp, None);
    Ok(output.to_inner().serialize())
}

fn internal_key(pub_key: &PubKeySecp256k1) -> KeyRingResult<UntweakedPublicKey> {
    let key = secp256k1::PublicKey::from_slice(&pub_key.to_bytes())
        .map_err(|e| KeyRingError::Crypto(e.to_string()))?;
    Ok(key.x_only_public_key().0)
}
