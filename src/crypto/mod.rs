// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Curve and address primitives shared by the keyring backends and the
//! ecosystem key services.
//!
//! - `secp256k1` - public/private keys, Cosmos and Ethereum addresses
//! - `starknet` - Starknet public keys, Pedersen hashing, contract addresses
//! - `bitcoin` - payment-type specific address encoding

pub mod bitcoin;
pub mod secp256k1;
pub mod starknet;

use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KeyRingError, KeyRingResult};

pub use self::secp256k1::{PrivKeySecp256k1, PubKeySecp256k1};
pub use self::starknet::PubKeyStarknet;

/// Hash applied to a payload before curve signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMethod {
    Sha256,
    Keccak256,
    /// Payload is already a 32-byte digest computed upstream.
    Noop,
}

impl DigestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestMethod::Sha256 => "sha256",
            DigestMethod::Keccak256 => "keccak256",
            DigestMethod::Noop => "noop",
        }
    }

    pub fn digest(&self, data: &[u8]) -> KeyRingResult<[u8; 32]> {
        match self {
            DigestMethod::Sha256 => Ok(Sha256::digest(data).into()),
            DigestMethod::Keccak256 => Ok(keccak256(data).0),
            DigestMethod::Noop => data.try_into().map_err(|_| {
                KeyRingError::InvalidArgument(format!(
                    "noop digest expects 32 bytes, got {}",
                    data.len()
                ))
            }),
        }
    }
}

/// Raw curve signature. `v` is the recovery id and is only present for
/// ECDSA-recoverable signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRsv {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: Option<u8>,
}

impl SignatureRsv {
    /// `r || s`
    pub fn to_compact(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_methods() {
        let sha = DigestMethod::Sha256.digest(b"abc").unwrap();
        assert_eq!(
            alloy::hex::encode(sha),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let keccak = DigestMethod::Keccak256.digest(b"").unwrap();
        assert_eq!(
            alloy::hex::encode(keccak),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );

        assert_eq!(DigestMethod::Noop.digest(&[9u8; 32]).unwrap(), [9u8; 32]);
        assert!(matches!(
            DigestMethod::Noop.digest(&[9u8; 31]),
            Err(KeyRingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn digest_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&DigestMethod::Keccak256).unwrap(),
            "\"keccak256\""
        );
        let parsed: DigestMethod = serde_json::from_str("\"noop\"").unwrap();
        assert_eq!(parsed, DigestMethod::Noop);
        assert_eq!(parsed.as_str(), "noop");
    }
}
