// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! secp256k1 keys and the address encodings derived from them.

use alloy::primitives::{keccak256, Address};
use bech32::{ToBase32, Variant};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::SignatureRsv;
use crate::error::{KeyRingError, KeyRingResult};

/// secp256k1 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubKeySecp256k1 {
    key: k256::PublicKey,
}

impl PubKeySecp256k1 {
    /// Accepts SEC1 compressed (33 bytes) or uncompressed (65 bytes) keys.
    pub fn from_bytes(bytes: &[u8]) -> KeyRingResult<Self> {
        let key = k256::PublicKey::from_sec1_bytes(bytes)
            .map_err(|_| KeyRingError::InvalidKey("invalid secp256k1 public key".to_string()))?;
        Ok(Self { key })
    }

    pub fn from_hex(hex: &str) -> KeyRingResult<Self> {
        let bytes = alloy::hex::decode(hex).map_err(|e| KeyRingError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Compressed SEC1 encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.key.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`).
    pub fn to_uncompressed_bytes(&self) -> [u8; 65] {
        let point = self.key.to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Compressed key, hex without prefix.
    pub fn to_hex(&self) -> String {
        alloy::hex::encode(self.to_bytes())
    }

    /// `ripemd160(sha256(compressed))`
    pub fn cosmos_address(&self) -> [u8; 20] {
        let sha = Sha256::digest(self.to_bytes());
        Ripemd160::digest(sha).into()
    }

    /// Last 20 bytes of `keccak256(x || y)`.
    pub fn eth_address(&self) -> Address {
        let uncompressed = self.to_uncompressed_bytes();
        let hash = keccak256(&uncompressed[1..]);
        Address::from_slice(&hash[12..])
    }

    /// EIP-55 checksummed hex address.
    pub fn eth_hex_address(&self) -> String {
        self.eth_address().to_checksum(None)
    }

    pub fn to_bech32(&self, prefix: &str) -> KeyRingResult<String> {
        encode_bech32_address(prefix, &self.cosmos_address())
    }

    pub(crate) fn inner(&self) -> &k256::PublicKey {
        &self.key
    }
}

/// Bech32 (not bech32m) encoding of raw address bytes.
pub fn encode_bech32_address(prefix: &str, address: &[u8]) -> KeyRingResult<String> {
    bech32::encode(prefix, address.to_base32(), Variant::Bech32)
        .map_err(|e| KeyRingError::InvalidArgument(format!("bech32 prefix {prefix}: {e}")))
}

/// secp256k1 private key. Zeroized on drop.
pub struct PrivKeySecp256k1 {
    signing_key: SigningKey,
}

impl PrivKeySecp256k1 {
    pub fn from_bytes(bytes: &[u8]) -> KeyRingResult<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|_| KeyRingError::InvalidKey("invalid secp256k1 private key".to_string()))?;
        Ok(Self { signing_key })
    }

    pub fn from_hex(hex: &str) -> KeyRingResult<Self> {
        let bytes = Zeroizing::new(
            alloy::hex::decode(hex.trim()).map_err(|e| KeyRingError::InvalidKey(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    pub(crate) fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn pub_key(&self) -> PubKeySecp256k1 {
        PubKeySecp256k1 {
            key: self.signing_key.verifying_key().into(),
        }
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes().into())
    }

    /// Recoverable ECDSA over an already-hashed message. `s` is low-S
    /// normalized.
    pub fn sign_digest32(&self, digest: &[u8; 32]) -> KeyRingResult<SignatureRsv> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        let (r, s) = signature.split_bytes();
        Ok(SignatureRsv {
            r: r.into(),
            s: s.into(),
            v: Some(recovery_id.to_byte()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    fn key_one() -> PrivKeySecp256k1 {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        PrivKeySecp256k1::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn generator_point_encodings() {
        let pub_key = key_one().pub_key();
        assert_eq!(
            pub_key.to_hex(),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(pub_key.to_uncompressed_bytes()[0], 0x04);
        assert_eq!(
            PubKeySecp256k1::from_bytes(&pub_key.to_uncompressed_bytes()).unwrap(),
            pub_key
        );
    }

    #[test]
    fn eth_address_of_key_one() {
        assert_eq!(
            key_one().pub_key().eth_hex_address(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn bech32_uses_prefix() {
        let address = key_one().pub_key().to_bech32("cosmos").unwrap();
        assert!(address.starts_with("cosmos1"));
        let osmo = key_one().pub_key().to_bech32("osmo").unwrap();
        assert!(osmo.starts_with("osmo1"));
        assert_ne!(address[7..], osmo[5..]);
    }

    #[test]
    fn signature_recovers_to_signer() {
        let key = key_one();
        let digest = [0x42u8; 32];
        let sig = key.sign_digest32(&digest).unwrap();

        let signature = Signature::from_slice(&sig.to_compact()).unwrap();
        let recid = RecoveryId::from_byte(sig.v.unwrap()).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recid).unwrap();
        assert_eq!(
            PubKeySecp256k1::from_bytes(&recovered.to_encoded_point(true).as_bytes()).unwrap(),
            key.pub_key()
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let key = key_one();
        let a = key.sign_digest32(&[1u8; 32]).unwrap();
        let b = key.sign_digest32(&[1u8; 32]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_invalid_material() {
        assert!(PrivKeySecp256k1::from_bytes(&[0u8; 32]).is_err());
        assert!(PubKeySecp256k1::from_bytes(&[2u8; 10]).is_err());
        assert!(PubKeySecp256k1::from_hex("zz").is_err());
    }
}
