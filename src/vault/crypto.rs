// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! At-rest encryption for sensitive vault payloads.
//!
//! A 32-byte master key is derived from the user password with Argon2id and
//! held in memory only while the keyring is unlocked. Each sensitive payload
//! is sealed with AES-256-GCM under a fresh 96-bit nonce. The password itself
//! is verified with an HMAC-SHA256 tag over a fixed context string, so a
//! wrong password never reaches the AEAD layer.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyRingError, KeyRingResult};

/// Salt size for Argon2
pub const SALT_SIZE: usize = 16;

/// Nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

const PASSWORD_CHECK_CONTEXT: &[u8] = b"relational-keyring/password-check/v1";

type HmacSha256 = Hmac<Sha256>;

/// Argon2id cost parameters.
///
/// Stored alongside the salt so a later configuration change never locks out
/// an existing keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB memory
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts. Tests only.
    #[cfg(test)]
    pub fn insecure_for_tests() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Sealed payload as persisted in a vault record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Nonce for AES-GCM (base64)
    pub nonce: String,
    /// Ciphertext with GCM tag (base64)
    pub ciphertext: String,
}

/// Decrypted bytes, wiped when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Password-derived key. Never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Derive the master key from a password using Argon2id.
    pub fn derive(password: &str, salt: &[u8], params: KdfParams) -> KeyRingResult<Self> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(32),
        )
        .map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut normalized = normalize_password(password);
        let mut output = [0u8; 32];
        let result = argon2.hash_password_into(normalized.as_bytes(), salt, &mut output);
        normalized.zeroize();
        result.map_err(|e| KeyRingError::Crypto(e.to_string()))?;

        Ok(Self(output))
    }

    /// Tag proving knowledge of the password (base64).
    pub fn password_check(&self) -> KeyRingResult<String> {
        let mac = self.password_mac()?;
        Ok(Base64::encode_string(&mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against a stored password check.
    pub fn verify_password_check(&self, expected: &str) -> KeyRingResult<bool> {
        let expected =
            Base64::decode_vec(expected).map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        Ok(self.password_mac()?.verify_slice(&expected).is_ok())
    }

    fn password_mac(&self) -> KeyRingResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
            .map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        mac.update(PASSWORD_CHECK_CONTEXT);
        Ok(mac)
    }

    /// Seal a payload under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> KeyRingResult<EncryptedBlob> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.0).map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| KeyRingError::Crypto(e.to_string()))?;

        Ok(EncryptedBlob {
            nonce: Base64::encode_string(&nonce_bytes),
            ciphertext: Base64::encode_string(&ciphertext),
        })
    }

    /// Open a sealed payload. Fails if the blob was tampered with or sealed
    /// under another key.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> KeyRingResult<SensitiveBytes> {
        let nonce_bytes = Base64::decode_vec(&blob.nonce)
            .map_err(|e| KeyRingError::Crypto(format!("invalid nonce: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(KeyRingError::Crypto("invalid nonce length".to_string()));
        }
        let ciphertext = Base64::decode_vec(&blob.ciphertext)
            .map_err(|e| KeyRingError::Crypto(format!("invalid ciphertext: {e}")))?;

        let cipher =
            Aes256Gcm::new_from_slice(&self.0).map_err(|e| KeyRingError::Crypto(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| KeyRingError::Crypto("authentication failed".to_string()))?;

        Ok(SensitiveBytes(plaintext))
    }
}

/// Fresh random salt for a new keyring.
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// NFKD so the same password typed on different keyboards derives one key.
fn normalize_password(password: &str) -> String {
    password.nfkd().collect()
}
