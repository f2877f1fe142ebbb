// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault Store
//!
//! A vault is one persisted account record:
//!
//! ```text
//! {
//!   "id": "…",                  # opaque, immutable
//!   "type": "keyRing",          # namespace of the owning subsystem
//!   "insensitive": { … },       # plaintext metadata, readable while locked
//!   "sensitive": { nonce, ciphertext } | null,
//!   "createdAt": "…"
//! }
//! ```
//!
//! Fields are only ever added, with `#[serde(default)]`, so records written by
//! older versions keep loading.

pub mod crypto;
pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroize;

pub use crypto::{EncryptedBlob, KdfParams, MasterKey};
pub use service::{VaultRemovedHandler, VaultService, KEY_RING_VAULT_TYPE};

/// Free-form JSON object used for vault metadata.
pub type PlainObject = serde_json::Map<String, Value>;

/// Persisted vault record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: String,
    #[serde(rename = "type")]
    pub vault_type: String,
    #[serde(default)]
    pub insensitive: PlainObject,
    #[serde(default)]
    pub sensitive: Option<EncryptedBlob>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Vault {
    /// String field of the insensitive metadata.
    pub fn insensitive_str(&self, key: &str) -> Option<&str> {
        self.insensitive.get(key).and_then(Value::as_str)
    }
}

/// Decrypted sensitive payload. String values are wiped on drop.
pub struct SensitiveData(PlainObject);

impl SensitiveData {
    pub fn new(object: PlainObject) -> Self {
        Self(object)
    }

    pub fn empty() -> Self {
        Self(PlainObject::new())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_object(&self) -> &PlainObject {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SensitiveData {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            wipe_value(value);
        }
    }
}

fn wipe_value(value: &mut Value) {
    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(wipe_value),
        Value::Object(map) => map.values_mut().for_each(wipe_value),
        _ => {}
    }
}
