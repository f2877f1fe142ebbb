// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Keyring Storage Module
//!
//! Persistent storage for the keyring, kept in a single redb database under
//! the configured data directory.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   keyring.redb    # vaults, keyring meta, token scans, permissions
//! ```
//!
//! ## Important Notes
//!
//! - Sensitive vault payloads are encrypted by the vault layer before they
//!   reach this module; storage only ever sees ciphertext for them
//! - Insensitive metadata is stored as plain JSON

pub mod database;
pub mod paths;

pub use database::{
    DatabaseError, DbResult, JsonTable, KeyringDatabase, PendingWrite, KEYRING_META, PERMISSIONS,
    TOKEN_SCANS, VAULTS,
};
pub use paths::StoragePaths;
