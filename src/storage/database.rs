// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded keyring database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `vaults`: vault_id → serialized `VaultRecord`
//! - `keyring_meta`: key → JSON value (vault encryption meta, selected vault)
//! - `token_scans`: vault_id → serialized `Vec<TokenScan>`
//! - `permissions`: vault_id → serialized origin grants
//!
//! Every write commits before returning, so a successful call survives a
//! crash immediately afterwards.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

// =============================================================================
// Table Definitions
// =============================================================================

/// Every keyring table maps a string key to JSON bytes.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Persisted vault records (JSON bytes).
pub const VAULTS: JsonTable = TableDefinition::new("vaults");

/// Keyring-wide metadata: encryption parameters, selected vault id.
pub const KEYRING_META: JsonTable = TableDefinition::new("keyring_meta");

/// Per-vault token scan results.
pub const TOKEN_SCANS: JsonTable = TableDefinition::new("token_scans");

/// Per-vault origin permission grants.
pub const PERMISSIONS: JsonTable = TableDefinition::new("permissions");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DatabaseError>;

/// A JSON value queued for a multi-row write.
pub struct PendingWrite<'a> {
    pub table: JsonTable,
    pub key: &'a str,
    pub value: Vec<u8>,
}

impl<'a> PendingWrite<'a> {
    pub fn json<T: Serialize>(
        table: JsonTable,
        key: &'a str,
        value: &T,
    ) -> DbResult<Self> {
        Ok(Self {
            table,
            key,
            value: serde_json::to_vec(value)?,
        })
    }
}

// =============================================================================
// KeyringDatabase
// =============================================================================

/// Embedded ACID keyring database.
pub struct KeyringDatabase {
    db: Database,
}

impl KeyringDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(VAULTS)?;
            let _ = write_txn.open_table(KEYRING_META)?;
            let _ = write_txn.open_table(TOKEN_SCANS)?;
            let _ = write_txn.open_table(PERMISSIONS)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "Keyring database opened");
        Ok(Self { db })
    }

    /// Read and deserialize a single JSON value.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        key: &str,
    ) -> DbResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Serialize and insert (or replace) a single JSON value.
    pub fn put_json<T: Serialize>(
        &self,
        table: JsonTable,
        key: &str,
        value: &T,
    ) -> DbResult<()> {
        let json = serde_json::to_vec(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(key, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read-modify-write a JSON value inside one write transaction.
    ///
    /// Returns the updated value, or `None` when the key does not exist.
    pub fn update_json<T, F>(&self, table: JsonTable, key: &str, f: F) -> DbResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(table)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = match table.get(key)? {
                Some(existing) => existing.value().to_vec(),
                None => return Ok(None),
            };

            let mut value: T = serde_json::from_slice(&existing_bytes)?;
            f(&mut value);

            let json = serde_json::to_vec(&value)?;
            table.insert(key, json.as_slice())?;
            value
        };
        write_txn.commit()?;
        Ok(Some(updated))
    }

    /// Remove a key. Returns whether it existed.
    pub fn delete(&self, table: JsonTable, key: &str) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(table)?;
            let removed = table.remove(key)?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Load every entry of a table, in key order.
    pub fn list_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
    ) -> DbResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let parsed: T = serde_json::from_slice(value.value())?;
            out.push((key.value().to_string(), parsed));
        }
        Ok(out)
    }

    /// Apply several inserts in one write transaction.
    ///
    /// Either every value lands or none does.
    pub fn put_many(&self, writes: &[PendingWrite<'_>]) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        for write in writes {
            let mut table = write_txn.open_table(write.table)?;
            table.insert(write.key, write.value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drop every row of the given tables in one write transaction.
    pub fn clear_tables(
        &self,
        tables: &[JsonTable],
    ) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        for definition in tables {
            // Deleting and recreating keeps later reads from failing on a missing table
            write_txn.delete_table(*definition)?;
            let _ = write_txn.open_table(*definition)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
