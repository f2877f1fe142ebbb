// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Keyring - Multi-chain Keyring & Signing Core
//!
//! Holds wallet key material in an encrypted vault store and signs for
//! Cosmos, Ethereum, Starknet and Bitcoin chains with mnemonic, private-key
//! or Ledger backends.
//!
//! ## Modules
//!
//! - `vault` - Encrypted vault store with lock/unlock lifecycle
//! - `keyring` - Backends and the `KeyRingService` dispatcher
//! - `ecosystem` - Per-ecosystem key and signing services
//! - `ledger` - Hardware transport seam and the Starknet signing flow
//! - `chains` - Chain registry and per-vault enabled chains
//! - `permission` - Per-vault origin grants
//! - `token_scan` - Balance scans over chains the user has not enabled
//! - `storage` - redb persistence

pub mod chains;
pub mod config;
pub mod crypto;
pub mod ecosystem;
pub mod error;
pub mod keyring;
pub mod ledger;
pub mod logging;
pub mod permission;
pub mod state;
pub mod storage;
pub mod token_scan;
pub mod vault;
