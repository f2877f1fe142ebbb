// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance lookups behind a pluggable trait.
//!
//! The scanner only derives addresses and interprets results; talking to
//! LCD, JSON-RPC or Esplora endpoints is left to the embedding application.

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chains::{BitcoinChainInfo, CosmosChainInfo, EvmInfo, StarknetChainInfo};
use crate::crypto::starknet::{Call, Felt};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("balance request failed: {0}")]
    Request(String),

    #[error("invalid balance response: {0}")]
    InvalidResponse(String),

    #[error("no balance source configured")]
    Unavailable,
}

/// Cosmos SDK bank balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Esplora `chain_stats` of an address, in satoshis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressChainStats {
    pub funded_txo_sum: u64,
    pub spent_txo_sum: u64,
}

#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    /// All bank balances of a bech32 address.
    async fn cosmos_balances(
        &self,
        chain_id: &str,
        chain: &CosmosChainInfo,
        bech32_address: &str,
    ) -> Result<Vec<Coin>, FetchError>;

    /// Native balance in wei.
    async fn evm_balance(&self, chain_id: &str, evm: &EvmInfo, hex_address: &str) -> Result<U256, FetchError>;

    /// Read-only contract call; returns the raw result felts.
    async fn starknet_call(
        &self,
        chain_id: &str,
        chain: &StarknetChainInfo,
        call: &Call,
    ) -> Result<Vec<Felt>, FetchError>;

    async fn bitcoin_address_stats(
        &self,
        chain_id: &str,
        chain: &BitcoinChainInfo,
        address: &str,
    ) -> Result<AddressChainStats, FetchError>;
}

/// Fetcher for deployments without a balance source. Every lookup fails,
/// so scans report each chain as a failure and cache nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableFetcher;

#[async_trait]
impl BalanceFetcher for UnavailableFetcher {
    async fn cosmos_balances(&self, _: &str, _: &CosmosChainInfo, _: &str) -> Result<Vec<Coin>, FetchError> {
        Err(FetchError::Unavailable)
    }

    async fn evm_balance(&self, _: &str, _: &EvmInfo, _: &str) -> Result<U256, FetchError> {
        Err(FetchError::Unavailable)
    }

    async fn starknet_call(&self, _: &str, _: &StarknetChainInfo, _: &Call) -> Result<Vec<Felt>, FetchError> {
        Err(FetchError::Unavailable)
    }

    async fn bitcoin_address_stats(
        &self,
        _: &str,
        _: &BitcoinChainInfo,
        _: &str,
    ) -> Result<AddressChainStats, FetchError> {
        Err(FetchError::Unavailable)
    }
}
