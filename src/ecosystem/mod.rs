// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ecosystem Key Services
//!
//! Turn the dispatcher's raw public keys and signatures into each
//! ecosystem's native encoding.
//!
//! | Service                    | Address                                   |
//! |----------------------------|-------------------------------------------|
//! | [`KeyRingCosmosService`]   | bech32 of `hash160` or the Ethereum address |
//! | [`KeyRingEthereumService`] | EIP-55 hex                                |
//! | [`KeyRingStarknetService`] | account deployment address                |
//! | [`KeyRingBitcoinService`]  | P2WPKH / P2TR by payment type             |

pub mod bitcoin;
pub mod cosmos;
pub mod ethereum;
pub mod starknet;

pub use bitcoin::{BitcoinKey, KeyRingBitcoinService};
pub use cosmos::{CoinTypeAddress, CosmosKey, KeyRingCosmosService, StdSignature};
pub use ethereum::{EthereumKey, KeyRingEthereumService};
pub use starknet::{KeyRingStarknetService, SignedInvoke, StarknetKey};
