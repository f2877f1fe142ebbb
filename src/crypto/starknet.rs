// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Starknet primitives.
//!
//! Contract-address and transaction-hash computation must match the
//! sequencer bit for bit: an address computed with the wrong field order is
//! unrecoverable once funds are sent to it.

use alloy::primitives::keccak256;
pub use starknet_crypto::Felt;
use starknet_crypto::pedersen_hash;

use crate::error::{KeyRingError, KeyRingResult};

/// `'STARKNET_CONTRACT_ADDRESS'` as a short string.
const CONTRACT_ADDRESS_PREFIX: [u8; 32] = short_string_bytes(b"STARKNET_CONTRACT_ADDRESS");

/// `2**251 - 256`
const ADDR_BOUND: [u8; 32] = {
    let mut bound = [0xffu8; 32];
    bound[0] = 0x07;
    bound[31] = 0x00;
    bound
};

const INVOKE_PREFIX: [u8; 32] = short_string_bytes(b"invoke");
const DEPLOY_ACCOUNT_PREFIX: [u8; 32] = short_string_bytes(b"deploy_account");

const fn short_string_bytes(s: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let offset = 32 - s.len();
    let mut i = 0;
    while i < s.len() {
        out[offset + i] = s[i];
        i += 1;
    }
    out
}

/// Public key used for Starknet accounts: `0x04 || x || y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubKeyStarknet {
    bytes: [u8; 65],
}

/// Public-key coordinates split into 128-bit limbs, as the account
/// constructor expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarknetAddressParams {
    pub x_low: Felt,
    pub x_high: Felt,
    pub y_low: Felt,
    pub y_high: Felt,
}

impl PubKeyStarknet {
    /// Accepts `0x04 || x || y` or bare `x || y`.
    pub fn from_bytes(bytes: &[u8]) -> KeyRingResult<Self> {
        let mut out = [0u8; 65];
        match bytes.len() {
            65 if bytes[0] == 0x04 => out.copy_from_slice(bytes),
            64 => {
                out[0] = 0x04;
                out[1..].copy_from_slice(bytes);
            }
            len => {
                return Err(KeyRingError::InvalidKey(format!(
                    "invalid Starknet public key length {len}"
                )))
            }
        }
        Ok(Self { bytes: out })
    }

    pub fn from_hex(hex: &str) -> KeyRingResult<Self> {
        let bytes = alloy::hex::decode(hex).map_err(|e| KeyRingError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        self.bytes
    }

    pub fn to_hex(&self) -> String {
        alloy::hex::encode(self.bytes)
    }

    pub fn x(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.bytes[1..33]);
        x
    }

    pub fn y(&self) -> [u8; 32] {
        let mut y = [0u8; 32];
        y.copy_from_slice(&self.bytes[33..65]);
        y
    }

    pub fn address_params(&self) -> StarknetAddressParams {
        let (x_high, x_low) = split_u256(&self.x());
        let (y_high, y_low) = split_u256(&self.y());
        StarknetAddressParams {
            x_low,
            x_high,
            y_low,
            y_high,
        }
    }

    /// Counterfactual account address: salt is `x_low`, constructor calldata
    /// is `[x_low, x_high, y_low, y_high]`, deployer is zero.
    pub fn compute_address(&self, class_hash: &Felt) -> Felt {
        let params = self.address_params();
        calculate_contract_address_from_hash(
            &params.x_low,
            class_hash,
            &params.constructor_calldata(),
            &Felt::ZERO,
        )
    }
}

impl StarknetAddressParams {
    pub fn constructor_calldata(&self) -> [Felt; 4] {
        [self.x_low, self.x_high, self.y_low, self.y_high]
    }
}

/// Split a big-endian u256 into `(high, low)` 128-bit felts.
pub fn split_u256(bytes: &[u8; 32]) -> (Felt, Felt) {
    let mut high = [0u8; 16];
    let mut low = [0u8; 16];
    high.copy_from_slice(&bytes[..16]);
    low.copy_from_slice(&bytes[16..]);
    (
        Felt::from(u128::from_be_bytes(high)),
        Felt::from(u128::from_be_bytes(low)),
    )
}

/// Pedersen chain `h(h(h(0, a0), a1), …, n)`.
pub fn compute_hash_on_elements(data: &[Felt]) -> Felt {
    let acc = data
        .iter()
        .fold(Felt::ZERO, |acc, element| pedersen_hash(&acc, element));
    pedersen_hash(&acc, &Felt::from(data.len() as u64))
}

/// Same as the sequencer's `calculate_contract_address_from_hash`.
pub fn calculate_contract_address_from_hash(
    salt: &Felt,
    class_hash: &Felt,
    constructor_calldata: &[Felt],
    deployer_address: &Felt,
) -> Felt {
    let calldata_hash = compute_hash_on_elements(constructor_calldata);
    let hash = compute_hash_on_elements(&[
        Felt::from_bytes_be(&CONTRACT_ADDRESS_PREFIX),
        *deployer_address,
        *salt,
        *class_hash,
        calldata_hash,
    ]);
    normalize_address(hash)
}

/// Reduce modulo `ADDR_BOUND`. Field elements are below `2 * ADDR_BOUND`,
/// so one subtraction suffices.
fn normalize_address(value: Felt) -> Felt {
    let bound = Felt::from_bytes_be(&ADDR_BOUND);
    if value.to_bytes_be() >= ADDR_BOUND {
        value - bound
    } else {
        value
    }
}

/// Encode up to 31 ASCII characters as a felt.
pub fn encode_short_string(s: &str) -> KeyRingResult<Felt> {
    if !s.is_ascii() || s.len() > 31 {
        return Err(KeyRingError::InvalidArgument(format!(
            "'{s}' is not a valid Cairo short string"
        )));
    }
    let mut bytes = [0u8; 32];
    bytes[32 - s.len()..].copy_from_slice(s.as_bytes());
    Ok(Felt::from_bytes_be(&bytes))
}

/// `starknet:SN_MAIN` → `'SN_MAIN'`
pub fn chain_id_felt(chain_id: &str) -> KeyRingResult<Felt> {
    encode_short_string(chain_id.strip_prefix("starknet:").unwrap_or(chain_id))
}

/// `starknet_keccak(name)`: keccak256 truncated to 250 bits.
pub fn get_selector_from_name(name: &str) -> Felt {
    let mut hash = keccak256(name.as_bytes()).0;
    hash[0] &= 0x03;
    Felt::from_bytes_be(&hash)
}

/// Parse `0x`-prefixed (or bare) hex of up to 64 digits.
pub fn felt_from_hex(hex: &str) -> KeyRingResult<Felt> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    if digits.is_empty() || digits.len() > 64 {
        return Err(KeyRingError::InvalidArgument(format!("{hex} is not a felt")));
    }
    let padded = format!("{digits:0>64}");
    let mut bytes = [0u8; 32];
    alloy::hex::decode_to_slice(&padded, &mut bytes)
        .map_err(|e| KeyRingError::InvalidArgument(format!("{hex}: {e}")))?;
    Ok(Felt::from_bytes_be(&bytes))
}

/// Minimal `0x`-prefixed lowercase hex.
pub fn felt_to_hex(felt: &Felt) -> String {
    let encoded = alloy::hex::encode(felt.to_bytes_be());
    let trimmed = encoded.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{trimmed}")
    }
}

/// Zero-padded 64-digit hex, as the account contract reports addresses.
pub fn felt_to_padded_hex(felt: &Felt) -> String {
    format!("0x{}", alloy::hex::encode(felt.to_bytes_be()))
}

/// One contract call inside an invoke transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub contract_address: Felt,
    pub entrypoint: String,
    pub calldata: Vec<Felt>,
}

/// Cairo 1 `__execute__` calldata:
/// `[n, (to, selector, len, ...calldata)*]`.
pub fn compile_execute_calldata(calls: &[Call]) -> Vec<Felt> {
    let mut out = vec![Felt::from(calls.len() as u64)];
    for call in calls {
        out.push(call.contract_address);
        out.push(get_selector_from_name(&call.entrypoint));
        out.push(Felt::from(call.calldata.len() as u64));
        out.extend_from_slice(&call.calldata);
    }
    out
}

/// Version 1 invoke transaction hash.
pub fn invoke_v1_transaction_hash(
    sender_address: &Felt,
    calldata: &[Felt],
    max_fee: &Felt,
    chain_id: &Felt,
    nonce: &Felt,
) -> Felt {
    compute_hash_on_elements(&[
        Felt::from_bytes_be(&INVOKE_PREFIX),
        Felt::ONE,
        *sender_address,
        Felt::ZERO,
        compute_hash_on_elements(calldata),
        *max_fee,
        *chain_id,
        *nonce,
    ])
}

/// Version 1 deploy-account transaction hash.
#[allow(clippy::too_many_arguments)]
pub fn deploy_account_v1_transaction_hash(
    contract_address: &Felt,
    class_hash: &Felt,
    salt: &Felt,
    constructor_calldata: &[Felt],
    max_fee: &Felt,
    chain_id: &Felt,
    nonce: &Felt,
) -> Felt {
    let mut deploy_data = Vec::with_capacity(constructor_calldata.len() + 2);
    deploy_data.push(*class_hash);
    deploy_data.push(*salt);
    deploy_data.extend_from_slice(constructor_calldata);

    compute_hash_on_elements(&[
        Felt::from_bytes_be(&DEPLOY_ACCOUNT_PREFIX),
        Felt::ONE,
        *contract_address,
        Felt::ZERO,
        compute_hash_on_elements(&deploy_data),
        *max_fee,
        *chain_id,
        *nonce,
    ])
}
