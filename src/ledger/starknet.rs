// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Foreground Starknet signing on a Ledger device.
//!
//! Each attempt walks `Disconnected → TransportOpen → PubKeyVerified →
//! Signing → Closed` on a single transport. A device whose public key differs
//! from the vault's recorded key is rejected before anything is sent for
//! signing. No step is retried; callers restart from `Disconnected`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    handle_ledger_response, LedgerApp, LedgerSignError, LedgerTransport, RawSignature,
    TransportKind, TransportOpener,
};
use crate::crypto::starknet::{calculate_contract_address_from_hash, chain_id_felt, Call, Felt};
use crate::crypto::PubKeyStarknet;
use crate::error::KeyRingResult;

/// EIP-2645 path of the Starknet app account.
pub const STARKNET_LEDGER_DERIVATION_PATH: &str = "m/2645'/1195502025'/1148870696'/0'/0'/0";

// =============================================================================
// Transaction fields
// =============================================================================

/// Fee of a deploy-account transaction. ETH selects V1, STRK selects V3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StarknetFee {
    Eth { max_fee: Felt },
    Strk { gas: Felt, max_gas_price: Felt },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBound {
    pub max_amount: Felt,
    pub max_price_per_unit: Felt,
}

impl ResourceBound {
    pub const ZERO: ResourceBound = ResourceBound {
        max_amount: Felt::ZERO,
        max_price_per_unit: Felt::ZERO,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBounds {
    pub l1_gas: ResourceBound,
    pub l2_gas: ResourceBound,
}

impl ResourceBounds {
    pub const ZERO: ResourceBounds = ResourceBounds {
        l1_gas: ResourceBound::ZERO,
        l2_gas: ResourceBound::ZERO,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAvailabilityMode {
    L1,
    L2,
}

/// What the caller wants deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAccountPayload {
    pub class_hash: Felt,
    pub constructor_calldata: Vec<Felt>,
    pub address_salt: Felt,
    /// Computed from the other fields when absent.
    pub contract_address: Option<Felt>,
}

/// Deploy-account fields sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAccountFields {
    pub class_hash: Felt,
    pub constructor_calldata: Vec<Felt>,
    pub contract_address: Felt,
    pub contract_address_salt: Felt,
    pub nonce: Felt,
    pub chain_id: Felt,
    pub fee: StarknetFee,
}

/// The transaction the signature commits to, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAccountSignerDetails {
    pub class_hash: Felt,
    pub constructor_calldata: Vec<Felt>,
    pub contract_address: Felt,
    pub address_salt: Felt,
    pub version: Felt,
    pub nonce: Felt,
    pub chain_id: Felt,
    pub max_fee: Option<Felt>,
    pub resource_bounds: ResourceBounds,
    pub tip: Felt,
    pub paymaster_data: Vec<Felt>,
    pub account_deployment_data: Vec<Felt>,
    pub nonce_data_availability_mode: DataAvailabilityMode,
    pub fee_data_availability_mode: DataAvailabilityMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAccountSigned {
    pub transaction: DeployAccountSignerDetails,
    pub signature: Vec<String>,
}

/// Invoke signer details, by transaction version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeDetails {
    V1 {
        wallet_address: Felt,
        chain_id: Felt,
        nonce: Felt,
        max_fee: Felt,
    },
    V3 {
        wallet_address: Felt,
        chain_id: Felt,
        nonce: Felt,
        tip: Felt,
        resource_bounds: ResourceBounds,
        paymaster_data: Vec<Felt>,
        nonce_data_availability_mode: DataAvailabilityMode,
        fee_data_availability_mode: DataAvailabilityMode,
        account_deployment_data: Vec<Felt>,
    },
}

impl DeployAccountFields {
    fn signer_details(&self) -> DeployAccountSignerDetails {
        let (version, max_fee, resource_bounds) = match &self.fee {
            StarknetFee::Eth { max_fee } => (Felt::ONE, Some(*max_fee), ResourceBounds::ZERO),
            StarknetFee::Strk { gas, max_gas_price } => (
                Felt::THREE,
                None,
                ResourceBounds {
                    l1_gas: ResourceBound {
                        max_amount: *gas,
                        max_price_per_unit: *max_gas_price,
                    },
                    l2_gas: ResourceBound::ZERO,
                },
            ),
        };
        DeployAccountSignerDetails {
            class_hash: self.class_hash,
            constructor_calldata: self.constructor_calldata.clone(),
            contract_address: self.contract_address,
            address_salt: self.contract_address_salt,
            version,
            nonce: self.nonce,
            chain_id: self.chain_id,
            max_fee,
            resource_bounds,
            tip: Felt::ZERO,
            paymaster_data: Vec::new(),
            account_deployment_data: Vec::new(),
            nonce_data_availability_mode: DataAvailabilityMode::L1,
            fee_data_availability_mode: DataAvailabilityMode::L1,
        }
    }
}

// =============================================================================
// Session state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSessionState {
    Disconnected,
    TransportOpen,
    PubKeyVerified,
    Signing,
    Closed,
}

enum SignRequest<'a> {
    DeployAccount(&'a DeployAccountFields),
    Invoke {
        calls: &'a [Call],
        details: &'a InvokeDetails,
    },
    Message {
        typed_data: &'a serde_json::Value,
        signer: &'a Felt,
    },
}

/// One open transport. `close` consumes the session, so a transport can
/// only be released once.
struct LedgerSession {
    transport: Box<dyn LedgerTransport>,
    state: LedgerSessionState,
}

impl LedgerSession {
    async fn open(opener: &dyn TransportOpener, kind: TransportKind) -> Result<Self, LedgerSignError> {
        let transport = opener.open(kind).await.map_err(|e| {
            warn!(error = %e, transport = ?kind, "Failed to open ledger transport");
            LedgerSignError::FailedInit
        })?;
        let mut session = Self {
            transport,
            state: LedgerSessionState::Disconnected,
        };
        session.transition(LedgerSessionState::TransportOpen);
        Ok(session)
    }

    fn transition(&mut self, next: LedgerSessionState) {
        debug!(from = ?self.state, to = ?next, "Ledger session transition");
        self.state = next;
    }

    async fn verify_pub_key(&mut self, expected: &PubKeyStarknet) -> Result<(), LedgerSignError> {
        let response = self
            .transport
            .get_public_key(LedgerApp::Starknet, STARKNET_LEDGER_DERIVATION_PATH)
            .await?;
        let device_key = handle_ledger_response(response)?;
        let device_key =
            PubKeyStarknet::from_bytes(&device_key).map_err(|_| LedgerSignError::FailedGetPublicKey)?;

        if device_key.to_bytes() != expected.to_bytes() {
            warn!("Ledger public key does not match the vault");
            return Err(LedgerSignError::PublicKeyUnmatched);
        }
        self.transition(LedgerSessionState::PubKeyVerified);
        Ok(())
    }

    async fn sign(&mut self, request: SignRequest<'_>) -> Result<RawSignature, LedgerSignError> {
        if self.state != LedgerSessionState::PubKeyVerified {
            return Err(LedgerSignError::FailedSign(
                "device public key was not verified".to_string(),
            ));
        }
        self.transition(LedgerSessionState::Signing);

        let path = STARKNET_LEDGER_DERIVATION_PATH;
        let response = match request {
            SignRequest::DeployAccount(fields) => {
                self.transport.sign_deploy_account(path, fields).await?
            }
            SignRequest::Invoke { calls, details } => {
                self.transport.sign_invoke(path, calls, details).await?
            }
            SignRequest::Message { typed_data, signer } => {
                self.transport.sign_message(path, typed_data, signer).await?
            }
        };
        handle_ledger_response(response)
    }

    async fn close(mut self) -> LedgerSessionState {
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close ledger transport");
        }
        self.transition(LedgerSessionState::Closed);
        self.state
    }
}

// =============================================================================
// Signer
// =============================================================================

pub struct StarknetLedgerSigner {
    opener: Arc<dyn TransportOpener>,
    kind: TransportKind,
}

impl StarknetLedgerSigner {
    pub fn new(opener: Arc<dyn TransportOpener>, kind: TransportKind) -> Self {
        Self { opener, kind }
    }

    /// Sign the account's deploy transaction. Nonce is always zero.
    pub async fn sign_deploy_account(
        &self,
        chain_id: &str,
        expected_pub_key: &PubKeyStarknet,
        payload: DeployAccountPayload,
        fee: StarknetFee,
    ) -> KeyRingResult<DeployAccountSigned> {
        let contract_address = payload.contract_address.unwrap_or_else(|| {
            calculate_contract_address_from_hash(
                &payload.address_salt,
                &payload.class_hash,
                &payload.constructor_calldata,
                &Felt::ZERO,
            )
        });
        let fields = DeployAccountFields {
            class_hash: payload.class_hash,
            constructor_calldata: payload.constructor_calldata,
            contract_address,
            contract_address_salt: payload.address_salt,
            nonce: Felt::ZERO,
            chain_id: chain_id_felt(chain_id)?,
            fee,
        };

        let signature = self
            .run(expected_pub_key, SignRequest::DeployAccount(&fields))
            .await?;
        info!(chain_id = %chain_id, "Ledger signed deploy-account transaction");
        Ok(DeployAccountSigned {
            transaction: fields.signer_details(),
            signature: signature.to_hex_pair(),
        })
    }

    pub async fn sign_invoke(
        &self,
        expected_pub_key: &PubKeyStarknet,
        calls: &[Call],
        details: &InvokeDetails,
    ) -> KeyRingResult<Vec<String>> {
        let signature = self
            .run(expected_pub_key, SignRequest::Invoke { calls, details })
            .await?;
        Ok(signature.to_hex_pair())
    }

    pub async fn sign_message(
        &self,
        expected_pub_key: &PubKeyStarknet,
        typed_data: &serde_json::Value,
        signer: &Felt,
    ) -> KeyRingResult<Vec<String>> {
        let signature = self
            .run(expected_pub_key, SignRequest::Message { typed_data, signer })
            .await?;
        Ok(signature.to_hex_pair())
    }

    async fn run(
        &self,
        expected_pub_key: &PubKeyStarknet,
        request: SignRequest<'_>,
    ) -> Result<RawSignature, LedgerSignError> {
        let mut session = LedgerSession::open(self.opener.as_ref(), self.kind).await?;

        let result = async {
            session.verify_pub_key(expected_pub_key).await?;
            session.sign(request).await
        }
        .await;

        session.close().await;
        if let Err(e) = &result {
            warn!(error_code = e.error_code(), "Ledger signing failed");
        }
        result
    }
}
