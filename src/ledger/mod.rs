// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger hardware wallet plumbing.
//!
//! The device is reached through a [`LedgerTransport`] obtained from a
//! [`TransportOpener`]; the concrete HID / USB drivers live outside this crate.
//! Every transport is exclusively owned by one attempt and must be closed on
//! every exit path.
//!
//! ## Status codes
//!
//! | Code     | Meaning        | Error                |
//! |----------|----------------|----------------------|
//! | `0x9000` | no error       | -                    |
//! | `0x6e00` | bad CLA        | `FailedGetPublicKey` |
//! | `0x6e01` | bad INS        | `FailedGetPublicKey` |
//! | `0x6e04` | user rejected  | `SignRejected`       |
//! | `0x5515` | device locked  | `DeviceLocked`       |
//! | other    | -              | `FailedSign(msg)`    |

pub mod starknet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::starknet::{Call, Felt};
use crate::keyring::BIP44HDPath;

pub use self::starknet::{
    DeployAccountFields, DeployAccountSignerDetails, DeployAccountSigned, InvokeDetails,
    ResourceBound, ResourceBounds, StarknetFee, StarknetLedgerSigner,
    STARKNET_LEDGER_DERIVATION_PATH,
};

/// Status word reported by a locked device, also found inside transport
/// error messages.
pub const DEVICE_LOCKED_STATUS: u16 = 0x5515;

const DEVICE_LOCKED_SENTINEL: &str = "0x5515";

// =============================================================================
// Errors
// =============================================================================

/// Failure of one hardware signing attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerSignError {
    #[error("failed to init transport")]
    FailedInit,

    #[error("failed to get public key")]
    FailedGetPublicKey,

    #[error("user rejected signing")]
    SignRejected,

    #[error("public key unmatched")]
    PublicKeyUnmatched,

    #[error("device is locked")]
    DeviceLocked,

    #[error("failed to sign: {0}")]
    FailedSign(String),
}

impl LedgerSignError {
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerSignError::FailedInit => "failed_init",
            LedgerSignError::FailedGetPublicKey => "failed_get_public_key",
            LedgerSignError::SignRejected => "sign_rejected",
            LedgerSignError::PublicKeyUnmatched => "public_key_unmatched",
            LedgerSignError::DeviceLocked => "device_locked",
            LedgerSignError::FailedSign(_) => "failed_sign",
        }
    }

    /// Numeric code, stable across releases.
    pub fn code(&self) -> u16 {
        match self {
            LedgerSignError::FailedInit => 1,
            LedgerSignError::FailedGetPublicKey => 2,
            LedgerSignError::SignRejected => 3,
            LedgerSignError::PublicKeyUnmatched => 4,
            LedgerSignError::DeviceLocked => 5,
            LedgerSignError::FailedSign(_) => 6,
        }
    }
}

/// Error raised by the transport layer itself (I/O, APDU framing).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<TransportError> for LedgerSignError {
    fn from(e: TransportError) -> Self {
        if e.message.contains(DEVICE_LOCKED_SENTINEL) {
            LedgerSignError::DeviceLocked
        } else {
            LedgerSignError::FailedSign(e.message)
        }
    }
}

// =============================================================================
// Device responses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerReturnCode {
    NoError,
    BadCla,
    BadIns,
    UserRejected,
    Other(u16),
}

impl LedgerReturnCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            0x9000 => LedgerReturnCode::NoError,
            0x6e00 => LedgerReturnCode::BadCla,
            0x6e01 => LedgerReturnCode::BadIns,
            0x6e04 => LedgerReturnCode::UserRejected,
            other => LedgerReturnCode::Other(other),
        }
    }
}

/// A device answer: status word, optional message and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerResponse<T> {
    pub return_code: u16,
    pub error_message: Option<String>,
    pub payload: T,
}

impl<T> LedgerResponse<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            return_code: 0x9000,
            error_message: None,
            payload,
        }
    }

    pub fn status(return_code: u16, payload: T) -> Self {
        Self {
            return_code,
            error_message: None,
            payload,
        }
    }
}

/// Raw `(r, s)` produced by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

impl RawSignature {
    /// `["0x{r}", "0x{s}"]`, byte-for-byte hex without trimming.
    pub fn to_hex_pair(&self) -> Vec<String> {
        vec![
            format!("0x{}", alloy::hex::encode(&self.r)),
            format!("0x{}", alloy::hex::encode(&self.s)),
        ]
    }
}

/// Map a device status to the payload or a typed error.
///
/// Unrecognized codes never succeed.
pub fn handle_ledger_response<T>(response: LedgerResponse<T>) -> Result<T, LedgerSignError> {
    match LedgerReturnCode::from_status(response.return_code) {
        LedgerReturnCode::NoError => Ok(response.payload),
        LedgerReturnCode::BadCla | LedgerReturnCode::BadIns => {
            Err(LedgerSignError::FailedGetPublicKey)
        }
        LedgerReturnCode::UserRejected => Err(LedgerSignError::SignRejected),
        LedgerReturnCode::Other(DEVICE_LOCKED_STATUS) => Err(LedgerSignError::DeviceLocked),
        LedgerReturnCode::Other(code) => {
            warn!(status = code, "Ledger returned an error status");
            Err(LedgerSignError::FailedSign(
                response
                    .error_message
                    .unwrap_or_else(|| "Failed to sign".to_string()),
            ))
        }
    }
}

// =============================================================================
// Apps
// =============================================================================

/// Ledger application a public key was read from. The string form is the
/// key under which the vault records that app's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerApp {
    Cosmos,
    Terra,
    Secret,
    Ethereum,
    Bitcoin,
    #[serde(rename = "Bitcoin Test")]
    BitcoinTest,
    Starknet,
}

impl LedgerApp {
    pub const ALL: [LedgerApp; 7] = [
        LedgerApp::Cosmos,
        LedgerApp::Terra,
        LedgerApp::Secret,
        LedgerApp::Ethereum,
        LedgerApp::Bitcoin,
        LedgerApp::BitcoinTest,
        LedgerApp::Starknet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerApp::Cosmos => "Cosmos",
            LedgerApp::Terra => "Terra",
            LedgerApp::Secret => "Secret",
            LedgerApp::Ethereum => "Ethereum",
            LedgerApp::Bitcoin => "Bitcoin",
            LedgerApp::BitcoinTest => "Bitcoin Test",
            LedgerApp::Starknet => "Starknet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|app| app.as_str() == name)
    }

    /// BIP-43 purposes the app holds accounts under, primary first. Bitcoin
    /// apps keep native segwit (84) and taproot (86) accounts apart.
    pub fn purposes(&self) -> &'static [u32] {
        match self {
            LedgerApp::Bitcoin | LedgerApp::BitcoinTest => &[84, 86],
            _ => &[44],
        }
    }

    pub fn primary_purpose(&self) -> u32 {
        self.purposes()[0]
    }

    /// Derivation path of the app's primary account for a BIP-44 branch.
    pub fn derivation_path(&self, path: &BIP44HDPath) -> String {
        self.derivation_path_with_purpose(self.primary_purpose(), path)
    }

    /// Derivation path under `purpose`. Starknet uses a fixed EIP-2645 path
    /// and ignores both arguments.
    pub fn derivation_path_with_purpose(&self, purpose: u32, path: &BIP44HDPath) -> String {
        let coin_type = match self {
            LedgerApp::Cosmos => 118,
            LedgerApp::Terra => 330,
            LedgerApp::Secret => 529,
            LedgerApp::Ethereum => 60,
            LedgerApp::Bitcoin => 0,
            LedgerApp::BitcoinTest => 1,
            LedgerApp::Starknet => return STARKNET_LEDGER_DERIVATION_PATH.to_string(),
        };
        format!(
            "m/{purpose}'/{coin_type}'/{}'/{}/{}",
            path.account, path.change, path.address_index
        )
    }
}

// =============================================================================
// Transport seam
// =============================================================================

/// Physical transport, chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Hid,
    Usb,
}

/// One open device connection.
#[async_trait]
pub trait LedgerTransport: Send {
    async fn get_public_key(
        &mut self,
        app: LedgerApp,
        path: &str,
    ) -> Result<LedgerResponse<Vec<u8>>, TransportError>;

    async fn sign_deploy_account(
        &mut self,
        path: &str,
        fields: &DeployAccountFields,
    ) -> Result<LedgerResponse<RawSignature>, TransportError>;

    async fn sign_invoke(
        &mut self,
        path: &str,
        calls: &[Call],
        details: &InvokeDetails,
    ) -> Result<LedgerResponse<RawSignature>, TransportError>;

    async fn sign_message(
        &mut self,
        path: &str,
        typed_data: &serde_json::Value,
        signer: &Felt,
    ) -> Result<LedgerResponse<RawSignature>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(&self, kind: TransportKind) -> Result<Box<dyn LedgerTransport>, TransportError>;
}

/// Opener for hosts without a device driver; every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeviceOpener;

#[async_trait]
impl TransportOpener for NoDeviceOpener {
    async fn open(&self, kind: TransportKind) -> Result<Box<dyn LedgerTransport>, TransportError> {
        Err(TransportError::new(format!("no {kind:?} transport available")))
    }
}

/// Open a transport, read one app's public key at `derivation_path`, close.
pub async fn read_app_public_key(
    opener: &dyn TransportOpener,
    kind: TransportKind,
    app: LedgerApp,
    derivation_path: &str,
) -> Result<Vec<u8>, LedgerSignError> {
    let mut transport = opener.open(kind).await.map_err(|e| {
        warn!(error = %e, "Failed to open ledger transport");
        LedgerSignError::FailedInit
    })?;

    let result = match transport.get_public_key(app, derivation_path).await {
        Ok(response) => handle_ledger_response(response),
        Err(e) => Err(e.into()),
    };

    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to close ledger transport");
    }
    result
}

// =============================================================================
// Test transport
// =============================================================================


#[cfg(test)]
mod tests {
    use super::fake::FakeDevice;
    use super::*;

    #[test]
    fn status_code_policy() {
        assert_eq!(handle_ledger_response(LedgerResponse::ok(7)), Ok(7));
        assert_eq!(
            handle_ledger_response(LedgerResponse::status(0x6e00, ())),
            Err(LedgerSignError::FailedGetPublicKey)
        );
        assert_eq!(
            handle_ledger_response(LedgerResponse::status(0x6e01, ())),
            Err(LedgerSignError::FailedGetPublicKey)
        );
        assert_eq!(
            handle_ledger_response(LedgerResponse::status(0x6e04, ())),
            Err(LedgerSignError::SignRejected)
        );
        assert_eq!(
            handle_ledger_response(LedgerResponse::status(DEVICE_LOCKED_STATUS, ())),
            Err(LedgerSignError::DeviceLocked)
        );
    }

    #[test]
    fn unknown_status_never_succeeds() {
        let response = LedgerResponse {
            return_code: 0x6a80,
            error_message: Some("Invalid data".to_string()),
            payload: (),
        };
        assert_eq!(
            handle_ledger_response(response),
            Err(LedgerSignError::FailedSign("Invalid data".to_string()))
        );
        assert_eq!(
            handle_ledger_response(LedgerResponse::status(0x6f00, ())),
            Err(LedgerSignError::FailedSign("Failed to sign".to_string()))
        );
    }

    #[test]
    fn transport_errors_detect_locked_device() {
        let locked: LedgerSignError =
            TransportError::new("Ledger device: UNKNOWN_ERROR (0x5515)").into();
        assert_eq!(locked, LedgerSignError::DeviceLocked);

        let other: LedgerSignError = TransportError::new("disconnected").into();
        assert_eq!(other, LedgerSignError::FailedSign("disconnected".to_string()));
        assert_eq!(other.error_code(), "failed_sign");
        assert_eq!(LedgerSignError::SignRejected.code(), 3);
    }

    #[test]
    fn app_names_and_paths() {
        assert_eq!(LedgerApp::from_name("Bitcoin Test"), Some(LedgerApp::BitcoinTest));
        assert_eq!(LedgerApp::from_name("Unknown"), None);

        let path = BIP44HDPath {
            account: 1,
            change: 0,
            address_index: 2,
        };
        assert_eq!(LedgerApp::Cosmos.derivation_path(&path), "m/44'/118'/1'/0/2");
        assert_eq!(LedgerApp::Bitcoin.derivation_path(&path), "m/84'/0'/1'/0/2");
        assert_eq!(
            LedgerApp::Bitcoin.derivation_path_with_purpose(86, &path),
            "m/86'/0'/1'/0/2"
        );
        assert_eq!(
            LedgerApp::BitcoinTest.derivation_path_with_purpose(86, &path),
            "m/86'/1'/1'/0/2"
        );
        assert_eq!(LedgerApp::Cosmos.purposes(), &[44]);
        assert_eq!(
            LedgerApp::Starknet.derivation_path(&path),
            STARKNET_LEDGER_DERIVATION_PATH
        );
    }

    #[test]
    fn raw_signature_hex_keeps_leading_zeros() {
        let signature = RawSignature {
            r: vec![0x00, 0x01],
            s: vec![0xff],
        };
        assert_eq!(signature.to_hex_pair(), vec!["0x0001", "0xff"]);
    }

    #[tokio::test]
    async fn read_public_key_closes_transport() {
        let device = FakeDevice::new(LedgerApp::Cosmos, vec![0x02; 33]);
        let key = read_app_public_key(
            &device,
            TransportKind::Usb,
            LedgerApp::Cosmos,
            "m/44'/118'/0'/0/0",
        )
        .await
        .unwrap();
        assert_eq!(key, vec![0x02; 33]);
        assert_eq!(device.log.closed(), 1);
        assert_eq!(device.log.pub_key_paths(), vec!["m/44'/118'/0'/0/0"]);

        let err = read_app_public_key(
            &device,
            TransportKind::Usb,
            LedgerApp::Ethereum,
            "m/44'/118'/0'/0/0",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerSignError::FailedSign(_)));
        assert_eq!(device.log.closed(), 2);
    }

    #[tokio::test]
    async fn open_failure_is_failed_init() {
        let mut device = FakeDevice::new(LedgerApp::Cosmos, vec![0x02; 33]);
        device.fail_open = true;
        let err = read_app_public_key(
            &device,
            TransportKind::Hid,
            LedgerApp::Cosmos,
            "m/44'/118'/0'/0/0",
        )
        .await
        .unwrap_err();
        assert_eq!(err, LedgerSignError::FailedInit);
        assert_eq!(device.log.closed(), 0);
    }
}
