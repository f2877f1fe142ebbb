// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Auto Lock
//!
//! Background task that locks the keyring after a period without activity.
//! Activity is whatever calls [`KeyRingService::touch`]: unlocking, creating
//! a key ring, or the host reporting user interaction.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; the loop exits as soon as the
//! token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{KeyRingService, KeyRingStatus};

/// Upper bound between idle checks.
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(10);

pub struct AutoLocker {
    key_ring: Arc<KeyRingService>,
    timeout: Duration,
    check_interval: Duration,
}

impl AutoLocker {
    /// A zero `timeout` disables locking; [`AutoLocker::run`] then returns
    /// immediately.
    pub fn new(key_ring: Arc<KeyRingService>, timeout: Duration) -> Self {
        let check_interval = (timeout / 4).clamp(Duration::from_millis(10), MAX_CHECK_INTERVAL);
        Self {
            key_ring,
            timeout,
            check_interval,
        }
    }

    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(locker.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        if self.timeout.is_zero() {
            info!("Auto lock disabled");
            return;
        }
        info!(timeout_secs = self.timeout.as_secs(), "Auto lock starting");

        loop {
            if shutdown.is_cancelled() {
                info!("Auto lock shutting down");
                return;
            }

            self.lock_if_idle();

            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Auto lock shutting down");
                    return;
                }
            }
        }
    }

    /// Lock when unlocked and idle past the timeout. Returns whether it locked.
    pub fn lock_if_idle(&self) -> bool {
        match self.key_ring.key_ring_status() {
            Ok(KeyRingStatus::Unlocked) => {}
            Ok(_) => return false,
            Err(e) => {
                warn!(error = %e, "Auto lock: failed to read key ring status");
                return false;
            }
        }

        let idle = self.key_ring.idle_for();
        if idle < self.timeout {
            return false;
        }
        match self.key_ring.lock() {
            Ok(()) => {
                info!(idle_secs = idle.as_secs(), "Auto lock: key ring locked");
                true
            }
            Err(e) => {
                warn!(error = %e, "Auto lock: failed to lock key ring");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::fixtures::cosmos_chain;
    use crate::crypto::PrivKeySecp256k1;
    use crate::keyring::mnemonic::ABANDON;
    use crate::keyring::service::test_support::{harness, PASSWORD};
    use crate::keyring::BIP44HDPath;
    use crate::ledger::fake::FakeDevice;
    use crate::ledger::LedgerApp;

    fn setup() -> crate::keyring::service::test_support::Harness {
        let key = PrivKeySecp256k1::from_bytes(&[9; 32]).unwrap().pub_key();
        let h = harness(
            vec![cosmos_chain("cosmoshub-4", "cosmos", 118)],
            FakeDevice::new(LedgerApp::Cosmos, key.to_bytes()),
        );
        h.service
            .create_mnemonic_key_ring(ABANDON, BIP44HDPath::default(), "main", Some(PASSWORD))
            .unwrap();
        h
    }

    #[test]
    fn locks_only_after_timeout() {
        let h = setup();
        let locker = AutoLocker::new(h.service.clone(), Duration::from_secs(3600));
        assert!(!locker.lock_if_idle());
        assert_eq!(h.state.status(), KeyRingStatus::Unlocked);

        let locker = AutoLocker::new(h.service.clone(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(locker.lock_if_idle());
        assert_eq!(h.state.status(), KeyRingStatus::Locked);
        // Already locked.
        assert!(!locker.lock_if_idle());
    }

    #[tokio::test]
    async fn loop_locks_and_stops_on_cancel() {
        let h = setup();
        let shutdown = CancellationToken::new();
        let locker = AutoLocker::new(h.service.clone(), Duration::from_millis(20));
        let task = tokio::spawn(locker.run(shutdown.clone()));

        let mut rx = h.service.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.status == KeyRingStatus::Locked),
        )
        .await
        .unwrap()
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn zero_timeout_is_disabled() {
        let h = setup();
        let locker = AutoLocker::new(h.service.clone(), Duration::ZERO);
        locker.run(CancellationToken::new()).await;
        assert_eq!(h.state.status(), KeyRingStatus::Unlocked);
    }
}
