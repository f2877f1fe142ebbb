// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyring daemon: opens the data directory, restores the keyring and runs
//! the auto-lock loop until interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relational_keyring::config::KeyringConfig;
use relational_keyring::keyring::AutoLocker;
use relational_keyring::ledger::NoDeviceOpener;
use relational_keyring::logging::init_tracing;
use relational_keyring::state::AppState;
use relational_keyring::token_scan::UnavailableFetcher;

#[tokio::main]
async fn main() -> ExitCode {
    let config = KeyringConfig::from_env();
    if let Err(e) = init_tracing(config.log_format) {
        eprintln!("Failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    let state = match AppState::open(&config, Arc::new(NoDeviceOpener), Arc::new(UnavailableFetcher)) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Failed to open keyring");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let auto_lock = config.auto_lock_timeout.map(|timeout| {
        info!(timeout_secs = timeout.as_secs(), "Auto-lock enabled");
        let locker = AutoLocker::new(state.key_ring.clone(), timeout);
        tokio::spawn(locker.run(shutdown.clone()))
    });

    info!(version = env!("CARGO_PKG_VERSION"), "Relational keyring running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    shutdown.cancel();
    if let Some(handle) = auto_lock {
        if let Err(e) = handle.await {
            warn!(error = %e, "Auto-lock task failed");
        }
    }
    if let Err(e) = state.key_ring.lock() {
        warn!(error = %e, "Failed to lock keyring on shutdown");
    }
    ExitCode::SUCCESS
}
