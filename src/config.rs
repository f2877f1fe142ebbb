// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`KeyringConfig`] loaded
//! from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for `keyring.redb` | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//! | `AUTO_LOCK_TIMEOUT_SECS` | Idle seconds before the keyring locks, `0` disables | `0` |
//! | `KDF_MEMORY_KIB` | Argon2id memory cost | `65536` |
//! | `KDF_ITERATIONS` | Argon2id iterations | `3` |
//! | `KDF_PARALLELISM` | Argon2id lanes | `4` |
//! | `TOKEN_SCAN_CONCURRENCY` | Chains scanned in parallel for one vault | `8` |
//! | `CHAINS_FILE` | JSON array of chain infos for the registry | none |
//!
//! Invalid values fall back to the default with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::storage::paths::DATA_ROOT;
use crate::vault::KdfParams;

/// Environment variable name for the data directory path.
///
/// # Default
/// `./data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// `json` selects JSON lines; anything else the pretty formatter.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const AUTO_LOCK_TIMEOUT_ENV: &str = "AUTO_LOCK_TIMEOUT_SECS";

pub const KDF_MEMORY_KIB_ENV: &str = "KDF_MEMORY_KIB";
pub const KDF_ITERATIONS_ENV: &str = "KDF_ITERATIONS";
pub const KDF_PARALLELISM_ENV: &str = "KDF_PARALLELISM";

/// Upper bound on concurrent chain scans of one vault.
pub const TOKEN_SCAN_CONCURRENCY_ENV: &str = "TOKEN_SCAN_CONCURRENCY";
pub const DEFAULT_TOKEN_SCAN_CONCURRENCY: usize = 8;

/// Optional chain registry file, loaded once at startup.
pub const CHAINS_FILE_ENV: &str = "CHAINS_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringConfig {
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    /// `None` when auto-lock is disabled.
    pub auto_lock_timeout: Option<Duration>,
    pub kdf: KdfParams,
    pub token_scan_concurrency: usize,
    pub chains_file: Option<PathBuf>,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_ROOT),
            log_format: LogFormat::Pretty,
            auto_lock_timeout: None,
            kdf: KdfParams::default(),
            token_scan_concurrency: DEFAULT_TOKEN_SCAN_CONCURRENCY,
            chains_file: None,
        }
    }
}

impl KeyringConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let log_format = match non_empty(LOG_FORMAT_ENV).as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let auto_lock_secs: u64 = parse_or(&lookup, AUTO_LOCK_TIMEOUT_ENV, 0);
        let kdf = KdfParams {
            memory_kib: parse_or(&lookup, KDF_MEMORY_KIB_ENV, defaults.kdf.memory_kib),
            iterations: parse_or(&lookup, KDF_ITERATIONS_ENV, defaults.kdf.iterations),
            parallelism: parse_or(&lookup, KDF_PARALLELISM_ENV, defaults.kdf.parallelism),
        };

        let mut token_scan_concurrency =
            parse_or(&lookup, TOKEN_SCAN_CONCURRENCY_ENV, defaults.token_scan_concurrency);
        if token_scan_concurrency == 0 {
            warn!(
                var = TOKEN_SCAN_CONCURRENCY_ENV,
                default = DEFAULT_TOKEN_SCAN_CONCURRENCY,
                "Zero concurrency; using default"
            );
            token_scan_concurrency = DEFAULT_TOKEN_SCAN_CONCURRENCY;
        }

        Self {
            data_dir: non_empty(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            log_format,
            auto_lock_timeout: (auto_lock_secs > 0).then(|| Duration::from_secs(auto_lock_secs)),
            kdf,
            token_scan_concurrency,
            chains_file: non_empty(CHAINS_FILE_ENV).map(PathBuf::from),
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(var = name, value = %raw, default = %default, "Invalid configuration value; using default");
            default
        }
    }
}
