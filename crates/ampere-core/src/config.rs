// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Default base URL of the mempool.space-compatible block explorer API.
pub const DEFAULT_MEMPOOL_URL: &str = "https://mempool.space/api";

/// Ampere configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL.
    pub database_url: String,
    /// Interval between supervisor reconciliation passes.
    pub supervisor_tick: Duration,
    /// Window in which a non-forced import is skipped after a success.
    pub import_skip_window: Duration,
    /// Base URL of the block explorer used to resolve short channel ids.
    pub mempool_url: String,
    /// Resolve short channel ids for nodes that are not on mainnet.
    pub resolve_off_mainnet: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `AMPERE_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `AMPERE_SUPERVISOR_TICK_MS`: reconciliation tick (default: 1000)
    /// - `AMPERE_IMPORT_SKIP_SECS`: importer skip window (default: 70)
    /// - `AMPERE_MEMPOOL_URL`: block explorer API (default: mempool.space)
    /// - `AMPERE_RESOLVE_OFF_MAINNET`: "true" or "1" to resolve on test networks (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("AMPERE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("AMPERE_DATABASE_URL"))?;

        let tick_ms: u64 = std::env::var("AMPERE_SUPERVISOR_TICK_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("AMPERE_SUPERVISOR_TICK_MS", "must be a positive integer")
            })?;
        if tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "AMPERE_SUPERVISOR_TICK_MS",
                "must be a positive integer",
            ));
        }

        let skip_secs: u64 = std::env::var("AMPERE_IMPORT_SKIP_SECS")
            .unwrap_or_else(|_| "70".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("AMPERE_IMPORT_SKIP_SECS", "must be a non-negative integer")
            })?;

        let mempool_url = std::env::var("AMPERE_MEMPOOL_URL")
            .unwrap_or_else(|_| DEFAULT_MEMPOOL_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let resolve_off_mainnet = std::env::var("AMPERE_RESOLVE_OFF_MAINNET")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            supervisor_tick: Duration::from_millis(tick_ms),
            import_skip_window: Duration::from_secs(skip_secs),
            mempool_url,
            resolve_off_mainnet,
        })
    }

    /// Configuration with defaults for everything but the database.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            supervisor_tick: Duration::from_secs(1),
            import_skip_window: Duration::from_secs(70),
            mempool_url: DEFAULT_MEMPOOL_URL.to_string(),
            resolve_off_mainnet: false,
        }
    }

    /// Whether the database URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 5] = [
        "AMPERE_DATABASE_URL",
        "AMPERE_SUPERVISOR_TICK_MS",
        "AMPERE_IMPORT_SKIP_SECS",
        "AMPERE_MEMPOOL_URL",
        "AMPERE_RESOLVE_OFF_MAINNET",
    ];

    /// Sets env vars for a test and restores them afterwards.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("AMPERE_DATABASE_URL", "postgres://localhost/ampere");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "postgres://localhost/ampere");
        assert_eq!(config.supervisor_tick, Duration::from_secs(1));
        assert_eq!(config.import_skip_window, Duration::from_secs(70));
        assert_eq!(config.mempool_url, DEFAULT_MEMPOOL_URL);
        assert!(!config.resolve_off_mainnet);
        assert!(!config.is_sqlite());
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("AMPERE_DATABASE_URL", "sqlite:.data/ampere.db");
        guard.set("AMPERE_SUPERVISOR_TICK_MS", "250");
        guard.set("AMPERE_IMPORT_SKIP_SECS", "5");
        guard.set("AMPERE_MEMPOOL_URL", "http://localhost:8999/api/");
        guard.set("AMPERE_RESOLVE_OFF_MAINNET", "1");

        let config = Config::from_env().unwrap();
        assert_eq!(config.supervisor_tick, Duration::from_millis(250));
        assert_eq!(config.import_skip_window, Duration::from_secs(5));
        assert_eq!(config.mempool_url, "http://localhost:8999/api");
        assert!(config.resolve_off_mainnet);
        assert!(config.is_sqlite());
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("AMPERE_DATABASE_URL")));
    }

    #[test]
    fn test_config_rejects_zero_tick() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("AMPERE_DATABASE_URL", "sqlite::memory:");
        guard.set("AMPERE_SUPERVISOR_TICK_MS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("AMPERE_SUPERVISOR_TICK_MS", _)
        ));
    }

    #[test]
    fn test_config_rejects_garbage_skip_window() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("AMPERE_DATABASE_URL", "sqlite::memory:");
        guard.set("AMPERE_IMPORT_SKIP_SECS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("AMPERE_IMPORT_SKIP_SECS", _)));
    }
}
