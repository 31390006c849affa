//! Configuration management for the prediction watcher

use crate::types::SnapshotType;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Default BSC RPC endpoint
pub const DEFAULT_RPC_URL: &str = "https://bsc-dataseed.binance.org";

/// BNB/USD prediction contract on BSC
pub const DEFAULT_PREDICTION_CONTRACT: &str = "0x18B2A687610328590Bc8F2e5fEdDe3b582A49cdA";

/// Epochs an unresolved round stays queued for finalization
pub const DEFAULT_MAX_FINALIZE_LAG_EPOCHS: u64 = 12;

/// Watcher configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the chain hosting the prediction contract
    pub rpc_url: String,

    /// Prediction contract address
    pub contract_address: Address,

    /// Path to SQLite database
    pub database_path: String,

    /// RPC request timeout in seconds
    pub rpc_timeout_secs: u64,

    /// Retries for transient RPC failures within a single call
    pub rpc_max_retries: u32,

    pub watcher: WatcherConfig,
}

/// Live watcher loop settings
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between polls
    pub poll_interval: Duration,
    /// Delay after a failed iteration
    pub error_backoff: Duration,
    /// Maximum epochs remembered per attempt set and in the pending set
    pub attempt_cache_limit: usize,
    /// Epoch transitions after which a still-unresolved round is given up on
    pub max_finalize_lag_epochs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            error_backoff: Duration::from_millis(2000),
            attempt_cache_limit: 100,
            max_finalize_lag_epochs: DEFAULT_MAX_FINALIZE_LAG_EPOCHS,
        }
    }
}

impl WatcherConfig {
    /// Poll interval must be well under the narrowest capture window, otherwise
    /// a tick can step over a window entirely.
    pub fn validate(&self) -> Result<()> {
        let narrowest_ms = SnapshotType::narrowest_window_secs() as u128 * 1000;
        let max_poll_ms = narrowest_ms / 2;

        if self.poll_interval.is_zero() {
            anyhow::bail!("POLL_INTERVAL_MS must be greater than zero");
        }
        if self.poll_interval.as_millis() >= max_poll_ms {
            anyhow::bail!(
                "POLL_INTERVAL_MS ({}) must be below {}ms (half of the narrowest {}ms snapshot window)",
                self.poll_interval.as_millis(),
                max_poll_ms,
                narrowest_ms
            );
        }
        if self.attempt_cache_limit == 0 {
            anyhow::bail!("ATTEMPT_CACHE_LIMIT must be greater than zero");
        }
        if self.max_finalize_lag_epochs == 0 {
            anyhow::bail!("MAX_FINALIZE_LAG_EPOCHS must be greater than zero");
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let rpc_url = env::var("RPC_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let contract_str = env::var("PREDICTION_CONTRACT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PREDICTION_CONTRACT.to_string());
        let contract_address: Address = contract_str
            .parse()
            .with_context(|| format!("Invalid PREDICTION_CONTRACT address: {}", contract_str))?;

        let database_path = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "prediction.db".to_string());

        let poll_interval_ms: u64 = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        // Defaults to twice the poll interval
        let error_backoff_ms: u64 = env::var("ERROR_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(poll_interval_ms.saturating_mul(2));

        let attempt_cache_limit = env::var("ATTEMPT_CACHE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let max_finalize_lag_epochs = env::var("MAX_FINALIZE_LAG_EPOCHS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_FINALIZE_LAG_EPOCHS);

        let rpc_timeout_secs = env::var("RPC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let rpc_max_retries = env::var("RPC_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let config = Self {
            rpc_url,
            contract_address,
            database_path,
            rpc_timeout_secs,
            rpc_max_retries,
            watcher: WatcherConfig {
                poll_interval: Duration::from_millis(poll_interval_ms),
                error_backoff: Duration::from_millis(error_backoff_ms),
                attempt_cache_limit,
                max_finalize_lag_epochs,
            },
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate the settings every command needs. Watcher settings are checked
    /// by [`Config::watcher_config`].
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            anyhow::bail!("RPC_URL must not be empty");
        }
        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("RPC_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    /// Watcher settings with an optional poll interval override applied, validated
    pub fn watcher_config(&self, poll_interval_ms: Option<u64>) -> Result<WatcherConfig> {
        let mut watcher = self.watcher.clone();
        if let Some(ms) = poll_interval_ms {
            watcher.poll_interval = Duration::from_millis(ms);
        }
        watcher.validate()?;
        Ok(watcher)
    }
}
