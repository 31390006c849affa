//! Exponential backoff for contract reads
//!
//! A single dropped request should not cost the watcher a whole poll tick, but
//! retries must stay short: the snapshot windows are only a few seconds wide.

use super::rpc_errors::RpcError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 800,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        let ms = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Run `call` until it succeeds, fails with a non-retryable [`RpcError`], or
/// runs out of retries.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, method: &str, mut call: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut retry = 0;

    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if retry >= config.max_retries {
            warn!("{} failed after {} attempts: {}", method, retry + 1, err);
            return Err(err);
        }

        retry += 1;
        let delay = config.delay_for(retry);
        debug!("{} failed ({}), retry {}/{} in {:?}", method, err, retry, config.max_retries, delay);
        sleep(delay).await;
    }
}
