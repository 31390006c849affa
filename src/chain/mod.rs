//! Round data source
//!
//! Read-only access to the prediction contract's round state.

pub mod contract;
pub mod retry;
pub mod rpc_errors;

pub use contract::PredictionContract;
pub use retry::{with_retry, RetryConfig};
pub use rpc_errors::RpcError;

use crate::types::RoundData;
use anyhow::Result;
use async_trait::async_trait;

/// Anything that can report the current epoch and a round's state
#[async_trait]
pub trait RoundSource: Send + Sync {
    /// Epoch of the round currently accepting bets
    async fn current_epoch(&self) -> Result<u64>;

    /// Round state for an epoch
    async fn get_round(&self, epoch: u64) -> Result<RoundData>;
}
