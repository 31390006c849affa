//! Prediction contract reads over JSON-RPC
//!
//! Calls are ABI-encoded with alloy's `sol!` bindings and sent as plain
//! `eth_call` requests, so no provider stack is needed.

use super::retry::{with_retry, RetryConfig};
use super::rpc_errors::{JsonRpcErrorObject, RpcError};
use super::RoundSource;
use crate::types::RoundData;
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

sol! {
    function currentEpoch() external view returns (uint256);

    function rounds(uint256 epoch) external view returns (
        uint256 epoch,
        uint256 startTimestamp,
        uint256 lockTimestamp,
        uint256 closeTimestamp,
        int256 lockPrice,
        int256 closePrice,
        uint256 lockOracleId,
        uint256 closeOracleId,
        uint256 totalAmount,
        uint256 bullAmount,
        uint256 bearAmount,
        uint256 rewardBaseCalAmount,
        uint256 rewardAmount,
        bool oracleCalled
    );
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

/// Prediction contract client
pub struct PredictionContract {
    client: reqwest::Client,
    rpc_url: String,
    address: Address,
    retry: RetryConfig,
}

impl PredictionContract {
    pub fn new(rpc_url: &str, address: Address, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            address,
            retry,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Single `eth_call` against the contract at the latest block
    async fn eth_call(&self, calldata: &[u8]) -> Result<Vec<u8>, RpcError> {
        let rpc_payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [{
                "to": format!("{:?}", self.address),
                "data": format!("0x{}", hex::encode(calldata)),
            }, "latest"],
            "id": 1
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&rpc_payload)
            .send()
            .await
            .map_err(|e| RpcError::from_network_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::from_status(status.as_u16(), &body));
        }

        let json: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(error) = json.error {
            return Err(RpcError::from_rpc_error(error));
        }

        let result = json
            .result
            .ok_or_else(|| RpcError::Decode("missing result".to_string()))?;
        let hex_str = result.strip_prefix("0x").unwrap_or(&result);
        hex::decode(hex_str).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn call_with_retry(&self, name: &str, calldata: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        with_retry(&self.retry, name, || self.eth_call(&calldata)).await
    }
}

#[async_trait]
impl RoundSource for PredictionContract {
    async fn current_epoch(&self) -> Result<u64> {
        let calldata = currentEpochCall {}.abi_encode();
        let data = self
            .call_with_retry("currentEpoch", calldata)
            .await
            .context("currentEpoch() call failed")?;

        decode_current_epoch(&data)
    }

    async fn get_round(&self, epoch: u64) -> Result<RoundData> {
        let calldata = roundsCall { epoch: U256::from(epoch) }.abi_encode();
        let data = self
            .call_with_retry("rounds", calldata)
            .await
            .with_context(|| format!("rounds({}) call failed", epoch))?;

        let round = decode_round(&data).with_context(|| format!("Failed to decode round {}", epoch))?;
        debug!(
            "Fetched round {}: lock_ts={} total={} oracle_called={}",
            round.epoch, round.lock_timestamp, round.total_amount, round.oracle_called
        );
        Ok(round)
    }
}

/// Decode the single uint256 word returned by `currentEpoch()`
fn decode_current_epoch(data: &[u8]) -> Result<u64> {
    if data.len() < 32 {
        anyhow::bail!("currentEpoch() returned {} bytes, expected 32", data.len());
    }
    let epoch = U256::from_be_slice(&data[..32]);
    u256_to_u64(epoch, "epoch")
}

/// Decode the `rounds(uint256)` return tuple
fn decode_round(data: &[u8]) -> Result<RoundData> {
    let r = roundsCall::abi_decode_returns(data).map_err(|e| anyhow::anyhow!("ABI decode failed: {}", e))?;

    Ok(RoundData {
        epoch: u256_to_u64(r.epoch, "epoch")?,
        start_timestamp: u256_to_i64(r.startTimestamp, "startTimestamp")?,
        lock_timestamp: u256_to_i64(r.lockTimestamp, "lockTimestamp")?,
        close_timestamp: u256_to_i64(r.closeTimestamp, "closeTimestamp")?,
        lock_price: i128::try_from(r.lockPrice)
            .map_err(|_| anyhow::anyhow!("lockPrice out of range: {}", r.lockPrice))?,
        close_price: i128::try_from(r.closePrice)
            .map_err(|_| anyhow::anyhow!("closePrice out of range: {}", r.closePrice))?,
        total_amount: r.totalAmount,
        bull_amount: r.bullAmount,
        bear_amount: r.bearAmount,
        reward_base_cal_amount: r.rewardBaseCalAmount,
        reward_amount: r.rewardAmount,
        oracle_called: r.oracleCalled,
    })
}

fn u256_to_u64(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("{} out of range: {}", field, value))
}

fn u256_to_i64(value: U256, field: &str) -> Result<i64> {
    let value = u256_to_u64(value, field)?;
    i64::try_from(value).map_err(|_| anyhow::anyhow!("{} out of range: {}", field, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ether;
    use alloy::primitives::I256;

    fn encode_word(out: &mut Vec<u8>, value: U256) {
        out.extend_from_slice(&value.to_be_bytes::<32>());
    }

    fn encode_signed(out: &mut Vec<u8>, value: i64) {
        out.extend_from_slice(&I256::try_from(value).unwrap().into_raw().to_be_bytes::<32>());
    }

    #[test]
    fn test_calldata_selectors() {
        assert_eq!(hex::encode(currentEpochCall {}.abi_encode()), "76671808");

        let calldata = roundsCall { epoch: U256::from(100u64) }.abi_encode();
        assert_eq!(hex::encode(&calldata[..4]), "8c65c81f");
        assert_eq!(calldata.len(), 36);
        assert_eq!(calldata[35], 100);
    }

    #[test]
    fn test_decode_current_epoch() {
        let mut data = Vec::new();
        encode_word(&mut data, U256::from(287_123u64));
        assert_eq!(decode_current_epoch(&data).unwrap(), 287_123);
        assert!(decode_current_epoch(&data[..16]).is_err());
    }

    #[test]
    fn test_decode_round() {
        let mut data = Vec::new();
        encode_word(&mut data, U256::from(100u64));
        encode_word(&mut data, U256::from(1_700_000_000u64));
        encode_word(&mut data, U256::from(1_700_000_300u64));
        encode_word(&mut data, U256::from(1_700_000_600u64));
        encode_signed(&mut data, 30_000_00000000);
        encode_signed(&mut data, -1);
        encode_word(&mut data, U256::from(7u64));
        encode_word(&mut data, U256::from(8u64));
        encode_word(&mut data, ether(10));
        encode_word(&mut data, ether(6));
        encode_word(&mut data, ether(4));
        encode_word(&mut data, ether(6));
        encode_word(&mut data, ether(9));
        encode_word(&mut data, U256::from(1u64));

        let round = decode_round(&data).unwrap();
        assert_eq!(round.epoch, 100);
        assert_eq!(round.lock_timestamp, 1_700_000_300);
        assert_eq!(round.lock_price, 30_000_00000000);
        assert_eq!(round.close_price, -1);
        assert_eq!(round.total_amount, ether(10));
        assert_eq!(round.bear_amount, ether(4));
        assert!(round.oracle_called);
    }

    #[test]
    fn test_decode_round_rejects_short_data() {
        assert!(decode_round(&[0u8; 64]).is_err());
    }
}
