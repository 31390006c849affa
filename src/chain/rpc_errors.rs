//! JSON-RPC Error Differentiation
//!
//! Classifies node failures so transient ones (timeouts, rate limits, 5xx)
//! can be retried while malformed responses fail fast.

use serde::Deserialize;
use thiserror::Error;

/// Structured RPC error types
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Connection refused, DNS failure, reset
    #[error("Network error: {0}")]
    Network(String),
    /// Request exceeded the client timeout
    #[error("RPC request timed out")]
    Timeout,
    /// Node rate limited the caller
    #[error("RPC rate limited")]
    RateLimited,
    /// Non-success HTTP status
    #[error("RPC HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    /// JSON-RPC error object in the response
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// Response could not be decoded
    #[error("Failed to decode RPC response: {0}")]
    Decode(String),
}

/// JSON-RPC error object
#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcError {
    /// Parse a non-success HTTP response into a structured error
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 429 {
            return RpcError::RateLimited;
        }
        RpcError::Http {
            status,
            body: body.chars().take(200).collect(),
        }
    }

    /// Parse a JSON-RPC error object
    pub fn from_rpc_error(err: JsonRpcErrorObject) -> Self {
        let msg_lower = err.message.to_lowercase();
        if err.code == -32005 || msg_lower.contains("rate limit") || msg_lower.contains("too many requests") {
            return RpcError::RateLimited;
        }
        RpcError::Rpc {
            code: err.code,
            message: err.message,
        }
    }

    /// Parse a network/reqwest error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            RpcError::Timeout
        } else if err.is_connect() {
            RpcError::Network("Connection failed".to_string())
        } else if err.is_decode() {
            RpcError::Decode(err.to_string())
        } else {
            RpcError::Network(err.to_string())
        }
    }

    /// Whether this error is retryable with exponential backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Network(_) | RpcError::Timeout | RpcError::RateLimited => true,
            RpcError::Http { status, .. } => *status >= 500,
            // -32000 is the generic server error most nodes return when a backend is lagging
            RpcError::Rpc { code, .. } => *code == -32000,
            RpcError::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited() {
        let err = RpcError::from_status(429, "");
        assert!(err.is_retryable());
        assert!(matches!(err, RpcError::RateLimited));
    }

    #[test]
    fn test_server_error_retryable() {
        assert!(RpcError::from_status(503, "Service Unavailable").is_retryable());
        assert!(!RpcError::from_status(400, "Bad Request").is_retryable());
    }

    #[test]
    fn test_rpc_error_object() {
        let err = RpcError::from_rpc_error(JsonRpcErrorObject {
            code: -32005,
            message: "limit exceeded".to_string(),
        });
        assert!(matches!(err, RpcError::RateLimited));

        let err = RpcError::from_rpc_error(JsonRpcErrorObject {
            code: 3,
            message: "execution reverted".to_string(),
        });
        assert!(!err.is_retryable());
        assert!(matches!(err, RpcError::Rpc { code: 3, .. }));
    }

    #[test]
    fn test_decode_not_retryable() {
        assert!(!RpcError::Decode("short return data".to_string()).is_retryable());
    }
}
