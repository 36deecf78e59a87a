//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to an RPC endpoint.
///
/// Cloneable so a single in-flight result can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Every eligible endpoint of a fallback provider failed.
    #[error("All endpoints failed: {}", .failures.join("; "))]
    AllEndpointsFailed { failures: Vec<String> },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The endpoint does not implement the requested operation.
    #[error("{operation} is not supported by {endpoint}")]
    Unsupported { endpoint: String, operation: String },

    /// The transport's background task is gone.
    #[error("Transport closed")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and another endpoint (or a
    /// later attempt) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_)
            | Self::WebSocket(_)
            | Self::Timeout { .. }
            | Self::Closed
            | Self::AllEndpointsFailed { .. } => true,
            Self::Rpc(err) => err.is_rate_limited(),
            _ => false,
        }
    }

    /// Returns `true` if the node executed the call and it reverted.
    pub fn is_execution_reverted(&self) -> bool {
        matches!(self, Self::Rpc(err) if err.is_execution_reverted())
    }

    pub(crate) fn unsupported(endpoint: &str, operation: &str) -> Self {
        Self::Unsupported {
            endpoint: endpoint.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}
