//! Error types for the connection and read engine.

use alloy_primitives::{Address, Bytes};
use chainconnect_core::{ChainId, TransportError};
use thiserror::Error;

use crate::codec::decode_revert_reason;
use crate::connector::ConnectorError;
use crate::storage::StorageError;

// ─── ErrorKind ────────────────────────────────────────────────────────────────

/// Broad classification used to decide how an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown chain / connector / provider setup. Never retried; terminates
    /// watchers.
    Configuration,
    /// Wallet connection state errors. Surfaced directly.
    Connection,
    /// Transport failures after the fallback policy gave up.
    Provider,
    /// Contract call produced no usable result.
    Result,
    /// Persisted-state backend failure.
    Storage,
}

// ─── Error ────────────────────────────────────────────────────────────────────

/// Top-level error. `Clone` so one in-flight result can reach every waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("chain {chain_id} is not configured")]
    ChainNotConfigured { chain_id: ChainId },

    #[error("connector '{connector_id}' not found")]
    ConnectorNotFound { connector_id: String },

    #[error("no provider factory produced an endpoint for chain {chain_id}")]
    ProviderChainsNotFound { chain_id: ChainId },

    #[error("invalid chain configuration: {0}")]
    InvalidChainConfig(String),

    #[error("a connector is already connected")]
    ConnectorAlreadyConnected,

    #[error("no connector is connected")]
    ConnectorNotConnected,

    #[error("user rejected the request")]
    UserRejectedRequest,

    #[error("chain mismatch: expected {expected}, connector reports {actual}")]
    ChainMismatch { expected: ChainId, actual: ChainId },

    #[error("connector '{connector_id}' does not support switching chains")]
    SwitchChainNotSupported { connector_id: String },

    #[error("switch chain failed: {0}")]
    SwitchChain(String),

    #[error("connector error: {0}")]
    Connector(String),

    #[error("provider error: {0}")]
    Provider(#[from] TransportError),

    #[error("chain {chain_id} has no multicall contract")]
    ChainDoesNotSupportMulticall { chain_id: ChainId },

    #[error("function '{function_name}' is not in the ABI for {address} on chain {chain_id}")]
    ContractMethodDoesNotExist {
        address: Address,
        function_name: String,
        chain_id: ChainId,
    },

    #[error("'{function_name}' on {address} (chain {chain_id}) returned no data; is the contract deployed?")]
    ContractMethodNoResult {
        address: Address,
        function_name: String,
        chain_id: ChainId,
    },

    #[error("'{function_name}' on {address} (chain {chain_id}) reverted{}", revert_suffix(.data))]
    ContractMethodReverted {
        address: Address,
        function_name: String,
        chain_id: ChainId,
        data: Bytes,
    },

    #[error("failed to decode result of '{function_name}': {reason}")]
    ContractResultDecode { function_name: String, reason: String },

    #[error("failed to encode call to '{function_name}': {reason}")]
    ContractCallEncode { function_name: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

fn revert_suffix(data: &Bytes) -> String {
    match decode_revert_reason(data) {
        Some(reason) => format!(": {reason}"),
        None if data.is_empty() => String::new(),
        None => format!(" with data {data}"),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChainNotConfigured { .. }
            | Self::ConnectorNotFound { .. }
            | Self::ProviderChainsNotFound { .. }
            | Self::InvalidChainConfig(_) => ErrorKind::Configuration,
            Self::ConnectorAlreadyConnected
            | Self::ConnectorNotConnected
            | Self::UserRejectedRequest
            | Self::ChainMismatch { .. }
            | Self::SwitchChainNotSupported { .. }
            | Self::SwitchChain(_)
            | Self::Connector(_) => ErrorKind::Connection,
            Self::Provider(_) => ErrorKind::Provider,
            Self::ChainDoesNotSupportMulticall { .. }
            | Self::ContractMethodDoesNotExist { .. }
            | Self::ContractMethodNoResult { .. }
            | Self::ContractMethodReverted { .. }
            | Self::ContractResultDecode { .. }
            | Self::ContractCallEncode { .. } => ErrorKind::Result,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Configuration errors stop a watcher after one delivery.
    pub fn is_fatal_for_watcher(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Human-readable revert reason, when this is a revert carrying
    /// `Error(string)` or `Panic(uint256)` data.
    pub fn revert_reason(&self) -> Option<String> {
        match self {
            Self::ContractMethodReverted { data, .. } => decode_revert_reason(data),
            _ => None,
        }
    }

    /// Map a connector failure, attributing it to `connector_id`.
    pub fn from_connector(connector_id: &str, err: ConnectorError) -> Self {
        match err {
            ConnectorError::UserRejected => Self::UserRejectedRequest,
            ConnectorError::SwitchChainNotSupported => Self::SwitchChainNotSupported {
                connector_id: connector_id.to_string(),
            },
            ConnectorError::SwitchChain(reason) => Self::SwitchChain(reason),
            other => Self::Connector(format!("{connector_id}: {other}")),
        }
    }
}
