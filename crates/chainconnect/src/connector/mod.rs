//! Wallet connectors and the connection state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected{account, chain}
//!      ▲                        │                   │
//!      │                       err                  │ disconnect / Disconnect event
//!      └──────── Error{reason} ◀┘                   │ AccountsChanged([])
//!      └────────────────────────────────────────────┘
//! ```

pub mod manager;
pub mod mock;

use alloy_primitives::Address;
use async_trait::async_trait;
use chainconnect_core::ChainId;
use thiserror::Error;
use tokio::sync::broadcast;

pub use manager::{ConnectorManager, StateChange};
pub use mock::{MockConnector, MockConnectorOptions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("user rejected the request")]
    UserRejected,

    #[error("connector is not ready: {0}")]
    NotReady(String),

    #[error("switching chains is not supported")]
    SwitchChainNotSupported,

    #[error("switch chain failed: {0}")]
    SwitchChain(String),

    #[error("{0}")]
    Other(String),
}

/// Result of a successful `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorData {
    pub account: Address,
    pub chain_id: ChainId,
}

/// Messages a connector pushes when the wallet changes underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Disconnect,
}

/// Connection state, owned by [`ConnectorManager`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectorState {
    #[default]
    Disconnected,
    Connecting,
    /// Silent reconnect of the persisted connector at startup.
    Reconnecting,
    Connected {
        connector_id: String,
        account: Address,
        chain_id: ChainId,
    },
    Error {
        reason: String,
    },
}

impl ConnectorState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// `true` while a connect or reconnect attempt is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    pub fn account(&self) -> Option<Address> {
        match self {
            Self::Connected { account, .. } => Some(*account),
            _ => None,
        }
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            Self::Connected { chain_id, .. } => Some(*chain_id),
            _ => None,
        }
    }

    pub fn connector_id(&self) -> Option<&str> {
        match self {
            Self::Connected { connector_id, .. } => Some(connector_id),
            _ => None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Reconnecting => ConnectionStatus::Reconnecting,
            Self::Connected { .. } => ConnectionStatus::Connected,
            Self::Error { .. } => ConnectionStatus::Error,
        }
    }
}

/// [`ConnectorState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A wallet integration.
///
/// Implementations report wallet-side changes through [`Connector::events`];
/// the manager subscribes after every successful connect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Whether the wallet backing this connector is available at all.
    fn ready(&self) -> bool {
        true
    }

    async fn connect(&self, chain_id: Option<ChainId>) -> Result<ConnectorData, ConnectorError>;

    async fn disconnect(&self) -> Result<(), ConnectorError>;

    async fn account(&self) -> Result<Address, ConnectorError>;

    async fn chain_id(&self) -> Result<ChainId, ConnectorError>;

    /// Whether the wallet would connect without prompting the user.
    async fn is_authorized(&self) -> bool;

    fn supports_switch_chain(&self) -> bool {
        false
    }

    /// Ask the wallet to switch; returns the chain it reports afterwards.
    async fn switch_chain(&self, chain_id: ChainId) -> Result<ChainId, ConnectorError> {
        let _ = chain_id;
        Err(ConnectorError::SwitchChainNotSupported)
    }

    fn events(&self) -> broadcast::Receiver<ConnectorEvent>;
}
