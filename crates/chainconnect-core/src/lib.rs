//! chainconnect-core: foundation types and capability traits for ChainConnect.
//!
//! # Overview
//!
//! ChainConnect is a client-side connection and read layer for EVM chains.
//! The core crate defines the pieces every other crate builds on:
//!
//! - [`ChainDescriptor`] / [`ChainRegistry`]: static description of known chains
//! - [`chains`]: built-in chain catalogue (mainnet, L2s, testnets, local dev)
//! - [`Provider`]: the read capability (`eth_call`, block number, logs, subscriptions)
//! - [`RpcTransport`]: JSON-RPC transport trait implemented by HTTP and WS crates
//! - [`EthProvider`]: [`Provider`] implemented over any [`RpcTransport`]
//! - [`TransportError`]: structured, cloneable transport error
//! - [`policy`] module: endpoint health, failure-rate window, backoff

pub mod chain;
pub mod chains;
pub mod error;
pub mod eth;
pub mod policy;
pub mod provider;
pub mod request;
pub mod transport;

pub use alloy_primitives::{Address, Bytes, B256, U256};

pub use chain::{
    normalize_chain_id, BlockExplorer, ChainDescriptor, ChainError, ChainId, ChainRegistry,
    MulticallContract, NativeCurrency,
};
pub use error::TransportError;
pub use eth::EthProvider;
pub use provider::{BlockTag, CallRequest, Log, LogFilter, NotificationStream, Provider};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{HealthStatus, RawSubscription, RequestIds, RpcTransport, SubscriptionId};
