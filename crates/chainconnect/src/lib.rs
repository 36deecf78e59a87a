//! chainconnect: reactive wallet-connection and contract-read engine for EVM
//! chains.
//!
//! # Overview
//!
//! A [`Client`] is the single context object an application talks to:
//!
//! - [`connector`]: wallet connectors and the connection state machine
//! - [`provider`]: provider factories, per-chain fallback and the handle cache
//! - [`read`]: deduplicated contract reads and Multicall3 batching
//! - [`watch`]: block, read and event watchers with cancel handles
//! - [`storage`]: persisted "last connector" snapshot for silent reconnects
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chainconnect::{chains, Client, MockConnector, MockConnectorOptions};
//!
//! # async fn run() -> Result<(), chainconnect::Error> {
//! let client = Client::builder()
//!     .chains(chains::default_chains())
//!     .connector(Arc::new(MockConnector::new(MockConnectorOptions::default())))
//!     .build()?;
//!
//! client.connect("mock", None).await?;
//! let block = client.fetch_block_number(None).await?;
//! let unwatch = client.watch_block_number(None, |n| println!("block {n}"))?;
//! # unwatch.cancel();
//! # let _ = block;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connector;
pub mod error;
mod listeners;
pub mod provider;
pub mod read;
pub mod storage;
pub mod telemetry;
pub mod watch;

pub use chainconnect_core::{
    chains, Address, BlockTag, Bytes, ChainDescriptor, ChainId, ChainRegistry, Log, LogFilter,
    NativeCurrency, Provider, TransportError, B256, U256,
};

pub use client::{
    Account, Amount, Balance, Client, ClientBuilder, FeeData, FormattedFeeData, Network,
    NetworkChain, Token,
};
pub use codec::{erc20_abi, AbiCodec, Call3, Call3Result, CodecError, ContractCodec};
pub use config::{BatchConfig, ClientConfig, EvictionConfig, FallbackConfig};
pub use connector::{
    ConnectionStatus, Connector, ConnectorData, ConnectorError, ConnectorEvent, ConnectorState,
    MockConnector, MockConnectorOptions,
};
pub use error::{Error, ErrorKind};
pub use provider::{
    AlchemyProvider, InfuraProvider, JsonRpcProvider, JsonRpcUrls, ProviderConfig,
    ProviderFactory, ProviderHandle, PublicProvider,
};
pub use read::{ContractResult, MulticallConfig, ReadContractConfig, ReadContractsConfig};
pub use storage::{MemoryStorage, NoopStorage, PersistedSnapshot, Storage, StorageError};
pub use telemetry::{init_tracing, LogConfig};
pub use watch::{ContextChange, ContractEventConfig, Unwatch, WatchOptions};
