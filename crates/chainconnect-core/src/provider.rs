//! The `Provider` capability: what the read engine and watchers need from a
//! chain endpoint, independent of how requests are framed on the wire.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::TransportError;
use crate::request::{format_quantity, parse_quantity};
use crate::transport::HealthStatus;

/// A push-based stream of notifications (block numbers, logs).
/// Ends when the underlying connection drops.
pub type NotificationStream<T> = BoxStream<'static, T>;

/// Block selector for reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlockTag {
    #[default]
    Latest,
    Pending,
    Safe,
    Finalized,
    Earliest,
    Number(u64),
}

impl BlockTag {
    pub fn as_param(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Pending => write!(f, "pending"),
            Self::Safe => write!(f, "safe"),
            Self::Finalized => write!(f, "finalized"),
            Self::Earliest => write!(f, "earliest"),
            Self::Number(n) => write!(f, "{}", format_quantity(*n)),
        }
    }
}

/// A read-only contract call (`eth_call`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub block: BlockTag,
    pub from: Option<Address>,
}

impl CallRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            block: BlockTag::Latest,
            from: None,
        }
    }

    #[must_use]
    pub fn at_block(mut self, block: BlockTag) -> Self {
        self.block = block;
        self
    }

    /// `eth_call` params: `[{from?, to, data}, block]`.
    pub fn to_params(&self) -> Vec<Value> {
        let mut tx = Map::new();
        if let Some(from) = self.from {
            tx.insert("from".into(), json!(from));
        }
        tx.insert("to".into(), json!(self.to));
        tx.insert("data".into(), json!(self.data));
        vec![Value::Object(tx), self.block.as_param()]
    }
}

/// Log filter for `eth_getLogs` / `eth_subscribe("logs")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LogFilter {
    pub address: Vec<Address>,
    /// Positional topic filters; `None` matches anything at that position.
    pub topics: Vec<Option<Vec<B256>>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    /// Filter on one contract and its event signature topic.
    pub fn event(address: Address, topic0: B256) -> Self {
        Self {
            address: vec![address],
            topics: vec![Some(vec![topic0])],
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_range(mut self, from_block: u64, to_block: u64) -> Self {
        self.from_block = Some(from_block);
        self.to_block = Some(to_block);
        self
    }

    pub fn to_param(&self) -> Value {
        let mut obj = Map::new();
        match self.address.as_slice() {
            [] => {}
            [single] => {
                obj.insert("address".into(), json!(single));
            }
            many => {
                obj.insert("address".into(), json!(many));
            }
        }
        if !self.topics.is_empty() {
            let topics: Vec<Value> = self
                .topics
                .iter()
                .map(|slot| match slot {
                    None => Value::Null,
                    Some(options) if options.len() == 1 => json!(options[0]),
                    Some(options) => json!(options),
                })
                .collect();
            obj.insert("topics".into(), Value::Array(topics));
        }
        if let Some(from) = self.from_block {
            obj.insert("fromBlock".into(), Value::String(format_quantity(from)));
        }
        if let Some(to) = self.to_block {
            obj.insert("toBlock".into(), Value::String(format_quantity(to)));
        }
        Value::Object(obj)
    }

    /// Whether `log` satisfies the address and topic constraints.
    pub fn matches(&self, log: &Log) -> bool {
        if !self.address.is_empty() && !self.address.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, slot)| match slot {
            None => true,
            Some(options) => log.topics.get(i).is_some_and(|t| options.contains(t)),
        })
    }
}

/// An EVM log as returned by `eth_getLogs` and log subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl Log {
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_quantity)
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        self.log_index.as_deref().and_then(parse_quantity)
    }
}

/// The read capability consumed by the engine.
///
/// Implementations are treated as opaque transports: request framing,
/// authentication and connection handling are theirs.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Endpoint identifier (URL or a name for composite providers).
    fn url(&self) -> &str;

    /// Execute a read-only call and return the raw return data.
    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError>;

    /// Current head block number.
    async fn block_number(&self) -> Result<u64, TransportError>;

    /// Native balance of `address` at `block`.
    async fn balance(&self, address: Address, block: BlockTag) -> Result<U256, TransportError>;

    /// Logs matching `filter`.
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, TransportError>;

    /// Legacy gas price in wei.
    async fn gas_price(&self) -> Result<U256, TransportError> {
        Err(TransportError::unsupported(self.url(), "eth_gasPrice"))
    }

    /// `baseFeePerGas` of the latest block; `None` on chains without EIP-1559.
    async fn base_fee_per_gas(&self) -> Result<Option<U256>, TransportError> {
        Err(TransportError::unsupported(self.url(), "eth_getBlockByNumber"))
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Whether the push-based `subscribe_*` methods are available.
    fn supports_subscriptions(&self) -> bool {
        false
    }

    /// Stream of new head block numbers.
    async fn subscribe_blocks(&self) -> Result<NotificationStream<u64>, TransportError> {
        Err(TransportError::unsupported(self.url(), "block subscription"))
    }

    /// Stream of logs matching `filter` (block range ignored).
    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<NotificationStream<Log>, TransportError> {
        let _ = filter;
        Err(TransportError::unsupported(self.url(), "log subscription"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const TOKEN: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

    #[test]
    fn call_params_shape() {
        let req = CallRequest::new(TOKEN, Bytes::from_static(&[0x06, 0xfd, 0xde, 0x03]))
            .at_block(BlockTag::Number(16));
        let params = req.to_params();
        assert_eq!(params[0]["data"], "0x06fdde03");
        assert_eq!(params[1], "0x10");
        assert!(params[0].get("from").is_none());
    }

    #[test]
    fn filter_param_single_address_and_wildcard_topic() {
        let mut filter = LogFilter::event(TOKEN, B256::repeat_byte(0xdd));
        filter.topics.push(None);
        let param = filter.with_range(1, 2).to_param();
        assert!(param["address"].is_string());
        assert_eq!(param["topics"][1], Value::Null);
        assert_eq!(param["fromBlock"], "0x1");
        assert_eq!(param["toBlock"], "0x2");
    }

    #[test]
    fn filter_matches_topics() {
        let topic = B256::repeat_byte(0xdd);
        let filter = LogFilter::event(TOKEN, topic);
        let log = Log {
            address: TOKEN,
            topics: vec![topic],
            data: Bytes::new(),
            block_number: Some("0x5".into()),
            block_hash: None,
            transaction_hash: None,
            log_index: Some("0x0".into()),
            removed: false,
        };
        assert!(filter.matches(&log));
        assert_eq!(log.block_number_u64(), Some(5));

        let other = Log {
            topics: vec![B256::ZERO],
            ..log
        };
        assert!(!filter.matches(&other));
    }
}
