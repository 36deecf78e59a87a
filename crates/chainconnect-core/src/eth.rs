//! `EthProvider`: the [`Provider`] capability spoken over any JSON-RPC
//! [`RpcTransport`] using the standard `eth_*` methods.

use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::provider::{BlockTag, CallRequest, Log, LogFilter, NotificationStream, Provider};
use crate::request::parse_quantity;
use crate::transport::{HealthStatus, RpcTransport, SubscriptionId};

/// [`Provider`] over a JSON-RPC transport.
pub struct EthProvider<T: RpcTransport> {
    transport: Arc<T>,
}

impl<T: RpcTransport> EthProvider<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_arc(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    async fn quantity(&self, method: &str, params: Vec<Value>) -> Result<u64, TransportError> {
        let value = self.transport.request(method, params).await?;
        value
            .as_str()
            .and_then(parse_quantity)
            .ok_or_else(|| TransportError::Deserialization(format!("{method}: bad quantity {value}")))
    }
}

fn hex_u256(method: &str, value: &Value) -> Result<U256, TransportError> {
    let text = value
        .as_str()
        .ok_or_else(|| TransportError::Deserialization(format!("{method}: expected hex quantity")))?;
    U256::from_str(text).map_err(|e| TransportError::Deserialization(format!("{method}: {e}")))
}

fn hex_bytes(method: &str, value: &Value) -> Result<Bytes, TransportError> {
    let text = value
        .as_str()
        .ok_or_else(|| TransportError::Deserialization(format!("{method}: expected hex string")))?;
    Bytes::from_str(text).map_err(|e| TransportError::Deserialization(format!("{method}: {e}")))
}

#[async_trait]
impl<T: RpcTransport> Provider for EthProvider<T> {
    fn url(&self) -> &str {
        self.transport.url()
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError> {
        let value = self.transport.request("eth_call", request.to_params()).await?;
        hex_bytes("eth_call", &value)
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.quantity("eth_blockNumber", vec![]).await
    }

    async fn balance(&self, address: Address, block: BlockTag) -> Result<U256, TransportError> {
        let value = self
            .transport
            .request(
                "eth_getBalance",
                vec![serde_json::json!(address), block.as_param()],
            )
            .await?;
        hex_u256("eth_getBalance", &value)
    }

    async fn gas_price(&self) -> Result<U256, TransportError> {
        let value = self.transport.request("eth_gasPrice", vec![]).await?;
        hex_u256("eth_gasPrice", &value)
    }

    async fn base_fee_per_gas(&self) -> Result<Option<U256>, TransportError> {
        let block = self
            .transport
            .request(
                "eth_getBlockByNumber",
                vec![BlockTag::Latest.as_param(), Value::Bool(false)],
            )
            .await?;
        match block.get("baseFeePerGas") {
            None | Some(Value::Null) => Ok(None),
            Some(fee) => hex_u256("eth_getBlockByNumber", fee).map(Some),
        }
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, TransportError> {
        let value = self
            .transport
            .request("eth_getLogs", vec![filter.to_param()])
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    fn health(&self) -> HealthStatus {
        self.transport.health()
    }

    fn supports_subscriptions(&self) -> bool {
        self.transport.supports_subscriptions()
    }

    async fn subscribe_blocks(&self) -> Result<NotificationStream<u64>, TransportError> {
        let sub = self
            .transport
            .subscribe(vec![Value::String("newHeads".into())])
            .await?;
        let stream = SubscriptionStream::new(Arc::clone(&self.transport), sub.id, sub.rx);
        Ok(stream
            .filter_map(|header| async move {
                let number = header.get("number").and_then(Value::as_str).and_then(parse_quantity);
                if number.is_none() {
                    tracing::debug!("newHeads notification without a block number");
                }
                number
            })
            .boxed())
    }

    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<NotificationStream<Log>, TransportError> {
        let live = LogFilter {
            from_block: None,
            to_block: None,
            ..filter.clone()
        };
        let sub = self
            .transport
            .subscribe(vec![Value::String("logs".into()), live.to_param()])
            .await?;
        let stream = SubscriptionStream::new(Arc::clone(&self.transport), sub.id, sub.rx);
        Ok(stream
            .filter_map(|raw| async move {
                match serde_json::from_value::<Log>(raw) {
                    Ok(log) => Some(log),
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed log notification");
                        None
                    }
                }
            })
            .boxed())
    }
}

/// Receiver-backed stream that issues `eth_unsubscribe` when dropped.
struct SubscriptionStream<T: RpcTransport> {
    transport: Arc<T>,
    id: Option<SubscriptionId>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl<T: RpcTransport> SubscriptionStream<T> {
    fn new(transport: Arc<T>, id: SubscriptionId, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            transport,
            id: Some(id),
            rx,
        }
    }
}

impl<T: RpcTransport> Stream for SubscriptionStream<T> {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

impl<T: RpcTransport> Drop for SubscriptionStream<T> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        runtime.spawn(async move {
            if let Err(e) = transport.unsubscribe(&id).await {
                tracing::debug!(subscription = %id, error = %e, "eth_unsubscribe failed");
            }
        });
    }
}
