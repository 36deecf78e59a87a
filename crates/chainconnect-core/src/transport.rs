//! The `RpcTransport` trait: the wire-level abstraction under every provider.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Endpoint health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Responding normally.
    Healthy,
    /// Responding, but some endpoints are cooling down after failures.
    Degraded,
    /// Not responding.
    Unhealthy,
    /// Not yet observed.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live `eth_subscribe` stream. The receiver ends when the connection drops.
#[derive(Debug)]
pub struct RawSubscription {
    pub id: SubscriptionId,
    pub rx: mpsc::UnboundedReceiver<Value>,
}

/// Monotonic request-id source shared by transports.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// The async trait every JSON-RPC transport implements.
///
/// Implementations must be `Send + Sync` and are stored as
/// `Arc<dyn RpcTransport>` or wrapped in [`crate::EthProvider`].
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the raw response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Allocate the id for the next request.
    fn next_id(&self) -> u64;

    /// The endpoint this transport talks to.
    fn url(&self) -> &str;

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Call `method` and return the `result` value, mapping node errors to
    /// [`TransportError::Rpc`].
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let req = JsonRpcRequest::new(self.next_id(), method, params);
        let resp = self.send(req).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    /// Whether [`RpcTransport::subscribe`] is available.
    fn supports_subscriptions(&self) -> bool {
        false
    }

    /// Open an `eth_subscribe` stream with the given params
    /// (e.g. `["newHeads"]` or `["logs", {..filter..}]`).
    async fn subscribe(&self, params: Vec<Value>) -> Result<RawSubscription, TransportError> {
        let _ = params;
        Err(TransportError::unsupported(self.url(), "eth_subscribe"))
    }

    /// Cancel a subscription opened with [`RpcTransport::subscribe`].
    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        let _ = id;
        Ok(())
    }
}
