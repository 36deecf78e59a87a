//! WebSocket JSON-RPC client with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use chainconnect_core::policy::{Backoff, BackoffConfig};
use chainconnect_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainconnect_core::transport::{
    HealthStatus, RawSubscription, RequestIds, RpcTransport, SubscriptionId,
};
use chainconnect_core::TransportError;

use crate::subscriptions::SubscriptionManager;

const STATE_CONNECTING: u8 = 0;
const STATE_CONNECTED: u8 = 1;
const STATE_DISCONNECTED: u8 = 2;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Backoff between reconnect attempts.
    pub reconnect: BackoffConfig,
    /// How long a caller waits for a response.
    pub request_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffConfig {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(60),
                multiplier: 2.0,
            },
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Who is waiting on a response id.
enum Waiting {
    Response(oneshot::Sender<Result<JsonRpcResponse, TransportError>>),
    Subscription(oneshot::Sender<Result<RawSubscription, TransportError>>),
}

impl Waiting {
    fn fail(self, err: TransportError) {
        match self {
            Self::Response(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscription(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send { req: JsonRpcRequest, waiting: Waiting },
    Close,
}

/// WebSocket JSON-RPC transport.
///
/// A background task owns the connection and reconnects with exponential
/// backoff. Requests issued while disconnected fail immediately so a
/// fallback can move on.
pub struct WsTransport {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
    ids: RequestIds,
    state: Arc<AtomicU8>,
    request_timeout: Duration,
}

impl WsTransport {
    /// Start the background connection task for `url`.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Fails only when called outside a tokio runtime.
    pub fn connect(url: impl Into<String>, config: WsConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TransportError::WebSocket("a tokio runtime is required to drive the connection".into())
        })?;

        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new();
        let state = Arc::new(AtomicU8::new(STATE_CONNECTING));

        runtime.spawn(ws_task(
            url.clone(),
            cmd_rx,
            subscriptions.clone(),
            Arc::clone(&state),
            config.reconnect,
        ));

        Ok(Self {
            url,
            cmd_tx,
            subscriptions,
            ids: RequestIds::new(),
            state,
            request_timeout: config.request_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CONNECTED
    }

    async fn roundtrip<T>(
        &self,
        req: JsonRpcRequest,
        waiting: Waiting,
        rx: oneshot::Receiver<Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        self.cmd_tx
            .send(WsCommand::Send { req, waiting })
            .map_err(|_| TransportError::Closed)?;
        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl RpcTransport for WsTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.roundtrip(req, Waiting::Response(tx), rx).await
    }

    fn next_id(&self) -> u64 {
        self.ids.next()
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn health(&self) -> HealthStatus {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTED => HealthStatus::Healthy,
            STATE_DISCONNECTED => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    fn supports_subscriptions(&self) -> bool {
        true
    }

    async fn subscribe(&self, params: Vec<Value>) -> Result<RawSubscription, TransportError> {
        let req = JsonRpcRequest::new(self.next_id(), "eth_subscribe", params);
        let (tx, rx) = oneshot::channel();
        self.roundtrip(req, Waiting::Subscription(tx), rx).await
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        self.subscriptions.remove(id);
        if !self.is_connected() {
            return Ok(());
        }
        self.request("eth_unsubscribe", vec![Value::String(id.0.clone())])
            .await
            .map(|_| ())
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
    state: Arc<AtomicU8>,
    reconnect: BackoffConfig,
) {
    let mut backoff = Backoff::new(reconnect);

    loop {
        tracing::info!(url = %url, "connecting via WebSocket");

        let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                state.store(STATE_DISCONNECTED, Ordering::Release);
                let delay = backoff.next_delay();
                tracing::warn!(url = %url, error = %e, delay_ms = delay.as_millis() as u64, "WS connect failed");
                if sleep_disconnected(&mut cmd_rx, delay).await {
                    return;
                }
                continue;
            }
        };

        backoff.reset();
        state.store(STATE_CONNECTED, Ordering::Release);
        tracing::info!(url = %url, "WebSocket connected");

        let (mut sink, mut stream) = ws_stream.split();
        let mut waiting: HashMap<u64, Waiting> = HashMap::new();

        let close_requested = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None | Some(WsCommand::Close) => break true,
                        Some(WsCommand::Send { req, waiting: waiter }) => {
                            let text = match serde_json::to_string(&req) {
                                Ok(text) => text,
                                Err(e) => {
                                    waiter.fail(e.into());
                                    continue;
                                }
                            };
                            waiting.insert(req.id.as_number().unwrap_or_default(), waiter);
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                tracing::warn!(url = %url, error = %e, "WS send failed");
                                break false;
                            }
                        }
                    }
                }
                msg = stream.next() => {
                    match msg {
                        None => break false,
                        Some(Err(e)) => {
                            tracing::warn!(url = %url, error = %e, "WS receive error");
                            break false;
                        }
                        Some(Ok(Message::Text(text))) => {
                            handle_message(text.as_str(), &mut waiting, &subscriptions);
                        }
                        Some(Ok(Message::Close(_))) => break false,
                        _ => {}
                    }
                }
            }
        };

        state.store(STATE_DISCONNECTED, Ordering::Release);
        for (_, waiter) in waiting.drain() {
            waiter.fail(TransportError::WebSocket("connection lost".into()));
        }
        subscriptions.clear();

        if close_requested {
            let _ = sink.close().await;
            tracing::debug!(url = %url, "WebSocket closed");
            return;
        }

        let delay = backoff.next_delay();
        tracing::warn!(url = %url, delay_ms = delay.as_millis() as u64, "WS disconnected, reconnecting");
        if sleep_disconnected(&mut cmd_rx, delay).await {
            return;
        }
    }
}

/// Wait out a reconnect delay, rejecting requests that arrive meanwhile.
/// Returns `true` if the transport was closed.
async fn sleep_disconnected(cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>, delay: Duration) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => return true,
                Some(WsCommand::Send { waiting, .. }) => {
                    waiting.fail(TransportError::WebSocket("not connected".into()));
                }
            }
        }
    }
}

fn handle_message(text: &str, waiting: &mut HashMap<u64, Waiting>, subscriptions: &SubscriptionManager) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(Value::as_str) == Some("eth_subscription") {
        if let Some(id) = val["params"]["subscription"].as_str() {
            subscriptions.dispatch(&SubscriptionId(id.to_string()), val["params"]["result"].clone());
        }
        return;
    }

    let resp = match serde_json::from_value::<JsonRpcResponse>(val) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognised WS message");
            return;
        }
    };
    let Some(id) = resp.id.as_number() else {
        return;
    };

    match waiting.remove(&id) {
        Some(Waiting::Response(tx)) => {
            let _ = tx.send(Ok(resp));
        }
        Some(Waiting::Subscription(tx)) => {
            let result = resp
                .into_result()
                .map_err(TransportError::Rpc)
                .and_then(|value| match value {
                    Value::String(sub) => Ok(SubscriptionId(sub)),
                    other => Err(TransportError::Deserialization(format!(
                        "eth_subscribe: expected subscription id, got {other}"
                    ))),
                })
                .map(|sub_id| RawSubscription {
                    rx: subscriptions.register(sub_id.clone()),
                    id: sub_id,
                });
            // Caller gave up (timeout); forget the registration.
            if let Err(Ok(orphan)) = tx.send(result) {
                subscriptions.remove(&orphan.id);
            }
        }
        None => tracing::trace!(id, "response for unknown request id"),
    }
}
