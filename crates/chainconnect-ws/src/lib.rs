//! chainconnect-ws: WebSocket JSON-RPC transport with auto-reconnect.
//!
//! # Features
//! - Auto-reconnect on disconnect (exponential backoff)
//! - `eth_subscribe` / `eth_unsubscribe` streams
//! - Request multiplexing over a single connection
//!
//! Subscription streams end when the connection drops; consumers open a
//! fresh subscription once the transport has reconnected.

pub mod client;
pub mod subscriptions;

use std::sync::Arc;

use chainconnect_core::{EthProvider, TransportError};

pub use client::{WsConfig, WsTransport};
pub use subscriptions::SubscriptionManager;

/// A [`chainconnect_core::Provider`] over WebSocket.
pub type WsProvider = EthProvider<WsTransport>;

/// Connect a WebSocket provider for `url` with default settings.
///
/// Must be called from within a tokio runtime.
pub fn ws_provider(url: impl Into<String>) -> Result<Arc<WsProvider>, TransportError> {
    let transport = WsTransport::connect(url, WsConfig::default())?;
    Ok(Arc::new(EthProvider::new(transport)))
}
