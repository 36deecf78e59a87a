//! chainconnect-http: HTTP JSON-RPC transport backed by `reqwest`.
//!
//! The transport makes exactly one attempt per request. Retrying across
//! endpoints is the job of the fallback provider in the `chainconnect`
//! crate, which needs to see every failure to rank endpoints.

pub mod client;

use std::sync::Arc;

use chainconnect_core::{EthProvider, TransportError};

pub use client::{HttpClientConfig, HttpTransport};

/// A [`chainconnect_core::Provider`] over HTTP.
pub type HttpProvider = EthProvider<HttpTransport>;

/// Build an HTTP provider for `url` with default settings.
pub fn http_provider(url: impl Into<String>) -> Result<Arc<HttpProvider>, TransportError> {
    let transport = HttpTransport::new(url, HttpClientConfig::default())?;
    Ok(Arc::new(EthProvider::new(transport)))
}
