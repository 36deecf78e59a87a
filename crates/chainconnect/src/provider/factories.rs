//! Provider factories: turn a chain descriptor into concrete endpoints.
//!
//! Each factory may produce zero or more HTTP endpoints and at most one
//! WebSocket endpoint for a chain. The resolver merges the output of every
//! configured factory and sorts it by `priority` (lower is preferred).

use std::sync::Arc;

use chainconnect_core::{ChainDescriptor, ChainId, Provider, TransportError};
use chainconnect_http::http_provider;
use chainconnect_ws::ws_provider;

/// One endpoint produced by a factory.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Arc<dyn Provider>,
    pub priority: u32,
}

impl ProviderConfig {
    pub fn new(provider: Arc<dyn Provider>, priority: u32) -> Self {
        Self { provider, priority }
    }

    fn http(url: &str, priority: u32) -> Result<Self, TransportError> {
        Ok(Self::new(http_provider(url)?, priority))
    }

    fn ws(url: &str, priority: u32) -> Result<Self, TransportError> {
        Ok(Self::new(ws_provider(url)?, priority))
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("url", &self.provider.url())
            .field("priority", &self.priority)
            .finish()
    }
}

pub trait ProviderFactory: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// HTTP endpoints for `chain`. An empty list means this factory does
    /// not serve the chain.
    fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError>;

    /// WebSocket endpoint for `chain`, if the factory has one.
    fn websocket(&self, chain: &ChainDescriptor) -> Result<Option<ProviderConfig>, TransportError> {
        let _ = chain;
        Ok(None)
    }
}

// ─── Public ──────────────────────────────────────────────────────────────────

/// The chain's own `rpc_urls` / `ws_urls`.
#[derive(Debug, Clone, Default)]
pub struct PublicProvider {
    pub priority: u32,
    /// Open a WebSocket connection to the chain's first `ws_urls` entry.
    pub websocket: bool,
}

impl PublicProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_websocket(mut self) -> Self {
        self.websocket = true;
        self
    }
}

impl ProviderFactory for PublicProvider {
    fn name(&self) -> &str {
        "public"
    }

    fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError> {
        chain
            .rpc_urls
            .iter()
            .map(|url| ProviderConfig::http(url, self.priority))
            .collect()
    }

    fn websocket(&self, chain: &ChainDescriptor) -> Result<Option<ProviderConfig>, TransportError> {
        if !self.websocket {
            return Ok(None);
        }
        chain
            .ws_urls
            .first()
            .map(|url| ProviderConfig::ws(url, self.priority))
            .transpose()
    }
}

// ─── JSON-RPC ────────────────────────────────────────────────────────────────

/// Endpoint URLs returned by a [`JsonRpcProvider`] mapping function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcUrls {
    pub http: String,
    pub ws: Option<String>,
}

type UrlFn = dyn Fn(&ChainDescriptor) -> Option<JsonRpcUrls> + Send + Sync;

/// Endpoints computed by a user function; `None` skips the chain.
pub struct JsonRpcProvider {
    priority: u32,
    rpc: Arc<UrlFn>,
}

impl JsonRpcProvider {
    pub fn new(rpc: impl Fn(&ChainDescriptor) -> Option<JsonRpcUrls> + Send + Sync + 'static) -> Self {
        Self {
            priority: 0,
            rpc: Arc::new(rpc),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

impl ProviderFactory for JsonRpcProvider {
    fn name(&self) -> &str {
        "jsonRpc"
    }

    fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError> {
        match (self.rpc)(chain) {
            Some(urls) => Ok(vec![ProviderConfig::http(&urls.http, self.priority)?]),
            None => Ok(Vec::new()),
        }
    }

    fn websocket(&self, chain: &ChainDescriptor) -> Result<Option<ProviderConfig>, TransportError> {
        (self.rpc)(chain)
            .and_then(|urls| urls.ws)
            .map(|url| ProviderConfig::ws(&url, self.priority))
            .transpose()
    }
}

// ─── Alchemy ─────────────────────────────────────────────────────────────────

/// Alchemy-hosted endpoints for the networks it serves.
#[derive(Debug, Clone)]
pub struct AlchemyProvider {
    api_key: String,
    priority: u32,
    websocket: bool,
}

impl AlchemyProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            priority: 0,
            websocket: false,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_websocket(mut self) -> Self {
        self.websocket = true;
        self
    }

    pub fn http_url(&self, chain_id: ChainId) -> Option<String> {
        let network = alchemy_network(chain_id)?;
        Some(format!("https://{network}.g.alchemy.com/v2/{}", self.api_key))
    }

    pub fn ws_url(&self, chain_id: ChainId) -> Option<String> {
        let network = alchemy_network(chain_id)?;
        Some(format!("wss://{network}.g.alchemy.com/v2/{}", self.api_key))
    }
}

fn alchemy_network(chain_id: ChainId) -> Option<&'static str> {
    Some(match chain_id {
        1 => "eth-mainnet",
        5 => "eth-goerli",
        11155111 => "eth-sepolia",
        137 => "polygon-mainnet",
        80001 => "polygon-mumbai",
        42161 => "arb-mainnet",
        421614 => "arb-sepolia",
        10 => "opt-mainnet",
        11155420 => "opt-sepolia",
        8453 => "base-mainnet",
        84532 => "base-sepolia",
        _ => return None,
    })
}

impl ProviderFactory for AlchemyProvider {
    fn name(&self) -> &str {
        "alchemy"
    }

    fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError> {
        self.http_url(chain.id)
            .map(|url| ProviderConfig::http(&url, self.priority))
            .into_iter()
            .collect()
    }

    fn websocket(&self, chain: &ChainDescriptor) -> Result<Option<ProviderConfig>, TransportError> {
        if !self.websocket {
            return Ok(None);
        }
        self.ws_url(chain.id)
            .map(|url| ProviderConfig::ws(&url, self.priority))
            .transpose()
    }
}

// ─── Infura ──────────────────────────────────────────────────────────────────

/// Infura-hosted endpoints for the networks it serves.
#[derive(Debug, Clone)]
pub struct InfuraProvider {
    project_id: String,
    priority: u32,
    websocket: bool,
}

impl InfuraProvider {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            priority: 0,
            websocket: false,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_websocket(mut self) -> Self {
        self.websocket = true;
        self
    }

    pub fn http_url(&self, chain_id: ChainId) -> Option<String> {
        let network = infura_network(chain_id)?;
        Some(format!("https://{network}.infura.io/v3/{}", self.project_id))
    }

    pub fn ws_url(&self, chain_id: ChainId) -> Option<String> {
        let network = infura_network(chain_id)?;
        Some(format!("wss://{network}.infura.io/ws/v3/{}", self.project_id))
    }
}

fn infura_network(chain_id: ChainId) -> Option<&'static str> {
    Some(match chain_id {
        1 => "mainnet",
        5 => "goerli",
        11155111 => "sepolia",
        137 => "polygon-mainnet",
        80001 => "polygon-mumbai",
        42161 => "arbitrum-mainnet",
        10 => "optimism-mainnet",
        8453 => "base-mainnet",
        _ => return None,
    })
}

impl ProviderFactory for InfuraProvider {
    fn name(&self) -> &str {
        "infura"
    }

    fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError> {
        self.http_url(chain.id)
            .map(|url| ProviderConfig::http(&url, self.priority))
            .into_iter()
            .collect()
    }

    fn websocket(&self, chain: &ChainDescriptor) -> Result<Option<ProviderConfig>, TransportError> {
        if !self.websocket {
            return Ok(None);
        }
        self.ws_url(chain.id)
            .map(|url| ProviderConfig::ws(&url, self.priority))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainconnect_core::chains;

    #[test]
    fn alchemy_urls() {
        let alchemy = AlchemyProvider::new("test_key");
        assert_eq!(
            alchemy.http_url(1).as_deref(),
            Some("https://eth-mainnet.g.alchemy.com/v2/test_key")
        );
        assert!(alchemy.ws_url(8453).unwrap().starts_with("wss://base-mainnet"));
        assert_eq!(alchemy.http_url(31337), None);
    }

    #[test]
    fn infura_urls() {
        let infura = InfuraProvider::new("proj123");
        assert_eq!(
            infura.http_url(1).as_deref(),
            Some("https://mainnet.infura.io/v3/proj123")
        );
        assert_eq!(
            infura.ws_url(11155111).as_deref(),
            Some("wss://sepolia.infura.io/ws/v3/proj123")
        );
    }

    #[test]
    fn unsupported_network_yields_no_endpoints() {
        let infura = InfuraProvider::new("p");
        assert!(infura.providers(&chains::localhost()).unwrap().is_empty());
    }

    #[test]
    fn public_uses_chain_urls() {
        let chain = chains::mainnet();
        let configs = PublicProvider::new().with_priority(2).providers(&chain).unwrap();
        assert_eq!(configs.len(), chain.rpc_urls.len());
        assert!(configs.iter().all(|c| c.priority == 2));
        assert_eq!(configs[0].provider.url(), chain.rpc_urls[0]);
    }

    #[test]
    fn json_rpc_mapping_can_skip_chains() {
        let factory = JsonRpcProvider::new(|chain| {
            (chain.id == 1).then(|| JsonRpcUrls {
                http: "http://127.0.0.1:8545".into(),
                ws: None,
            })
        });
        assert_eq!(factory.providers(&chains::mainnet()).unwrap().len(), 1);
        assert!(factory.providers(&chains::polygon()).unwrap().is_empty());
        assert!(factory.websocket(&chains::mainnet()).unwrap().is_none());
    }
}
