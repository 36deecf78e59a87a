//! Chain descriptors and the registry of configured chains.

use std::sync::Arc;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Numeric EIP-155 chain id.
pub type ChainId = u64;

/// Errors raised while building a [`ChainRegistry`].
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain {0} is registered twice")]
    Duplicate(ChainId),

    #[error("invalid chain definition: {0}")]
    Invalid(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl NativeCurrency {
    pub fn ether() -> Self {
        Self {
            name: "Ether".into(),
            symbol: "ETH".into(),
            decimals: 18,
        }
    }
}

/// Deployed multicall contract (Multicall3 `aggregate3` interface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticallContract {
    pub address: Address,
    #[serde(default)]
    pub block_created: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExplorer {
    pub name: String,
    pub url: String,
}

/// Static description of a chain. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    pub id: ChainId,
    pub name: String,
    /// Short slug, e.g. `"homestead"`, `"optimism"`.
    pub network: String,
    pub native_currency: NativeCurrency,
    /// HTTP JSON-RPC endpoints in priority order.
    pub rpc_urls: Vec<String>,
    /// WebSocket endpoints in priority order.
    #[serde(default)]
    pub ws_urls: Vec<String>,
    #[serde(default)]
    pub multicall: Option<MulticallContract>,
    #[serde(default)]
    pub block_explorer: Option<BlockExplorer>,
    #[serde(default)]
    pub testnet: bool,
}

impl ChainDescriptor {
    /// Minimal descriptor with ETH as native currency.
    pub fn new(id: ChainId, name: impl Into<String>, rpc_urls: Vec<String>) -> Self {
        let name = name.into();
        Self {
            id,
            network: name.to_ascii_lowercase().replace(' ', "-"),
            name,
            native_currency: NativeCurrency::ether(),
            rpc_urls,
            ws_urls: vec![],
            multicall: None,
            block_explorer: None,
            testnet: false,
        }
    }

    #[must_use]
    pub fn with_multicall(mut self, address: Address) -> Self {
        self.multicall = Some(MulticallContract {
            address,
            block_created: None,
        });
        self
    }

    #[must_use]
    pub fn with_ws_urls(mut self, ws_urls: Vec<String>) -> Self {
        self.ws_urls = ws_urls;
        self
    }

    pub fn multicall_address(&self) -> Option<Address> {
        self.multicall.as_ref().map(|m| m.address)
    }

    fn validate(&self) -> Result<(), ChainError> {
        if self.id == 0 {
            return Err(ChainError::Invalid(format!("{}: chain id 0", self.name)));
        }
        for url in self.rpc_urls.iter().chain(&self.ws_urls) {
            if !url.contains("://") {
                return Err(ChainError::Invalid(format!("{}: bad url {url}", self.name)));
            }
        }
        Ok(())
    }
}

/// Ordered set of configured chains. The first chain is the default chain
/// used when no wallet is connected.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: Vec<Arc<ChainDescriptor>>,
}

impl ChainRegistry {
    pub fn new(chains: Vec<ChainDescriptor>) -> Result<Self, ChainError> {
        let mut registry = Self::default();
        for chain in chains {
            chain.validate()?;
            if registry.get(chain.id).is_some() {
                return Err(ChainError::Duplicate(chain.id));
            }
            registry.chains.push(Arc::new(chain));
        }
        Ok(registry)
    }

    /// Parse a YAML list of chain descriptors.
    pub fn from_yaml(yaml: &str) -> Result<Self, ChainError> {
        let chains: Vec<ChainDescriptor> = serde_yaml::from_str(yaml)?;
        Self::new(chains)
    }

    pub fn get(&self, id: ChainId) -> Option<Arc<ChainDescriptor>> {
        self.chains.iter().find(|c| c.id == id).cloned()
    }

    pub fn contains(&self, id: ChainId) -> bool {
        self.chains.iter().any(|c| c.id == id)
    }

    /// Insert or replace a chain. Returns the replaced descriptor.
    pub fn upsert(&mut self, chain: ChainDescriptor) -> Result<Option<Arc<ChainDescriptor>>, ChainError> {
        chain.validate()?;
        let chain = Arc::new(chain);
        match self.chains.iter_mut().find(|c| c.id == chain.id) {
            Some(slot) => Ok(Some(std::mem::replace(slot, chain))),
            None => {
                self.chains.push(chain);
                Ok(None)
            }
        }
    }

    pub fn default_chain(&self) -> Option<Arc<ChainDescriptor>> {
        self.chains.first().cloned()
    }

    pub fn all(&self) -> &[Arc<ChainDescriptor>] {
        &self.chains
    }

    pub fn ids(&self) -> Vec<ChainId> {
        self.chains.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Normalize a chain id as wallets report it: JSON number, decimal string
/// or hex string (`"0x89"`).
pub fn normalize_chain_id(value: &Value) -> Option<ChainId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => ChainId::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(id: ChainId) -> ChainDescriptor {
        ChainDescriptor::new(id, format!("Chain {id}"), vec![format!("https://rpc{id}.example")])
    }

    #[test]
    fn first_chain_is_default() {
        let registry = ChainRegistry::new(vec![chain(10), chain(1)]).unwrap();
        assert_eq!(registry.default_chain().unwrap().id, 10);
        assert_eq!(registry.ids(), vec![10, 1]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = ChainRegistry::new(vec![chain(1), chain(1)]).unwrap_err();
        assert!(matches!(err, ChainError::Duplicate(1)));
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut registry = ChainRegistry::new(vec![chain(1), chain(5)]).unwrap();
        let mut updated = chain(1);
        updated.rpc_urls = vec!["https://other.example".into()];
        let previous = registry.upsert(updated).unwrap();
        assert_eq!(previous.unwrap().rpc_urls[0], "https://rpc1.example");
        assert_eq!(registry.get(1).unwrap().rpc_urls[0], "https://other.example");
        assert_eq!(registry.ids(), vec![1, 5]);
    }

    #[test]
    fn from_yaml() {
        let yaml = r#"
- id: 31337
  name: Foundry
  network: foundry
  nativeCurrency: { name: Ether, symbol: ETH, decimals: 18 }
  rpcUrls: ["http://127.0.0.1:8545"]
  wsUrls: ["ws://127.0.0.1:8545"]
  multicall:
    address: "0xcA11bde05977b3631167028862bE2a173976CA11"
"#;
        let registry = ChainRegistry::from_yaml(yaml).unwrap();
        let foundry = registry.get(31337).unwrap();
        assert_eq!(foundry.ws_urls.len(), 1);
        assert!(foundry.multicall_address().is_some());
        assert!(!foundry.testnet);
    }

    #[test]
    fn normalize_ids() {
        assert_eq!(normalize_chain_id(&json!(137)), Some(137));
        assert_eq!(normalize_chain_id(&json!("0x89")), Some(137));
        assert_eq!(normalize_chain_id(&json!("137")), Some(137));
        assert_eq!(normalize_chain_id(&json!(null)), None);
    }
}
