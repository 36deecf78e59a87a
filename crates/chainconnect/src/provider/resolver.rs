//! Per-chain provider cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chainconnect_core::{ChainDescriptor, ChainId, ChainRegistry, Provider};

use crate::config::{EvictionConfig, FallbackConfig};
use crate::error::Error;
use crate::listeners::Listeners;
use crate::provider::factories::{ProviderConfig, ProviderFactory};
use crate::provider::fallback::FallbackProvider;
use crate::provider::handle::ProviderHandle;
use crate::watch::Unwatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Http,
    WebSocket,
}

/// Resolves chain ids to cached [`ProviderHandle`]s.
///
/// Handles are built lazily from the configured factories and kept until
/// they are invalidated, their chain is re-registered, or their failure rate
/// crosses the eviction threshold. Listeners registered with
/// [`ProviderResolver::on_change`] hear about every chain whose handle was
/// replaced.
pub struct ProviderResolver {
    chains: RwLock<ChainRegistry>,
    factories: Vec<Arc<dyn ProviderFactory>>,
    fallback: FallbackConfig,
    eviction: EvictionConfig,
    http: Mutex<HashMap<ChainId, ProviderHandle>>,
    ws: Mutex<HashMap<ChainId, ProviderHandle>>,
    changed: Listeners<ChainId>,
}

impl ProviderResolver {
    pub fn new(
        chains: ChainRegistry,
        factories: Vec<Arc<dyn ProviderFactory>>,
        fallback: FallbackConfig,
        eviction: EvictionConfig,
    ) -> Self {
        Self {
            chains: RwLock::new(chains),
            factories,
            fallback,
            eviction,
            http: Mutex::new(HashMap::new()),
            ws: Mutex::new(HashMap::new()),
            changed: Listeners::new(),
        }
    }

    fn cache(&self, kind: Kind) -> MutexGuard<'_, HashMap<ChainId, ProviderHandle>> {
        let cache = match kind {
            Kind::Http => &self.http,
            Kind::WebSocket => &self.ws,
        };
        cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Chains ──────────────────────────────────────────────────────────────

    pub fn chain(&self, chain_id: ChainId) -> Option<Arc<ChainDescriptor>> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chain_id)
    }

    pub fn chains(&self) -> Vec<Arc<ChainDescriptor>> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all()
            .to_vec()
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(chain_id)
    }

    /// The first configured chain.
    pub fn default_chain_id(&self) -> Option<ChainId> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default_chain()
            .map(|c| c.id)
    }

    /// Add a chain or replace an existing one. Cached handles for it are
    /// dropped and change listeners are notified.
    pub fn register_chain(&self, chain: ChainDescriptor) -> Result<(), Error> {
        let chain_id = chain.id;
        let replaced = self
            .chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(chain)
            .map_err(|e| Error::InvalidChainConfig(e.to_string()))?;
        tracing::info!(chain_id, replaced = replaced.is_some(), "chain registered");
        self.invalidate(chain_id);
        Ok(())
    }

    // ─── Resolution ──────────────────────────────────────────────────────────

    /// The HTTP provider handle for `chain_id`. Builds it on first use; no
    /// request is sent.
    pub fn resolve(&self, chain_id: ChainId) -> Result<ProviderHandle, Error> {
        self.resolve_kind(chain_id, Kind::Http)?
            .ok_or(Error::ProviderChainsNotFound { chain_id })
    }

    /// The WebSocket provider handle for `chain_id`, or `None` when no
    /// factory offers one.
    pub fn resolve_websocket(&self, chain_id: ChainId) -> Result<Option<ProviderHandle>, Error> {
        self.resolve_kind(chain_id, Kind::WebSocket)
    }

    fn resolve_kind(&self, chain_id: ChainId, kind: Kind) -> Result<Option<ProviderHandle>, Error> {
        let chain = self
            .chain(chain_id)
            .ok_or(Error::ChainNotConfigured { chain_id })?;

        let mut evicted = false;
        let handle = {
            let mut cache = self.cache(kind);
            if let Some(handle) = cache.get(&chain_id) {
                if !handle.should_evict(&self.eviction) {
                    return Ok(Some(handle.clone()));
                }
                tracing::warn!(chain_id, ?kind, url = handle.url(), "evicting failing provider");
                cache.remove(&chain_id);
                evicted = true;
            }
            let handle = self.build(&chain, kind);
            if let Some(handle) = &handle {
                cache.insert(chain_id, handle.clone());
            }
            handle
        };

        if evicted {
            self.changed.emit(&chain_id);
        }
        Ok(handle)
    }

    fn build(&self, chain: &ChainDescriptor, kind: Kind) -> Option<ProviderHandle> {
        let mut configs: Vec<ProviderConfig> = Vec::new();
        for factory in &self.factories {
            let produced = match kind {
                Kind::Http => factory.providers(chain),
                Kind::WebSocket => factory.websocket(chain).map(|ws| ws.into_iter().collect()),
            };
            match produced {
                Ok(produced) => configs.extend(produced),
                Err(e) => tracing::warn!(
                    chain_id = chain.id,
                    factory = factory.name(),
                    ?kind,
                    error = %e,
                    "provider factory failed"
                ),
            }
        }
        configs.sort_by_key(|c| c.priority);

        let provider: Arc<dyn Provider> = match configs.len() {
            0 => return None,
            1 => configs.remove(0).provider,
            _ => Arc::new(FallbackProvider::new(
                configs.into_iter().map(|c| c.provider).collect(),
                &self.fallback,
            )),
        };
        tracing::debug!(chain_id = chain.id, ?kind, url = provider.url(), "provider built");
        Some(ProviderHandle::new(
            chain.id,
            provider,
            chain.multicall_address(),
            &self.eviction,
        ))
    }

    /// Resolve every configured chain once.
    pub fn validate(&self) -> Result<(), Error> {
        for chain in self.chains() {
            self.resolve(chain.id)?;
        }
        Ok(())
    }

    /// Drop cached handles for `chain_id`; the next resolve rebuilds them.
    pub fn invalidate(&self, chain_id: ChainId) {
        let http = self.cache(Kind::Http).remove(&chain_id);
        let ws = self.cache(Kind::WebSocket).remove(&chain_id);
        if http.is_some() || ws.is_some() {
            tracing::debug!(chain_id, "provider cache invalidated");
        }
        self.changed.emit(&chain_id);
    }

    pub fn on_change(&self, callback: impl Fn(&ChainId) + Send + Sync + 'static) -> Unwatch {
        self.changed.subscribe(callback)
    }

    /// Drop every cached handle and listener.
    pub fn clear(&self) {
        self.cache(Kind::Http).clear();
        self.cache(Kind::WebSocket).clear();
        self.changed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use async_trait::async_trait;
    use chainconnect_core::{
        chains, BlockTag, CallRequest, Log, LogFilter, TransportError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub(String);

    #[async_trait]
    impl Provider for Stub {
        fn url(&self) -> &str {
            &self.0
        }
        async fn call(&self, _r: &CallRequest) -> Result<Bytes, TransportError> {
            Err(TransportError::Http("down".into()))
        }
        async fn block_number(&self) -> Result<u64, TransportError> {
            Ok(1)
        }
        async fn balance(&self, _a: Address, _b: BlockTag) -> Result<U256, TransportError> {
            Ok(U256::ZERO)
        }
        async fn logs(&self, _f: &LogFilter) -> Result<Vec<Log>, TransportError> {
            Ok(vec![])
        }
    }

    struct Counting {
        chains: Vec<ChainId>,
        urls: Vec<(&'static str, u32)>,
        built: AtomicUsize,
    }

    impl ProviderFactory for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn providers(&self, chain: &ChainDescriptor) -> Result<Vec<ProviderConfig>, TransportError> {
            if !self.chains.contains(&chain.id) {
                return Ok(vec![]);
            }
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .urls
                .iter()
                .map(|(url, priority)| ProviderConfig::new(Arc::new(Stub(url.to_string())), *priority))
                .collect())
        }
    }

    fn resolver(factory: Arc<Counting>, eviction: EvictionConfig) -> ProviderResolver {
        ProviderResolver::new(
            ChainRegistry::new(vec![chains::mainnet(), chains::polygon()]).unwrap(),
            vec![factory as Arc<dyn ProviderFactory>],
            FallbackConfig::default(),
            eviction,
        )
    }

    fn counting(chains: Vec<ChainId>, urls: Vec<(&'static str, u32)>) -> Arc<Counting> {
        Arc::new(Counting {
            chains,
            urls,
            built: AtomicUsize::new(0),
        })
    }

    #[test]
    fn unknown_chain() {
        let r = resolver(counting(vec![1], vec![("a", 0)]), EvictionConfig::default());
        assert_eq!(
            r.resolve(999).unwrap_err(),
            Error::ChainNotConfigured { chain_id: 999 }
        );
    }

    #[test]
    fn chain_without_endpoints() {
        let r = resolver(counting(vec![1], vec![("a", 0)]), EvictionConfig::default());
        assert_eq!(
            r.resolve(137).unwrap_err(),
            Error::ProviderChainsNotFound { chain_id: 137 }
        );
        assert!(r.validate().is_err());
    }

    #[test]
    fn handles_are_cached_and_ordered_by_priority() {
        let factory = counting(vec![1, 137], vec![("slow", 5), ("fast", 0)]);
        let r = resolver(factory.clone(), EvictionConfig::default());

        let a = r.resolve(1).unwrap();
        let b = r.resolve(1).unwrap();
        assert!(a.same(&b));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
        assert_eq!(a.url(), "fallback(fast, slow)");
        assert!(a.supports_multicall());
    }

    #[test]
    fn single_endpoint_is_used_directly() {
        let r = resolver(counting(vec![1], vec![("only", 0)]), EvictionConfig::default());
        assert_eq!(r.resolve(1).unwrap().url(), "only");
        assert!(r.resolve_websocket(1).unwrap().is_none());
    }

    #[test]
    fn invalidate_rebuilds_and_notifies() {
        let r = resolver(counting(vec![1], vec![("a", 0)]), EvictionConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _unwatch = r.on_change(move |id| s.lock().unwrap().push(*id));

        let before = r.resolve(1).unwrap();
        r.invalidate(1);
        let after = r.resolve(1).unwrap();
        assert!(!before.same(&after));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn failing_handle_is_evicted() {
        let eviction = EvictionConfig {
            min_samples: 2,
            ..Default::default()
        };
        let r = resolver(counting(vec![1], vec![("a", 0)]), eviction);
        let first = r.resolve(1).unwrap();
        let request = CallRequest::new(Address::ZERO, Bytes::new());
        let _ = first.call(&request).await;
        let _ = first.call(&request).await;

        let second = r.resolve(1).unwrap();
        assert!(!first.same(&second));
    }

    #[test]
    fn register_chain_replaces_descriptor() {
        let r = resolver(counting(vec![1, 10], vec![("a", 0)]), EvictionConfig::default());
        assert!(!r.contains(10));
        r.register_chain(chains::optimism()).unwrap();
        assert!(r.resolve(10).is_ok());
        assert_eq!(r.default_chain_id(), Some(1));
    }
}
