//! Chain-bound provider handle.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chainconnect_core::policy::FailureWindow;
use chainconnect_core::{
    BlockTag, CallRequest, ChainId, HealthStatus, Log, LogFilter, NotificationStream, Provider,
    TransportError,
};

use crate::config::EvictionConfig;

struct HandleInner {
    chain_id: ChainId,
    provider: Arc<dyn Provider>,
    multicall: Option<Address>,
    failures: FailureWindow,
}

/// A provider bound to one chain, as cached by the resolver.
///
/// Every request outcome is recorded in a sliding failure window; the
/// resolver evicts handles whose hard-failure rate gets too high.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<HandleInner>,
}

impl ProviderHandle {
    pub fn new(
        chain_id: ChainId,
        provider: Arc<dyn Provider>,
        multicall: Option<Address>,
        eviction: &EvictionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                chain_id,
                provider,
                multicall,
                failures: FailureWindow::new(eviction.window()),
            }),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.inner.chain_id
    }

    pub fn supports_multicall(&self) -> bool {
        self.inner.multicall.is_some()
    }

    pub fn multicall_address(&self) -> Option<Address> {
        self.inner.multicall
    }

    pub fn should_evict(&self, eviction: &EvictionConfig) -> bool {
        self.inner
            .failures
            .exceeds(eviction.max_failure_rate, eviction.min_samples)
    }

    /// Whether both handles point at the same cached instance.
    pub fn same(&self, other: &ProviderHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn record<T>(&self, result: &Result<T, TransportError>) {
        let failed = matches!(result, Err(e) if e.is_retryable());
        self.inner.failures.record(failed);
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("chain_id", &self.inner.chain_id)
            .field("url", &self.inner.provider.url())
            .field("multicall", &self.inner.multicall)
            .finish()
    }
}

#[async_trait]
impl Provider for ProviderHandle {
    fn url(&self) -> &str {
        self.inner.provider.url()
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError> {
        let result = self.inner.provider.call(request).await;
        self.record(&result);
        result
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        let result = self.inner.provider.block_number().await;
        self.record(&result);
        result
    }

    async fn balance(&self, address: Address, block: BlockTag) -> Result<U256, TransportError> {
        let result = self.inner.provider.balance(address, block).await;
        self.record(&result);
        result
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, TransportError> {
        let result = self.inner.provider.logs(filter).await;
        self.record(&result);
        result
    }

    async fn gas_price(&self) -> Result<U256, TransportError> {
        let result = self.inner.provider.gas_price().await;
        self.record(&result);
        result
    }

    async fn base_fee_per_gas(&self) -> Result<Option<U256>, TransportError> {
        let result = self.inner.provider.base_fee_per_gas().await;
        self.record(&result);
        result
    }

    fn health(&self) -> HealthStatus {
        self.inner.provider.health()
    }

    fn supports_subscriptions(&self) -> bool {
        self.inner.provider.supports_subscriptions()
    }

    async fn subscribe_blocks(&self) -> Result<NotificationStream<u64>, TransportError> {
        let result = self.inner.provider.subscribe_blocks().await;
        self.record(&result);
        result
    }

    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<NotificationStream<Log>, TransportError> {
        let result = self.inner.provider.subscribe_logs(filter).await;
        self.record(&result);
        result
    }
}
