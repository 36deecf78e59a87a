//! Ordered fallback across several endpoints of one chain.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chainconnect_core::policy::{EndpointHealth, EndpointHealthConfig, EndpointStatus};
use chainconnect_core::{
    BlockTag, CallRequest, HealthStatus, Log, LogFilter, NotificationStream, Provider,
    TransportError,
};

use crate::config::FallbackConfig;

struct Endpoint {
    provider: Arc<dyn Provider>,
    health: EndpointHealth,
}

/// Tries endpoints in priority order with a per-endpoint timeout.
///
/// An endpoint that fails `failure_threshold` times in a row is skipped until
/// its cooldown runs out; the next request after that tries it again at its
/// own priority, and a success restores it. Endpoints are never removed. When
/// every endpoint is cooling they are all tried, the one degraded longest ago
/// first.
pub struct FallbackProvider {
    endpoints: Vec<Endpoint>,
    request_timeout: Duration,
    label: String,
}

impl FallbackProvider {
    /// `providers` must already be in priority order.
    pub fn new(providers: Vec<Arc<dyn Provider>>, config: &FallbackConfig) -> Self {
        let health = EndpointHealthConfig {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
        };
        let label = format!(
            "fallback({})",
            providers.iter().map(|p| p.url()).collect::<Vec<_>>().join(", ")
        );
        Self {
            endpoints: providers
                .into_iter()
                .map(|provider| Endpoint {
                    provider,
                    health: EndpointHealth::new(health.clone()),
                })
                .collect(),
            request_timeout: config.request_timeout(),
            label,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// `(url, status)` for each endpoint, in priority order.
    pub fn health_summary(&self) -> Vec<(String, EndpointStatus)> {
        self.endpoints
            .iter()
            .map(|e| (e.provider.url().to_string(), e.health.status()))
            .collect()
    }

    /// Usable endpoints in priority order. A cooling endpoint is left out
    /// until its cooldown ends; from then on it is retried from its own slot.
    fn candidates(&self) -> Vec<&Endpoint> {
        let mut usable = Vec::new();
        let mut cooling = Vec::new();
        for endpoint in &self.endpoints {
            match endpoint.health.status() {
                EndpointStatus::Healthy | EndpointStatus::Probing => usable.push(endpoint),
                EndpointStatus::Cooling => cooling.push((endpoint.health.degraded_at(), endpoint)),
            }
        }
        if usable.is_empty() {
            cooling.sort_by_key(|(at, _)| *at);
            return cooling.into_iter().map(|(_, e)| e).collect();
        }
        usable
    }

    async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, TransportError>
    where
        F: Fn(Arc<dyn Provider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, TransportError>> + Send,
        T: Send,
    {
        let mut failures = Vec::new();
        for endpoint in self.candidates() {
            let url = endpoint.provider.url();
            let result = tokio::time::timeout(self.request_timeout, f(Arc::clone(&endpoint.provider)))
                .await
                .unwrap_or(Err(TransportError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                }));

            match result {
                Ok(value) => {
                    endpoint.health.record_success();
                    return Ok(value);
                }
                Err(TransportError::Unsupported { .. }) => {
                    tracing::debug!(url, operation, "endpoint does not support operation; skipping");
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(url, operation, error = %e, "endpoint failed; trying next");
                    endpoint.health.record_failure();
                    failures.push(format!("{url}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }

        if failures.is_empty() {
            return Err(TransportError::Unsupported {
                endpoint: self.label.clone(),
                operation: operation.to_string(),
            });
        }
        Err(TransportError::AllEndpointsFailed { failures })
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn url(&self) -> &str {
        &self.label
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, TransportError> {
        self.run("eth_call", |p| async move { p.call(request).await })
            .await
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        self.run("eth_blockNumber", |p| async move { p.block_number().await })
            .await
    }

    async fn balance(&self, address: Address, block: BlockTag) -> Result<U256, TransportError> {
        self.run("eth_getBalance", |p| async move { p.balance(address, block).await })
            .await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, TransportError> {
        self.run("eth_getLogs", |p| async move { p.logs(filter).await })
            .await
    }

    async fn gas_price(&self) -> Result<U256, TransportError> {
        self.run("eth_gasPrice", |p| async move { p.gas_price().await })
            .await
    }

    async fn base_fee_per_gas(&self) -> Result<Option<U256>, TransportError> {
        self.run("eth_getBlockByNumber", |p| async move { p.base_fee_per_gas().await })
            .await
    }

    fn health(&self) -> HealthStatus {
        let usable = self
            .endpoints
            .iter()
            .filter(|e| e.health.status() != EndpointStatus::Cooling)
            .count();
        match usable {
            0 => HealthStatus::Unhealthy,
            n if n == self.endpoints.len() => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }

    fn supports_subscriptions(&self) -> bool {
        self.endpoints.iter().any(|e| e.provider.supports_subscriptions())
    }

    async fn subscribe_blocks(&self) -> Result<NotificationStream<u64>, TransportError> {
        self.run("newHeads subscription", |p| async move { p.subscribe_blocks().await })
            .await
    }

    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<NotificationStream<Log>, TransportError> {
        self.run("logs subscription", |p| async move { p.subscribe_logs(filter).await })
            .await
    }
}
