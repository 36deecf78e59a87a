//! Where head block numbers come from: a `newHeads` subscription or polling.
//!
//! Sources hold the resolver rather than a provider handle, so a handle that
//! was evicted or invalidated is replaced on the next poll or reopen.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainconnect_core::{ChainId, NotificationStream, Provider, TransportError};
use futures::stream::{self, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::error::Error;
use crate::provider::ProviderResolver;

/// Strategy chosen once per block feed.
#[async_trait]
pub trait BlockSource: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// Head block numbers, with per-poll errors inline. Subscription streams
    /// end when the connection drops; the feed reopens them.
    async fn open(&self) -> Result<NotificationStream<Result<u64, Error>>, Error>;
}

/// `eth_blockNumber` every `interval`, starting immediately.
pub struct PollingBlockSource {
    resolver: Arc<ProviderResolver>,
    chain_id: ChainId,
    interval: Duration,
}

impl PollingBlockSource {
    pub fn new(resolver: Arc<ProviderResolver>, chain_id: ChainId, interval: Duration) -> Self {
        Self {
            resolver,
            chain_id,
            interval,
        }
    }
}

#[async_trait]
impl BlockSource for PollingBlockSource {
    fn kind(&self) -> &'static str {
        "polling"
    }

    async fn open(&self) -> Result<NotificationStream<Result<u64, Error>>, Error> {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let state = (ticker, Arc::clone(&self.resolver), self.chain_id);

        Ok(stream::unfold(state, |(mut ticker, resolver, chain_id)| async move {
            ticker.tick().await;
            let result = match resolver.resolve(chain_id) {
                Ok(provider) => provider.block_number().await.map_err(Error::Provider),
                Err(e) => Err(e),
            };
            Some((result, (ticker, resolver, chain_id)))
        })
        .boxed())
    }
}

/// `eth_subscribe("newHeads")` on the chain's WebSocket provider.
pub struct SubscriptionBlockSource {
    resolver: Arc<ProviderResolver>,
    chain_id: ChainId,
}

impl SubscriptionBlockSource {
    pub fn new(resolver: Arc<ProviderResolver>, chain_id: ChainId) -> Self {
        Self { resolver, chain_id }
    }
}

#[async_trait]
impl BlockSource for SubscriptionBlockSource {
    fn kind(&self) -> &'static str {
        "subscription"
    }

    async fn open(&self) -> Result<NotificationStream<Result<u64, Error>>, Error> {
        let Some(provider) = self.resolver.resolve_websocket(self.chain_id)? else {
            return Err(Error::Provider(TransportError::Unsupported {
                endpoint: format!("chain {}", self.chain_id),
                operation: "eth_subscribe".into(),
            }));
        };
        let heads = provider.subscribe_blocks().await?;
        Ok(heads.map(Ok).boxed())
    }
}
