//! Shared per-chain block feeds.
//!
//! Every block watcher on a chain holds a [`BlockLease`] on the same feed
//! task. The feed publishes only strictly increasing block numbers and is
//! torn down when its last lease is dropped. When the resolver replaces the
//! chain's provider the feed reopens its source on the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chainconnect_core::policy::{Backoff, BackoffConfig};
use chainconnect_core::{ChainId, Provider};
use futures::StreamExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::provider::ProviderResolver;
use crate::watch::source::{BlockSource, PollingBlockSource, SubscriptionBlockSource};
use crate::watch::Unwatch;

struct Feed {
    id: u64,
    tx: watch::Sender<Option<u64>>,
    task: JoinHandle<()>,
    on_change: Unwatch,
    leases: usize,
}

impl Feed {
    fn stop(self) {
        self.on_change.cancel();
        self.task.abort();
    }
}

type FeedMap = Mutex<HashMap<ChainId, Feed>>;

fn lock(feeds: &FeedMap) -> MutexGuard<'_, HashMap<ChainId, Feed>> {
    feeds.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct BlockFeeds {
    resolver: Arc<ProviderResolver>,
    polling_interval: Duration,
    feeds: Arc<FeedMap>,
    next_id: Arc<AtomicU64>,
}

impl BlockFeeds {
    pub fn new(resolver: Arc<ProviderResolver>, polling_interval: Duration) -> Self {
        Self {
            resolver,
            polling_interval,
            feeds: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Join the feed for `chain_id`, starting it if needed. Must be called
    /// inside a tokio runtime.
    pub fn lease(&self, chain_id: ChainId) -> Result<BlockLease, Error> {
        if let Some(lease) = self.join(chain_id) {
            return Ok(lease);
        }

        let source = self.source(chain_id)?;
        let mut feeds = lock(&self.feeds);
        if let Some(feed) = feeds.get_mut(&chain_id) {
            feed.leases += 1;
            return Ok(self.lease_for(chain_id, feed));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = watch::channel(None);
        let replaced = Arc::new(Notify::new());
        let on_change = {
            let replaced = Arc::clone(&replaced);
            self.resolver.on_change(move |changed| {
                if *changed == chain_id {
                    replaced.notify_one();
                }
            })
        };
        tracing::debug!(chain_id, source = source.kind(), "starting block feed");
        let task = tokio::spawn(run_feed(chain_id, source, tx.clone(), replaced));
        let feed = feeds.entry(chain_id).or_insert(Feed {
            id,
            tx,
            task,
            on_change,
            leases: 1,
        });
        Ok(self.lease_for(chain_id, feed))
    }

    fn join(&self, chain_id: ChainId) -> Option<BlockLease> {
        let mut feeds = lock(&self.feeds);
        let feed = feeds.get_mut(&chain_id)?;
        feed.leases += 1;
        Some(self.lease_for(chain_id, feed))
    }

    fn lease_for(&self, chain_id: ChainId, feed: &Feed) -> BlockLease {
        BlockLease {
            chain_id,
            id: feed.id,
            rx: feed.tx.subscribe(),
            feeds: Arc::downgrade(&self.feeds),
        }
    }

    fn source(&self, chain_id: ChainId) -> Result<Box<dyn BlockSource>, Error> {
        match self.resolver.resolve_websocket(chain_id) {
            Ok(Some(ws)) if ws.supports_subscriptions() => {
                return Ok(Box::new(SubscriptionBlockSource::new(
                    Arc::clone(&self.resolver),
                    chain_id,
                )));
            }
            Ok(_) => {}
            Err(e) if e.is_fatal_for_watcher() => return Err(e),
            Err(e) => tracing::warn!(chain_id, error = %e, "websocket provider unavailable; polling"),
        }
        self.resolver.resolve(chain_id)?;
        Ok(Box::new(PollingBlockSource::new(
            Arc::clone(&self.resolver),
            chain_id,
            self.polling_interval,
        )))
    }

    /// Number of running feeds.
    pub fn len(&self) -> usize {
        lock(&self.feeds).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every feed. Outstanding leases see their feed end.
    pub fn clear(&self) {
        let feeds: Vec<Feed> = lock(&self.feeds).drain().map(|(_, feed)| feed).collect();
        for feed in feeds {
            feed.stop();
        }
    }
}

async fn run_feed(
    chain_id: ChainId,
    source: Box<dyn BlockSource>,
    tx: watch::Sender<Option<u64>>,
    replaced: Arc<Notify>,
) {
    let mut backoff = Backoff::new(BackoffConfig::default());
    loop {
        match source.open().await {
            Ok(mut blocks) => loop {
                tokio::select! {
                    item = blocks.next() => match item {
                        Some(Ok(number)) => {
                            backoff.reset();
                            tx.send_if_modified(|latest| match *latest {
                                Some(prev) if number <= prev => false,
                                _ => {
                                    *latest = Some(number);
                                    true
                                }
                            });
                        }
                        Some(Err(e)) => tracing::warn!(chain_id, source = source.kind(), error = %e, "block poll failed"),
                        None => {
                            tracing::warn!(chain_id, source = source.kind(), "block stream ended; reopening");
                            break;
                        }
                    },
                    () = replaced.notified() => {
                        tracing::debug!(chain_id, source = source.kind(), "provider replaced; reopening block stream");
                        backoff.reset();
                        break;
                    }
                }
            },
            Err(e) => tracing::warn!(chain_id, source = source.kind(), error = %e, "could not open block stream"),
        }
        tokio::time::sleep(backoff.next_delay()).await;
    }
}

/// One subscriber's share of a block feed.
pub struct BlockLease {
    chain_id: ChainId,
    id: u64,
    rx: watch::Receiver<Option<u64>>,
    feeds: Weak<FeedMap>,
}

impl BlockLease {
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Wait for the next block number above the last one seen through this
    /// lease. `None` once the feed is gone.
    pub async fn changed(&mut self) -> Option<u64> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(number) = *self.rx.borrow_and_update() {
                return Some(number);
            }
        }
    }

    pub fn latest(&self) -> Option<u64> {
        *self.rx.borrow()
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        let Some(feeds) = self.feeds.upgrade() else {
            return;
        };
        let mut feeds = lock(&feeds);
        let last = match feeds.get_mut(&self.chain_id) {
            Some(feed) if feed.id == self.id => {
                feed.leases -= 1;
                feed.leases == 0
            }
            _ => false,
        };
        if last {
            if let Some(feed) = feeds.remove(&self.chain_id) {
                tracing::debug!(chain_id = self.chain_id, "last lease dropped; stopping block feed");
                feed.stop();
            }
        }
    }
}
