//! Watcher task bodies.

use std::sync::Arc;

use chainconnect_core::policy::{Backoff, BackoffConfig};
use chainconnect_core::{ChainId, Log, LogFilter, Provider};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::Error;
use crate::provider::ProviderResolver;
use crate::watch::feeds::{BlockFeeds, BlockLease};
use crate::watch::{ContextChange, Gate, WatchOptions, WatchTarget};

pub(crate) type ReadFn<T> = Arc<dyn Fn(ChainId) -> BoxFuture<'static, T> + Send + Sync>;
pub(crate) type Deliver<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub(crate) type EventBatch = Result<Vec<Log>, Error>;

/// A value a read watcher can compare and deliver.
pub(crate) trait WatchValue: Clone + PartialEq + Send + Sync + 'static {
    /// Stop the watcher after delivering this value.
    fn is_fatal(&self) -> bool;
}

impl<V: Clone + PartialEq + Send + Sync + 'static> WatchValue for Result<V, Error> {
    fn is_fatal(&self) -> bool {
        matches!(self, Err(e) if e.is_fatal_for_watcher())
    }
}

/// What every watcher task needs from the client.
pub(crate) struct WatchContext {
    pub feeds: BlockFeeds,
    pub resolver: Arc<ProviderResolver>,
    pub current_chain: Arc<dyn Fn() -> ChainId + Send + Sync>,
    pub changes: broadcast::Receiver<ContextChange>,
}

impl WatchContext {
    fn chain_for(&self, target: WatchTarget) -> ChainId {
        match target {
            WatchTarget::Fixed(chain_id) => chain_id,
            WatchTarget::Current => (self.current_chain)(),
        }
    }

    fn lease(&self, chain_id: ChainId, enabled: bool) -> Option<BlockLease> {
        if !enabled {
            return None;
        }
        match self.feeds.lease(chain_id) {
            Ok(lease) => Some(lease),
            Err(e) => {
                tracing::debug!(chain_id, error = %e, "no block feed for watcher");
                None
            }
        }
    }
}

async fn next_block(lease: &mut Option<BlockLease>) -> Option<u64> {
    match lease {
        Some(lease) => lease.changed().await,
        None => std::future::pending().await,
    }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Read once, then again on every trigger. A newer trigger drops the read
/// in flight. Only changed results are delivered unless `always_deliver`.
pub(crate) async fn read_watcher<T: WatchValue>(
    mut ctx: WatchContext,
    target: WatchTarget,
    options: WatchOptions,
    read: ReadFn<T>,
    deliver: Deliver<T>,
    gate: Arc<Gate>,
) {
    let mut chain_id = ctx.chain_for(target);
    let mut lease = ctx.lease(chain_id, options.listen_to_block);
    let mut in_flight = read(chain_id).fuse();
    let mut last: Option<T> = None;

    loop {
        tokio::select! {
            result = &mut in_flight => {
                let fatal = result.is_fatal();
                let open = if options.always_deliver || last.as_ref() != Some(&result) {
                    gate.deliver(|| deliver(&result))
                } else {
                    gate.is_open()
                };
                if !open {
                    return;
                }
                if fatal {
                    tracing::debug!(chain_id, "read watcher stopped by configuration error");
                    return;
                }
                last = Some(result);
            }
            block = next_block(&mut lease) => {
                match block {
                    Some(_) => in_flight = read(chain_id).fuse(),
                    None => lease = None,
                }
            }
            change = ctx.changes.recv() => {
                match change {
                    Ok(ContextChange::Chain(next)) if target == WatchTarget::Current && next != chain_id => {
                        tracing::debug!(from = chain_id, to = next, "read watcher following chain");
                        chain_id = next;
                        lease = ctx.lease(chain_id, options.listen_to_block);
                        last = None;
                        in_flight = read(chain_id).fuse();
                    }
                    Ok(ContextChange::Chain(_)) => {
                        if options.on_chain_change {
                            in_flight = read(chain_id).fuse();
                        }
                    }
                    Ok(ContextChange::Account) => {
                        if options.on_account_change {
                            in_flight = read(chain_id).fuse();
                        }
                    }
                    Err(RecvError::Lagged(_)) => in_flight = read(chain_id).fuse(),
                    Err(RecvError::Closed) => return,
                }
            }
        }
    }
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

pub(crate) async fn block_watcher(
    mut ctx: WatchContext,
    target: WatchTarget,
    deliver: Arc<dyn Fn(u64) + Send + Sync>,
    gate: Arc<Gate>,
) {
    let mut chain_id = ctx.chain_for(target);
    let mut lease = ctx.lease(chain_id, true);

    loop {
        tokio::select! {
            block = next_block(&mut lease) => {
                match block {
                    Some(number) => {
                        if !gate.deliver(|| deliver(number)) {
                            return;
                        }
                    }
                    None => lease = None,
                }
            }
            change = ctx.changes.recv() => {
                match change {
                    Ok(ContextChange::Chain(next)) if target == WatchTarget::Current && next != chain_id => {
                        chain_id = next;
                        lease = ctx.lease(chain_id, true);
                    }
                    Err(RecvError::Closed) => return,
                    _ => {}
                }
            }
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

pub(crate) async fn event_watcher(
    mut ctx: WatchContext,
    target: WatchTarget,
    filter: LogFilter,
    deliver: Deliver<EventBatch>,
    gate: Arc<Gate>,
) {
    let mut chain_id = ctx.chain_for(target);
    loop {
        let follow = follow_events(
            Arc::clone(&ctx.resolver),
            ctx.feeds.clone(),
            chain_id,
            filter.clone(),
            Arc::clone(&deliver),
            Arc::clone(&gate),
        );
        tokio::pin!(follow);

        loop {
            tokio::select! {
                () = &mut follow => return,
                change = ctx.changes.recv() => {
                    match change {
                        Ok(ContextChange::Chain(next)) if target == WatchTarget::Current && next != chain_id => {
                            chain_id = next;
                            break;
                        }
                        Err(RecvError::Closed) => return,
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Forward matching logs on one chain. Returns only after a configuration
/// error has been delivered.
async fn follow_events(
    resolver: Arc<ProviderResolver>,
    feeds: BlockFeeds,
    chain_id: ChainId,
    filter: LogFilter,
    deliver: Deliver<EventBatch>,
    gate: Arc<Gate>,
) {
    let emit = |batch: EventBatch| gate.deliver(|| deliver(&batch));

    let ws = match resolver.resolve_websocket(chain_id) {
        Ok(ws) => ws.filter(|ws| ws.supports_subscriptions()),
        Err(e) => {
            emit(Err(e));
            return;
        }
    };

    if let Some(mut ws) = ws {
        let mut backoff = Backoff::new(BackoffConfig::default());
        loop {
            match ws.subscribe_logs(&filter).await {
                Ok(mut logs) => {
                    backoff.reset();
                    while let Some(log) = logs.next().await {
                        if !emit(Ok(vec![log])) {
                            return;
                        }
                    }
                    tracing::warn!(chain_id, "log subscription ended; resubscribing, logs emitted in the gap are lost");
                }
                Err(e) => tracing::warn!(chain_id, error = %e, "log subscription failed"),
            }
            tokio::time::sleep(backoff.next_delay()).await;
            match resolver.resolve_websocket(chain_id) {
                Ok(Some(next)) => ws = next,
                Ok(None) => {}
                Err(e) => tracing::warn!(chain_id, error = %e, "websocket provider unavailable; retrying"),
            }
        }
    }

    if let Err(e) = resolver.resolve(chain_id) {
        emit(Err(e));
        return;
    }
    let mut lease = match feeds.lease(chain_id) {
        Ok(lease) => lease,
        Err(e) => {
            emit(Err(e));
            return;
        }
    };

    let mut next_from: Option<u64> = None;
    while let Some(head) = lease.changed().await {
        let from = next_from.unwrap_or(head);
        if from > head {
            continue;
        }
        // The handle may have been replaced since the last range.
        let logs = match resolver.resolve(chain_id) {
            Ok(http) => http.logs(&filter.clone().with_range(from, head)).await,
            Err(e) => {
                if e.is_fatal_for_watcher() {
                    emit(Err(e));
                    return;
                }
                tracing::warn!(chain_id, error = %e, "no provider for eth_getLogs; retrying on next block");
                continue;
            }
        };
        match logs {
            Ok(logs) => {
                next_from = Some(head + 1);
                if !logs.is_empty() && !emit(Ok(logs)) {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(chain_id, from, to = head, error = %e, "eth_getLogs failed; retrying on next block");
                if !emit(Err(Error::Provider(e))) {
                    return;
                }
            }
        }
    }
    std::future::pending::<()>().await;
}
