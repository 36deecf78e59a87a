//! Coalesces reads for one chain into Multicall3 `aggregate3` calls.
//!
//! The first read for a `(chain, block)` pair opens a window. That read's own
//! future yields once (or sleeps `wait_ms`, when configured), then takes the
//! window and sends everything collected so far. A window that reaches
//! `batch_size` items is sent immediately. A window holding a single item is
//! sent as a plain `eth_call`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::{Address, Bytes};
use chainconnect_core::{BlockTag, CallRequest, ChainId, Provider, TransportError};
use tokio::sync::oneshot;

use crate::codec::{Call3, ContractCodec};
use crate::config::BatchConfig;
use crate::provider::ProviderHandle;
use crate::read::{CallFailure, RawResult};

type WindowKey = (ChainId, BlockTag);

struct Item {
    target: Address,
    call_data: Bytes,
    tx: oneshot::Sender<RawResult>,
}

struct Window {
    id: u64,
    handle: ProviderHandle,
    multicall: Address,
    items: Vec<Item>,
}

#[derive(Clone)]
pub struct BatchScheduler {
    codec: Arc<dyn ContractCodec>,
    config: BatchConfig,
    windows: Arc<Mutex<HashMap<WindowKey, Window>>>,
    next_id: Arc<AtomicU64>,
}

impl BatchScheduler {
    pub fn new(codec: Arc<dyn ContractCodec>, config: BatchConfig) -> Self {
        Self {
            codec,
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<WindowKey, Window>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one call through `multicall` on `handle`'s chain and wait for
    /// its share of the batch result. Must run inside a tokio runtime.
    ///
    /// The call that opens a window yields once (or waits `wait_ms`) and then
    /// takes the window, so every read queued by the same poll round lands in
    /// one batch.
    pub async fn call(
        &self,
        handle: &ProviderHandle,
        multicall: Address,
        block: BlockTag,
        target: Address,
        call_data: Bytes,
    ) -> RawResult {
        let (tx, rx) = oneshot::channel();
        let key = (handle.chain_id(), block);
        let item = Item {
            target,
            call_data,
            tx,
        };

        let mut opened = None;
        let full = {
            let mut windows = self.windows();
            let window = windows.entry(key).or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                opened = Some(id);
                Window {
                    id,
                    handle: handle.clone(),
                    multicall,
                    items: Vec::new(),
                }
            });
            window.items.push(item);
            if window.items.len() >= self.config.chunk_size() {
                windows.remove(&key)
            } else {
                None
            }
        };
        if let Some(window) = full {
            tracing::debug!(chain_id = key.0, size = window.items.len(), "batch window full");
            self.dispatch(window, block);
        }

        if let Some(id) = opened {
            // Dropping the opener early still sends the window.
            let closer = CloseWindow {
                scheduler: self,
                key,
                id,
            };
            let wait = self.config.wait();
            if wait.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(wait).await;
            }
            drop(closer);
        }

        rx.await
            .unwrap_or(Err(CallFailure::Transport(TransportError::Closed)))
    }

    /// Take window `id` for `key` if it is still open and send it.
    fn close(&self, key: WindowKey, id: u64) {
        let window = {
            let mut windows = self.windows();
            match windows.get(&key) {
                Some(window) if window.id == id => windows.remove(&key),
                _ => None,
            }
        };
        if let Some(window) = window {
            self.dispatch(window, key.1);
        }
    }

    /// The round trip runs on its own task so a cancelled caller cannot fail
    /// the other items in the window.
    fn dispatch(&self, window: Window, block: BlockTag) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(flush(Arc::clone(&self.codec), window, block));
            }
            Err(_) => tracing::warn!(
                chain_id = window.handle.chain_id(),
                size = window.items.len(),
                "no runtime to send batch window; dropping it"
            ),
        }
    }
}

struct CloseWindow<'a> {
    scheduler: &'a BatchScheduler,
    key: WindowKey,
    id: u64,
}

impl Drop for CloseWindow<'_> {
    fn drop(&mut self) {
        self.scheduler.close(self.key, self.id);
    }
}

async fn flush(codec: Arc<dyn ContractCodec>, window: Window, block: BlockTag) {
    let Window {
        handle,
        multicall,
        mut items,
        ..
    } = window;

    if items.len() == 1 {
        let Some(item) = items.pop() else { return };
        let request = CallRequest::new(item.target, item.call_data).at_block(block);
        let result = handle.call(&request).await.map_err(CallFailure::from);
        let _ = item.tx.send(result);
        return;
    }

    tracing::debug!(chain_id = handle.chain_id(), size = items.len(), %block, "flushing multicall batch");
    let calls: Vec<(Address, Bytes)> = items
        .iter()
        .map(|item| (item.target, item.call_data.clone()))
        .collect();

    match aggregate(codec.as_ref(), &handle, multicall, block, &calls).await {
        Ok(results) => {
            for (item, result) in items.into_iter().zip(results) {
                let _ = item.tx.send(result);
            }
        }
        Err(e) => {
            tracing::warn!(chain_id = handle.chain_id(), error = ?e, "multicall batch failed");
            for item in items {
                let _ = item.tx.send(Err(e.clone()));
            }
        }
    }
}

/// One `aggregate3` round trip for `calls`, every entry allowed to fail.
/// Returns one result per call, in order.
pub(crate) async fn aggregate(
    codec: &dyn ContractCodec,
    handle: &ProviderHandle,
    multicall: Address,
    block: BlockTag,
    calls: &[(Address, Bytes)],
) -> Result<Vec<RawResult>, CallFailure> {
    let call3: Vec<Call3> = calls
        .iter()
        .map(|(target, call_data)| Call3 {
            target: *target,
            allow_failure: true,
            call_data: call_data.clone(),
        })
        .collect();
    let data = codec
        .encode_aggregate3(&call3)
        .map_err(|e| CallFailure::Transport(TransportError::Other(e.to_string())))?;

    let request = CallRequest::new(multicall, data).at_block(block);
    let raw = handle.call(&request).await?;
    let results = codec
        .decode_aggregate3(&raw)
        .map_err(|e| CallFailure::Transport(TransportError::Deserialization(e.to_string())))?;

    if results.len() != calls.len() {
        return Err(CallFailure::Transport(TransportError::Deserialization(format!(
            "aggregate3 returned {} results for {} calls",
            results.len(),
            calls.len()
        ))));
    }
    Ok(results
        .into_iter()
        .map(|r| {
            if r.success {
                Ok(r.return_data)
            } else {
                Err(CallFailure::Reverted(r.return_data))
            }
        })
        .collect())
}
