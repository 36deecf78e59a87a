//! Watchers: long-running tasks that re-read or forward chain data and hand
//! it to a callback until cancelled.
//!
//! ```text
//! BlockFeeds (one task per chain) ──lease──▶ watcher task ──▶ callback
//!          client ContextChange ──broadcast──▶     │
//!                                  Unwatch::cancel → close gate, abort
//! ```

pub mod feeds;
pub mod source;
pub(crate) mod tasks;
pub mod unwatch;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::{keccak256, Address};
use chainconnect_core::{ChainId, LogFilter};
use tokio::task::JoinHandle;

pub use feeds::{BlockFeeds, BlockLease};
pub use source::{BlockSource, PollingBlockSource, SubscriptionBlockSource};
pub(crate) use unwatch::Gate;
pub use unwatch::Unwatch;

/// When a read watcher re-runs and what it delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Re-read on every new block.
    pub listen_to_block: bool,
    /// Re-read when the connected account changes.
    pub on_account_change: bool,
    /// Re-read when the current chain changes. Watchers without a fixed
    /// chain always follow the current chain.
    pub on_chain_change: bool,
    /// Deliver every result, even when equal to the previous one.
    pub always_deliver: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            listen_to_block: true,
            on_account_change: true,
            on_chain_change: true,
            always_deliver: false,
        }
    }
}

/// Client-side changes watchers react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    Account,
    /// The current chain is now this one.
    Chain(ChainId),
}

/// Which chain a watcher follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    Fixed(ChainId),
    Current,
}

impl WatchTarget {
    pub fn from_option(chain_id: Option<ChainId>) -> Self {
        chain_id.map_or(Self::Current, Self::Fixed)
    }
}

/// Logs to forward to a contract event watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEventConfig {
    pub filter: LogFilter,
    pub chain_id: Option<ChainId>,
}

impl ContractEventConfig {
    /// Logs of `signature` (e.g. `"Transfer(address,address,uint256)"`)
    /// emitted by `address`.
    pub fn event(address: Address, signature: &str) -> Self {
        Self {
            filter: LogFilter::event(address, keccak256(signature.as_bytes())),
            chain_id: None,
        }
    }

    pub fn new(filter: LogFilter) -> Self {
        Self {
            filter,
            chain_id: None,
        }
    }

    #[must_use]
    pub fn on_chain(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Running watcher tasks, so the client can stop them all on destroy.
#[derive(Clone, Default)]
pub(crate) struct Watchers {
    tasks: Arc<Mutex<HashMap<u64, (JoinHandle<()>, Arc<Gate>)>>>,
    next_id: Arc<AtomicU64>,
}

impl Watchers {
    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, (JoinHandle<()>, Arc<Gate>)>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a watcher task. `run` receives the gate every delivery must go
    /// through.
    pub(crate) fn spawn<F, Fut>(&self, run: F) -> Unwatch
    where
        F: FnOnce(Arc<Gate>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let gate = Gate::new();
        let task = run(Arc::clone(&gate));

        let registry = Arc::downgrade(&self.tasks);
        let finished = Arc::clone(&gate);
        {
            let mut tasks = self.tasks();
            let handle = tokio::spawn(async move {
                task.await;
                finished.close();
                if let Some(tasks) = registry.upgrade() {
                    tasks.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
                }
            });
            tasks.insert(id, (handle, Arc::clone(&gate)));
        }

        let registry = Arc::downgrade(&self.tasks);
        Unwatch::new(gate, move || {
            if let Some(tasks) = registry.upgrade() {
                let entry = tasks.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
                if let Some((handle, _)) = entry {
                    handle.abort();
                }
            }
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks().len()
    }

    /// Close every gate and abort every task.
    pub(crate) fn clear(&self) {
        let tasks: Vec<_> = self.tasks().drain().map(|(_, entry)| entry).collect();
        for (handle, gate) in tasks {
            gate.close();
            handle.abort();
        }
    }
}
