//! WebSocket subscription routing.
//!
//! Maps `eth_subscribe` ids to the channel of the stream that owns them.
//! Entries live for one connection: [`SubscriptionManager::clear`] runs on
//! disconnect and closes every stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

use chainconnect_core::SubscriptionId;

#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Value>>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription confirmed by the node.
    pub fn register(&self, id: SubscriptionId) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    /// Forward a notification. Entries whose stream was dropped are removed.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = match entries.get(id) {
            Some(sender) => sender.send(message).is_err(),
            None => {
                tracing::trace!(subscription = %id, "notification for unknown subscription");
                false
            }
        };
        if closed {
            entries.remove(id);
        }
    }

    pub fn remove(&self, id: &SubscriptionId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Drop every entry, ending all streams.
    pub fn clear(&self) {
        let dropped = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *entries)
        };
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "closing subscription streams");
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
