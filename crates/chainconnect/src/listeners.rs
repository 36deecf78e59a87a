//! Synchronous listener lists with FIFO delivery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::watch::{Gate, Unwatch};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    gate: Arc<Gate>,
    callback: Callback<T>,
}

struct Inner<T> {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Entry<T>>>,
}

/// Callbacks invoked in subscription order.
///
/// `emit` runs callbacks outside the lock, so a callback may subscribe or
/// cancel. A callback cancelled during an `emit` is skipped for the rest of
/// that `emit`.
pub struct Listeners<T> {
    inner: Arc<Inner<T>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                entries: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Unwatch {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let gate = Gate::new();
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Entry {
                    gate: Arc::clone(&gate),
                    callback: Arc::new(callback),
                },
            );

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Unwatch::new(gate, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            }
        })
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(Arc<Gate>, Callback<T>)> = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| (Arc::clone(&e.gate), Arc::clone(&e.callback)))
            .collect();

        for (gate, callback) in snapshot {
            gate.deliver(|| callback(value));
        }
    }

    /// Deactivate and drop every listener.
    pub fn clear(&self) {
        let entries = std::mem::take(
            &mut *self
                .inner
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for entry in entries.values() {
            entry.gate.close();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}
