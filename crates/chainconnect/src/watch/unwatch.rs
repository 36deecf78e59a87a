use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Delivery guard shared by a watch and its [`Unwatch`].
///
/// Every callback invocation runs under the gate's lock; closing the gate
/// takes the same lock, so once [`Gate::close`] returns no callback is running
/// and none will start. Closing from inside the watch's own callback only
/// flips the flag.
pub(crate) struct Gate {
    open: AtomicBool,
    delivering: Mutex<()>,
    deliverer: Mutex<Option<ThreadId>>,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            delivering: Mutex::new(()),
            deliverer: Mutex::new(None),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn deliverer(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.deliverer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `callback` unless the gate is closed. Returns whether it ran.
    pub(crate) fn deliver(&self, callback: impl FnOnce()) -> bool {
        // Re-entrant delivery from inside a callback already holds the lock.
        if *self.deliverer() == Some(thread::current().id()) {
            if !self.is_open() {
                return false;
            }
            callback();
            return true;
        }
        let _delivering = self.delivering.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_open() {
            return false;
        }
        *self.deliverer() = Some(thread::current().id());
        let _reset = ResetDeliverer(self);
        callback();
        true
    }

    /// Close the gate and wait for a running callback to return.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if *self.deliverer() == Some(thread::current().id()) {
            return;
        }
        drop(self.delivering.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

struct ResetDeliverer<'a>(&'a Gate);

impl Drop for ResetDeliverer<'_> {
    fn drop(&mut self) {
        *self.0.deliverer() = None;
    }
}

/// Cancel handle returned by every `watch_*` call.
///
/// [`Unwatch::cancel`] guarantees the callback is not invoked after it
/// returns: a callback already running on another thread is waited for.
/// Dropping the handle without cancelling leaves the watch running until the
/// client is destroyed.
#[must_use = "dropping an Unwatch leaves the watch running; call cancel() to stop it"]
pub struct Unwatch {
    gate: Arc<Gate>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Unwatch {
    pub(crate) fn new(gate: Arc<Gate>, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            gate,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Stop the watch and release its resources.
    pub fn cancel(mut self) {
        self.gate.close();
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    /// `false` once cancelled, or once the watch ended on its own.
    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }
}

impl std::fmt::Debug for Unwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unwatch")
            .field("active", &self.is_active())
            .finish()
    }
}
