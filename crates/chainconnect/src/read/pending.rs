//! Shared in-flight reads.
//!
//! The first caller for a fingerprint starts the request; later callers with
//! the same fingerprint await the same [`Shared`] future. The entry is removed
//! when the request settles, or when its last waiter goes away first.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use alloy_primitives::B256;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::read::RawResult;

type SharedRead = Shared<BoxFuture<'static, RawResult>>;

struct Entry {
    generation: u64,
    future: SharedRead,
    waiters: usize,
}

#[derive(Default)]
struct State {
    next_generation: u64,
    entries: HashMap<B256, Entry>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct PendingRequests {
    state: Arc<Mutex<State>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight request for `key`, or start one with `start`.
    pub fn join(
        &self,
        key: B256,
        start: impl FnOnce() -> BoxFuture<'static, RawResult>,
    ) -> PendingRead {
        let mut state = lock(&self.state);
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.waiters += 1;
            tracing::trace!(%key, waiters = entry.waiters, "joined in-flight read");
            return PendingRead {
                key,
                generation: entry.generation,
                future: entry.future.clone(),
                owner: Arc::downgrade(&self.state),
            };
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let owner = Arc::downgrade(&self.state);
        let request = start();
        let future = async move {
            let result = request.await;
            if let Some(state) = owner.upgrade() {
                let mut state = lock(&state);
                if state.entries.get(&key).is_some_and(|e| e.generation == generation) {
                    state.entries.remove(&key);
                }
            }
            result
        }
        .boxed()
        .shared();

        state.entries.insert(
            key,
            Entry {
                generation,
                future: future.clone(),
                waiters: 1,
            },
        );
        PendingRead {
            key,
            generation,
            future,
            owner: Arc::downgrade(&self.state),
        }
    }

    /// Number of distinct requests in flight.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One caller's view of a shared read.
pub struct PendingRead {
    key: B256,
    generation: u64,
    future: SharedRead,
    owner: Weak<Mutex<State>>,
}

impl Future for PendingRead {
    type Output = RawResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RawResult> {
        Pin::new(&mut self.future).poll(cx)
    }
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        let Some(state) = self.owner.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        let abandoned = match state.entries.get_mut(&self.key) {
            Some(entry) if entry.generation == self.generation => {
                entry.waiters -= 1;
                entry.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            state.entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::CallFailure;
    use alloy_primitives::Bytes;
    use chainconnect_core::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let pending = PendingRequests::new();
        let started = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();
        let rx = rx.shared();

        let start = |started: Arc<AtomicUsize>, rx: futures::future::Shared<oneshot::Receiver<()>>| {
            move || {
                started.fetch_add(1, Ordering::SeqCst);
                async move {
                    let _ = rx.await;
                    Ok::<_, CallFailure>(Bytes::from_static(b"\x2a"))
                }
                .boxed()
            }
        };

        let a = pending.join(B256::ZERO, start(started.clone(), rx.clone()));
        let b = pending.join(B256::ZERO, start(started.clone(), rx.clone()));
        assert_eq!(pending.len(), 1);

        tx.send(()).unwrap();
        let (a, b) = futures::join!(a, b);
        assert_eq!(a, b);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn settled_request_is_not_reused() {
        let pending = PendingRequests::new();
        let first = pending
            .join(B256::ZERO, || async { Ok::<_, CallFailure>(Bytes::from_static(b"\x01")) }.boxed())
            .await;
        let second = pending
            .join(B256::ZERO, || {
                async { Err(CallFailure::Transport(TransportError::Closed)) }.boxed()
            })
            .await;
        assert!(first.is_ok());
        assert!(second.is_err());
    }

    #[test]
    fn abandoned_request_is_removed() {
        let pending = PendingRequests::new();
        let read = pending.join(B256::ZERO, || futures::future::pending().boxed());
        assert_eq!(pending.len(), 1);
        drop(read);
        assert!(pending.is_empty());
    }
}
