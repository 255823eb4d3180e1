//! Correlated request/response map
//!
//! Each outbound request gets an id from this map's own counter and a
//! oneshot slot. The slot is removed on every exit path of `wait`:
//! completion, timeout, or the waiting future being dropped.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{BridgeError, Result};
use crate::protocol::RequestId;

pub struct RequestMap<T> {
    /// Monotonic request ID counter, scoped to this map
    next_id: AtomicU64,

    /// Key: request_id, Value: oneshot sender for the outcome
    pending: DashMap<RequestId, oneshot::Sender<Result<T>>>,
}

/// Receiving half of a registered request
pub struct PendingRequest<T> {
    id: RequestId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingRequest<T> {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<T: Send + 'static> RequestMap<T> {
    pub fn new(id_base: u64) -> Self {
        Self {
            next_id: AtomicU64::new(id_base),
            pending: DashMap::new(),
        }
    }

    pub fn register(&self) -> PendingRequest<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        PendingRequest { id, rx }
    }

    /// Complete `id`. False when nothing is waiting on it.
    pub fn resolve(&self, id: RequestId, outcome: Result<T>) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                // Receiver dropped between lookup and send: nothing to do
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Wait for `pending` to resolve. The entry is purged as soon as the
    /// returned future exists, so dropping it unpolled also cleans up.
    pub fn wait(
        &self,
        pending: PendingRequest<T>,
        timeout: Duration,
        method: &str,
    ) -> impl Future<Output = Result<T>> + '_ {
        let PendingRequest { id, rx } = pending;
        let purge = PurgeOnDrop {
            pending: &self.pending,
            id,
        };
        let method = method.to_string();

        async move {
            let _purge = purge;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(BridgeError::Closed),
                Err(_) => Err(BridgeError::Timeout { method, id }),
            }
        }
    }

    /// Drop a pending entry without resolving it
    pub fn cancel(&self, id: RequestId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Reject every waiter with `Closed`
    pub fn clear(&self) {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.resolve(id, Err(BridgeError::Closed));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

struct PurgeOnDrop<'a, T> {
    pending: &'a DashMap<RequestId, oneshot::Sender<Result<T>>>,
    id: RequestId,
}

impl<T> Drop for PurgeOnDrop<'_, T> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}
