//! De-duplicating work queue of function keys.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use fnflow_api::ObjectKey;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    shutdown: bool,
}

/// FIFO of keys waiting for a pass.
///
/// A key is held at most once while waiting; adding it again is a no-op
/// until a worker takes it.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key`. Returns `false` if it was already waiting or the queue
    /// is shut down.
    pub async fn add(&self, key: ObjectKey) -> bool {
        let mut state = self.state.lock().await;
        if state.shutdown || !state.queued.insert(key.clone()) {
            return false;
        }
        trace!(function = %key, "Enqueued");
        state.pending.push_back(key);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Enqueue `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and
    /// drained.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown = true;
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
