//! Stand-in for the serving platform when running against the in-memory store.
//!
//! Every compute unit that shows up not ready is reported ready after a fixed
//! delay, addressed at its cluster-local host name.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fnflow_api::{ComputeUnit, ObjectKey, Resource};
use fnflow_reconciler::{ChangeKind, InMemoryStore, ObjectChange, ResourceClient};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use url::Url;

/// Cluster-local address a compute unit is served at.
///
/// # Errors
///
/// Returns an error if the key does not form a valid host name.
pub fn cluster_local_address(key: &ObjectKey) -> Result<Url> {
    Url::parse(&format!(
        "http://{}.{}.svc.cluster.local",
        key.name, key.namespace
    ))
    .with_context(|| format!("No valid address for {key}"))
}

/// Marks compute units ready after `ready_after`.
pub struct ReadinessSimulator {
    store: Arc<InMemoryStore>,
    ready_after: Duration,
}

impl ReadinessSimulator {
    #[must_use]
    pub fn new(store: Arc<InMemoryStore>, ready_after: Duration) -> Self {
        Self { store, ready_after }
    }

    /// Follow `changes` until the stream closes.
    pub async fn run(self, mut changes: broadcast::Receiver<ObjectChange>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ObjectKey>();
        let mut scheduled = HashSet::new();

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => {
                        if let Some(key) = self.pending_unit(&change).await {
                            if scheduled.insert(key.clone()) {
                                self.schedule(key, done_tx.clone());
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Simulator lagged behind store changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(key) = done_rx.recv() => {
                    scheduled.remove(&key);
                }
            }
        }
        debug!("Readiness simulator stopped");
    }

    async fn pending_unit(&self, change: &ObjectChange) -> Option<ObjectKey> {
        if change.reference.kind != ComputeUnit::KIND || change.kind == ChangeKind::Deleted {
            return None;
        }
        let key = change.reference.key()?;
        let unit = ResourceClient::<ComputeUnit>::get(self.store.as_ref(), &key)
            .await
            .ok()
            .flatten();
        unit.filter(|unit| !unit.is_ready()).map(|_| key)
    }

    fn schedule(&self, key: ObjectKey, done: mpsc::UnboundedSender<ObjectKey>) {
        let store = Arc::clone(&self.store);
        let delay = self.ready_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match cluster_local_address(&key) {
                Ok(address) => match store.mark_ready(&key, address.clone()).await {
                    Ok(_) => info!(compute_unit = %key, address = %address, "Compute unit ready"),
                    Err(e) => debug!(compute_unit = %key, error = %e, "Compute unit gone before ready"),
                },
                Err(e) => warn!(compute_unit = %key, error = %e, "Cannot address compute unit"),
            }
            let _ = done.send(key);
        });
    }
}
