//! Controller runtime: watches store changes and drives reconcile passes.
//!
//! Keys flow from change notifications into a [`WorkQueue`]. A fixed pool of
//! workers takes keys, acquires the key's lease from the [`LeaseMap`] and runs
//! one pass under a deadline. Failed passes are requeued with exponential
//! backoff. A key that arrives while its pass is running is requeued once the
//! lease is released.

mod lease;
mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fnflow_api::{Function, ObjectKey, Resource};
use fnflow_core::ControllerConfig;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::store::{ChangeKind, FunctionClient, ObjectChange};
use crate::types::ReconcileEvent;

pub use lease::{Lease, LeaseMap};
pub use queue::WorkQueue;

/// Runtime settings for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Deadline for a single pass.
    pub pass_timeout: Duration,
    /// First requeue delay after a failure.
    pub requeue_base: Duration,
    /// Upper bound for the requeue delay.
    pub requeue_max: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            workers: config.workers,
            pass_timeout: config.pass_timeout(),
            requeue_base: config.requeue_base(),
            requeue_max: config.requeue_max(),
        }
    }
}

/// `base * 2^(failures - 1)`, capped at `max`.
#[must_use]
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Drives reconcile passes for every function in the store.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    functions: Arc<dyn FunctionClient>,
    queue: Arc<WorkQueue>,
    leases: Arc<LeaseMap>,
    failures: Mutex<HashMap<ObjectKey, u32>>,
    settings: ControllerSettings,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Controller {
    /// Create a new controller.
    pub fn new(
        reconciler: Arc<Reconciler>,
        functions: Arc<dyn FunctionClient>,
        settings: ControllerSettings,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            functions,
            queue: Arc::new(WorkQueue::new()),
            leases: Arc::new(LeaseMap::new()),
            failures: Mutex::new(HashMap::new()),
            settings,
            stop_tx,
            stop_rx,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    #[must_use]
    pub fn leases(&self) -> &Arc<LeaseMap> {
        &self.leases
    }

    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Consecutive failed passes for `key`.
    #[must_use]
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Run until stopped or the change stream closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial listing of functions fails.
    pub async fn run(self: Arc<Self>, mut changes: broadcast::Receiver<ObjectChange>) -> Result<()> {
        info!(
            workers = self.settings.workers,
            pass_timeout_ms = self.settings.pass_timeout.as_millis(),
            "Starting controller"
        );

        self.enqueue_all().await?;

        let mut workers = JoinSet::new();
        for id in 0..self.settings.workers {
            let controller = Arc::clone(&self);
            workers.spawn(async move { controller.worker(id).await });
        }

        let mut stop_rx = self.stop_rx.clone();
        loop {
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => self.handle_change(&change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change stream lagged, resyncing");
                        if let Err(e) = self.enqueue_all().await {
                            error!(error = %e, "Resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Change stream closed");
                        break;
                    }
                },
                _ = stop_rx.changed() => {}
            }
        }

        self.queue.shutdown().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Controller stopped");
        Ok(())
    }

    /// Enqueue every stored function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the functions cannot be listed.
    pub async fn enqueue_all(&self) -> Result<usize> {
        let functions = self
            .functions
            .list_functions()
            .await
            .map_err(|e| Error::store_failed("list Function", e))?;

        let count = functions.len();
        for function in functions {
            self.queue.add(function.key()).await;
        }
        debug!(count, "Enqueued all functions");
        Ok(count)
    }

    /// Route a store change to the keys it affects.
    ///
    /// A function change enqueues the function itself; any change enqueues
    /// the functions watching the object (children, sink references).
    pub async fn handle_change(&self, change: &ObjectChange) {
        let reference = &change.reference;
        if reference.kind == Function::KIND {
            let Some(key) = reference.key() else {
                return;
            };
            if change.kind == ChangeKind::Deleted {
                debug!(function = %key, "Function deleted, dropping watches");
                self.reconciler.tracker().untrack_owner(&key);
                self.clear_failures(&key);
            } else {
                self.queue.add(key).await;
            }
        }

        let tracker = self.reconciler.tracker();
        let owners = tracker.owners_of(reference);
        if change.kind == ChangeKind::Deleted {
            // Owners re-register whatever they still need on their next pass.
            tracker.forget(reference);
        }
        for owner in owners {
            debug!(function = %owner, dependency = %reference, "Dependency changed");
            self.queue.add(owner).await;
        }
    }

    /// Handle to stop the controller.
    #[must_use]
    pub fn stopper(&self) -> ControllerStopper {
        ControllerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    async fn worker(&self, id: usize) {
        debug!(worker = id, "Worker started");
        while let Some(key) = self.queue.next().await {
            self.process(&key).await;
        }
        debug!(worker = id, "Worker exiting");
    }

    /// Run one pass for `key` if nobody else is, then requeue as needed.
    pub async fn process(&self, key: &ObjectKey) {
        let Some(lease) = self.leases.try_acquire(key) else {
            debug!(function = %key, "Pass in flight, deferring");
            return;
        };

        let succeeded = match self.run_pass(key).await {
            Ok(()) => {
                self.clear_failures(key);
                true
            }
            Err(e) => {
                let failures = self.record_failure(key);
                let delay = backoff_delay(self.settings.requeue_base, self.settings.requeue_max, failures);
                warn!(
                    function = %key,
                    error = %e,
                    failures,
                    retry_in_ms = delay.as_millis(),
                    "Reconcile failed, requeueing"
                );
                self.queue.add_after(key.clone(), delay);
                false
            }
        };

        // A failed pass already has its delayed retry scheduled.
        if lease.release() && succeeded {
            debug!(function = %key, "Key changed during pass, requeueing");
            self.queue.add(key.clone()).await;
        }
    }

    async fn run_pass(&self, key: &ObjectKey) -> Result<()> {
        let Some(mut function) = self
            .functions
            .get_function(key)
            .await
            .map_err(|e| Error::store_failed("get Function", e))?
        else {
            debug!(function = %key, "Function gone, nothing to do");
            self.reconciler.tracker().untrack_owner(key);
            return Ok(());
        };

        let previous = function.status.clone();
        let timeout = self.settings.pass_timeout;
        let result = tokio::time::timeout(timeout, self.reconciler.reconcile_kind(&mut function))
            .await
            .unwrap_or_else(|_| {
                Err(Error::DeadlineExceeded {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });

        let status_written = if function.status == previous {
            Ok(())
        } else {
            self.functions
                .update_status(&function)
                .await
                .map(|_| ())
                .map_err(|e| Error::store_failed("update Function status", e))
        };

        let event = match &result {
            Ok(outcome) => outcome.event().cloned(),
            Err(e) => Some(ReconcileEvent::failed(e)),
        };
        if let Some(event) = event {
            if let Err(e) = self.functions.record_event(key, event).await {
                warn!(function = %key, error = %e, "Failed to record event");
            }
        }

        result?;
        status_written
    }

    fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn clear_failures(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Handle to stop a running controller.
#[derive(Clone)]
pub struct ControllerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopper {
    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
