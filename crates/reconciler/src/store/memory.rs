//! In-memory resource store for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use fnflow_api::{
    CodeArtifact, ComputeUnit, ComputeUnitStatus, Function, LabelSelector, ObjectKey,
    ObjectReference, Resource, Uid,
};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};
use url::Url;

use super::{
    AddressableLookup, ChangeKind, FunctionClient, ObjectChange, RecordedEvent, ResourceClient,
    StoreError, StoreResult,
};
use crate::types::ReconcileEvent;

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    List,
    Get,
    Create,
    Update,
    Delete,
    UpdateStatus,
}

/// Objects of one kind plus a count of writes against them.
struct Collection<K> {
    objects: RwLock<BTreeMap<ObjectKey, K>>,
    writes: AtomicUsize,
}

impl<K> Default for Collection<K> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }
}

impl<K> Collection<K> {
    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

trait HasCollection<K> {
    fn collection(&self) -> &Collection<K>;
}

/// Store holding functions, code artifacts and compute units in memory.
///
/// The local view and the backing store are the same map here, so `list`
/// never lags. Deleting an object cascades to everything it owns.
pub struct InMemoryStore {
    functions: Collection<Function>,
    artifacts: Collection<CodeArtifact>,
    units: Collection<ComputeUnit>,
    events: RwLock<Vec<RecordedEvent>>,
    faults: Mutex<Vec<(StoreOp, &'static str)>>,
    changes: broadcast::Sender<ObjectChange>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            functions: Collection::default(),
            artifacts: Collection::default(),
            units: Collection::default(),
            events: RwLock::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            changes,
        }
    }
}

impl InMemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Receive a notification for every subsequent change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectChange> {
        self.changes.subscribe()
    }

    /// Make the next `op` against `kind` fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, op: StoreOp, kind: &'static str) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((op, kind));
    }

    /// Number of writes (create, update, delete, status) against `kind`.
    #[must_use]
    pub fn write_count(&self, kind: &str) -> usize {
        match kind {
            k if k == Function::KIND => self.functions.writes.load(Ordering::Relaxed),
            k if k == CodeArtifact::KIND => self.artifacts.writes.load(Ordering::Relaxed),
            k if k == ComputeUnit::KIND => self.units.writes.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Writes against the two managed child kinds.
    #[must_use]
    pub fn child_write_count(&self) -> usize {
        self.write_count(CodeArtifact::KIND) + self.write_count(ComputeUnit::KIND)
    }

    /// Set the observed status of a compute unit, as its runtime would.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the compute unit does not exist.
    pub async fn set_compute_unit_status(
        &self,
        key: &ObjectKey,
        status: ComputeUnitStatus,
    ) -> StoreResult<ComputeUnit> {
        let mut units = self.units.objects.write().await;
        let unit = units
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(ComputeUnit::KIND, key))?;
        unit.status = status;
        unit.metadata.resource_version = unit.metadata.resource_version.saturating_add(1);
        let updated = unit.clone();
        drop(units);

        self.units.record_write();
        self.notify(updated.object_reference(), ChangeKind::Modified);
        Ok(updated)
    }

    /// Mark a compute unit ready at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the compute unit does not exist.
    pub async fn mark_ready(&self, key: &ObjectKey, address: Url) -> StoreResult<ComputeUnit> {
        self.set_compute_unit_status(
            key,
            ComputeUnitStatus {
                ready: true,
                address: Some(address),
            },
        )
        .await
    }

    /// Events recorded on a function, oldest first.
    pub async fn events_for(&self, key: &ObjectKey) -> Vec<RecordedEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|recorded| &recorded.involved == key)
            .cloned()
            .collect()
    }

    fn check_fault(&self, op: StoreOp, kind: &'static str) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.iter().position(|fault| *fault == (op, kind)) {
            Some(index) => {
                faults.remove(index);
                Err(StoreError::unavailable(format!(
                    "injected failure for {op:?} {kind}"
                )))
            }
            None => Ok(()),
        }
    }

    fn notify(&self, reference: ObjectReference, kind: ChangeKind) {
        trace!(reference = %reference, change = ?kind, "Broadcasting change");
        // No receivers is fine; nobody is watching yet.
        let _ = self.changes.send(ObjectChange { reference, kind });
    }

    /// Delete children owned by `owner`.
    async fn collect_garbage(&self, owner: Uid) {
        let removed_artifacts = remove_owned(&self.artifacts, owner).await;
        let removed_units = remove_owned(&self.units, owner).await;

        for artifact in &removed_artifacts {
            self.notify(artifact.object_reference(), ChangeKind::Deleted);
        }
        for unit in &removed_units {
            self.notify(unit.object_reference(), ChangeKind::Deleted);
        }

        if !removed_artifacts.is_empty() || !removed_units.is_empty() {
            debug!(
                owner = %owner,
                artifacts = removed_artifacts.len(),
                compute_units = removed_units.len(),
                "Collected owned children"
            );
        }
    }
}

async fn remove_owned<K: Resource>(collection: &Collection<K>, owner: Uid) -> Vec<K> {
    let mut objects = collection.objects.write().await;
    let owned: Vec<ObjectKey> = objects
        .iter()
        .filter(|(_, object)| object.meta().is_owned_by(owner))
        .map(|(key, _)| key.clone())
        .collect();

    let removed: Vec<K> = owned.iter().filter_map(|key| objects.remove(key)).collect();
    for _ in &removed {
        collection.record_write();
    }
    removed
}

impl HasCollection<Function> for InMemoryStore {
    fn collection(&self) -> &Collection<Function> {
        &self.functions
    }
}

impl HasCollection<CodeArtifact> for InMemoryStore {
    fn collection(&self) -> &Collection<CodeArtifact> {
        &self.artifacts
    }
}

impl HasCollection<ComputeUnit> for InMemoryStore {
    fn collection(&self) -> &Collection<ComputeUnit> {
        &self.units
    }
}

#[async_trait]
impl<K> ResourceClient<K> for InMemoryStore
where
    K: Resource + Clone + Send + Sync + 'static,
    Self: HasCollection<K>,
{
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> StoreResult<Vec<K>> {
        self.check_fault(StoreOp::List, K::KIND)?;
        let objects = self.collection().objects.read().await;
        Ok(objects
            .values()
            .filter(|object| {
                object.meta().namespace == namespace && selector.matches(&object.meta().labels)
            })
            .cloned()
            .collect())
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> {
        self.check_fault(StoreOp::Get, K::KIND)?;
        Ok(self.collection().objects.read().await.get(key).cloned())
    }

    async fn create(&self, mut resource: K) -> StoreResult<K> {
        self.check_fault(StoreOp::Create, K::KIND)?;
        let key = resource.key();
        let mut objects = self.collection().objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::conflict(K::KIND, &key, "already exists"));
        }

        let meta = resource.meta_mut();
        meta.uid = Some(Uid::new());
        meta.generation = 1;
        meta.resource_version = 1;
        meta.creation_timestamp = Some(Utc::now());
        objects.insert(key, resource.clone());
        drop(objects);

        self.collection().record_write();
        self.notify(resource.object_reference(), ChangeKind::Added);
        Ok(resource)
    }

    async fn update(&self, mut resource: K) -> StoreResult<K> {
        self.check_fault(StoreOp::Update, K::KIND)?;
        let key = resource.key();
        let mut objects = self.collection().objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(K::KIND, &key))?;

        let current_meta = current.meta();
        if current_meta.resource_version != resource.meta().resource_version {
            return Err(StoreError::conflict(
                K::KIND,
                &key,
                format!(
                    "resource version {} is stale (current {})",
                    resource.meta().resource_version,
                    current_meta.resource_version
                ),
            ));
        }

        let uid = current_meta.uid;
        let creation_timestamp = current_meta.creation_timestamp;
        let generation = current_meta.generation.saturating_add(1);
        let resource_version = current_meta.resource_version.saturating_add(1);

        let meta = resource.meta_mut();
        meta.uid = uid;
        meta.creation_timestamp = creation_timestamp;
        meta.generation = generation;
        meta.resource_version = resource_version;
        objects.insert(key, resource.clone());
        drop(objects);

        self.collection().record_write();
        self.notify(resource.object_reference(), ChangeKind::Modified);
        Ok(resource)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.check_fault(StoreOp::Delete, K::KIND)?;
        let removed = self
            .collection()
            .objects
            .write()
            .await
            .remove(key)
            .ok_or_else(|| StoreError::not_found(K::KIND, key))?;

        self.collection().record_write();
        self.notify(removed.object_reference(), ChangeKind::Deleted);
        if let Some(uid) = removed.meta().uid {
            self.collect_garbage(uid).await;
        }
        Ok(())
    }
}

#[async_trait]
impl FunctionClient for InMemoryStore {
    async fn get_function(&self, key: &ObjectKey) -> StoreResult<Option<Function>> {
        ResourceClient::<Function>::get(self, key).await
    }

    async fn list_functions(&self) -> StoreResult<Vec<Function>> {
        self.check_fault(StoreOp::List, Function::KIND)?;
        Ok(self.functions.objects.read().await.values().cloned().collect())
    }

    async fn update_status(&self, function: &Function) -> StoreResult<Function> {
        self.check_fault(StoreOp::UpdateStatus, Function::KIND)?;
        let key = function.key();
        let mut functions = self.functions.objects.write().await;
        let current = functions
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(Function::KIND, &key))?;

        if current.metadata.resource_version != function.metadata.resource_version {
            return Err(StoreError::conflict(
                Function::KIND,
                &key,
                "status update against a stale resource version",
            ));
        }

        current.status = function.status.clone();
        current.metadata.resource_version = current.metadata.resource_version.saturating_add(1);
        let updated = current.clone();
        drop(functions);

        self.functions.record_write();
        self.notify(updated.object_reference(), ChangeKind::Modified);
        Ok(updated)
    }

    async fn record_event(&self, key: &ObjectKey, event: ReconcileEvent) -> StoreResult<()> {
        self.events.write().await.push(RecordedEvent {
            involved: key.clone(),
            event,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl AddressableLookup for InMemoryStore {
    async fn address_of(&self, reference: &ObjectReference) -> StoreResult<Option<Url>> {
        let Some(key) = reference.key() else {
            return Err(StoreError::NotFound {
                kind: reference.kind.clone(),
                key: reference.name.clone(),
            });
        };

        match reference.kind.as_str() {
            kind if kind == ComputeUnit::KIND => {
                let units = self.units.objects.read().await;
                let unit = units
                    .get(&key)
                    .ok_or_else(|| StoreError::not_found(ComputeUnit::KIND, &key))?;
                Ok(if unit.is_ready() {
                    unit.status.address.clone()
                } else {
                    None
                })
            }
            kind if kind == Function::KIND => {
                let functions = self.functions.objects.read().await;
                let function = functions
                    .get(&key)
                    .ok_or_else(|| StoreError::not_found(Function::KIND, &key))?;
                Ok(function.status.address.clone())
            }
            other => Err(StoreError::UnsupportedKind {
                kind: other.to_string(),
            }),
        }
    }
}
