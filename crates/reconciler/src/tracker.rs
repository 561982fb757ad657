//! Dependency tracking: which functions care about which children.
//!
//! Tracking is level-triggered. A change to a tracked reference only tells
//! the controller which owners to enqueue; the owner's pass then re-reads
//! everything.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use fnflow_api::{ObjectKey, ObjectReference};
use tracing::trace;

use crate::error::{Error, Result};

/// Registers interest of an owner in a referenced object.
pub trait Tracker: Send + Sync {
    /// Re-enqueue `owner` whenever `reference` changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tracking`] if the watch cannot be registered.
    fn track(&self, reference: &ObjectReference, owner: &ObjectKey) -> Result<()>;

    /// Owners registered against `reference`.
    fn owners_of(&self, reference: &ObjectReference) -> Vec<ObjectKey>;

    /// Forget every registration made by `owner`.
    fn untrack_owner(&self, owner: &ObjectKey);

    /// Drop every registration against `reference`, once it is gone.
    fn forget(&self, reference: &ObjectReference);
}

/// Index key: kind plus namespaced name. API versions are ignored so a
/// version bump of a child kind does not lose its watchers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TrackedKey {
    kind: String,
    key: ObjectKey,
}

impl TrackedKey {
    fn from_reference(reference: &ObjectReference) -> Option<Self> {
        reference.key().map(|key| Self {
            kind: reference.kind.clone(),
            key,
        })
    }
}

/// Tracker backed by an in-process index.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    watchers: RwLock<HashMap<TrackedKey, BTreeSet<ObjectKey>>>,
}

impl InMemoryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct references being watched.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Tracker for InMemoryTracker {
    fn track(&self, reference: &ObjectReference, owner: &ObjectKey) -> Result<()> {
        let tracked = TrackedKey::from_reference(reference)
            .ok_or_else(|| Error::tracking(reference, "reference has no namespace"))?;

        trace!(reference = %reference, owner = %owner, "Tracking reference");
        self.watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tracked)
            .or_default()
            .insert(owner.clone());
        Ok(())
    }

    fn owners_of(&self, reference: &ObjectReference) -> Vec<ObjectKey> {
        let Some(tracked) = TrackedKey::from_reference(reference) else {
            return Vec::new();
        };
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tracked)
            .map(|owners| owners.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn untrack_owner(&self, owner: &ObjectKey) {
        let mut watchers = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|_, owners| {
            owners.remove(owner);
            !owners.is_empty()
        });
    }

    fn forget(&self, reference: &ObjectReference) {
        let Some(tracked) = TrackedKey::from_reference(reference) else {
            return;
        };
        trace!(reference = %reference, "Forgetting reference");
        self.watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tracked);
    }
}
