//! Resource store contracts and an in-memory implementation.
//!
//! `list` reads go through the controller's local view and may lag; writes
//! go straight to the backing store. Callers must not assume a write is
//! visible to a `list` issued later in the same pass.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnflow_api::{Function, LabelSelector, ObjectKey, ObjectReference, Resource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::types::ReconcileEvent;

pub use memory::{InMemoryStore, StoreOp};

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} '{key}' conflict: {reason}")]
    Conflict {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("kind '{kind}' is not addressable")]
    UnsupportedKind { kind: String },
}

impl StoreError {
    pub fn not_found(kind: &str, key: &ObjectKey) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub fn conflict(kind: &str, key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Typed access to one kind of object.
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Resource + Clone + Send + Sync + 'static,
{
    /// Objects in `namespace` whose labels match `selector`.
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> StoreResult<Vec<K>>;

    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>>;

    /// Persist a new object; the store assigns uid, version and timestamp.
    async fn create(&self, resource: K) -> StoreResult<K>;

    /// Replace an existing object. The resource version must match.
    async fn update(&self, resource: K) -> StoreResult<K>;

    /// Delete an object and everything it owns.
    async fn delete(&self, key: &ObjectKey) -> StoreResult<()>;
}

/// Function-specific operations used by the controller.
#[async_trait]
pub trait FunctionClient: Send + Sync {
    async fn get_function(&self, key: &ObjectKey) -> StoreResult<Option<Function>>;

    async fn list_functions(&self) -> StoreResult<Vec<Function>>;

    /// Write only the status subresource.
    async fn update_status(&self, function: &Function) -> StoreResult<Function>;

    async fn record_event(&self, key: &ObjectKey, event: ReconcileEvent) -> StoreResult<()>;
}

/// Looks up the address of a referenced object.
#[async_trait]
pub trait AddressableLookup: Send + Sync {
    /// `Ok(None)` when the object exists but has no address yet.
    async fn address_of(&self, reference: &ObjectReference) -> StoreResult<Option<Url>>;
}

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// Change notification broadcast by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChange {
    pub reference: ObjectReference,
    pub kind: ChangeKind,
}

/// Event attached to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub involved: ObjectKey,
    pub event: ReconcileEvent,
    pub timestamp: DateTime<Utc>,
}
