//! Reconciliation loop for functions.
//!
//! Each [`Function`](fnflow_api::Function) is materialised as a code
//! artifact holding its source and a compute unit running that source in a
//! runtime container. A pass:
//!
//! 1. ensures the code artifact matches `spec.code`,
//! 2. tracks it,
//! 3. ensures the compute unit matches the derived shape (image from the
//!    [`RuntimeRegistry`], mount and handler from the [`SourceLayout`], sink
//!    resolved best-effort through a [`SinkResolver`]),
//! 4. tracks it,
//! 5. waits while the compute unit is not ready, and otherwise
//! 6. publishes its address and event attributes in status.
//!
//! Passes are idempotent: a pass over converged state issues no writes. The
//! [`Controller`] runs passes with at most one in flight per function.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fnflow_reconciler::{Controller, ControllerSettings, InMemoryStore, ReconcilerBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new_arc();
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_store(store.clone())
//!         .runtime("python", "registry.example/klr/python")
//!         .build()
//!         .map(Arc::new);
//!
//!     if let Ok(reconciler) = reconciler {
//!         let controller = Arc::new(Controller::new(reconciler, store.clone(), ControllerSettings::default()));
//!         let _ = controller.run(store.subscribe()).await;
//!     }
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod apply;
pub mod controller;
pub mod error;
pub mod layout;
pub mod reconciler;
pub mod resources;
pub mod runtime;
pub mod sink;
pub mod status;
pub mod store;
pub mod tracker;
pub mod types;

// Re-export main types
pub use apply::{Applied, ApplyOutcome, ManagedResource, ensure_resource, generate_name};
pub use controller::{
    Controller, ControllerSettings, ControllerStopper, Lease, LeaseMap, WorkQueue, backoff_delay,
};
pub use error::{Error, Result};
pub use layout::{SourceLayout, file_extension};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use runtime::RuntimeRegistry;
pub use sink::{SinkResolver, StoreSinkResolver};
pub use status::{ConditionManager, FunctionStatusExt};
pub use store::{
    AddressableLookup, ChangeKind, FunctionClient, InMemoryStore, ObjectChange, RecordedEvent,
    ResourceClient, StoreError, StoreOp, StoreResult,
};
pub use tracker::{InMemoryTracker, Tracker};
pub use types::{EventType, ReconcileEvent, ReconcileOutcome};
