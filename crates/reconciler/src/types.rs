//! Core types for the reconciler.

use fnflow_api::ObjectKey;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Event recorded on a function after a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl ReconcileEvent {
    /// Normal event emitted after a pass that left the function ready.
    #[must_use]
    pub fn reconciled(key: &ObjectKey) -> Self {
        Self {
            event_type: EventType::Normal,
            reason: "FunctionReconciled".to_string(),
            message: format!("Function reconciled: \"{key}\""),
        }
    }

    /// Warning event describing a failed pass.
    #[must_use]
    pub fn failed(error: &Error) -> Self {
        Self {
            event_type: EventType::Warning,
            reason: error.reason().to_string(),
            message: error.to_string(),
        }
    }
}

/// Successful result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both children exist and the compute unit is serving.
    Reconciled(ReconcileEvent),
    /// Children are in place but the compute unit is not ready yet; the
    /// next change to it re-triggers the pass.
    Waiting,
}

impl ReconcileOutcome {
    /// Event to record, if any.
    #[must_use]
    pub const fn event(&self) -> Option<&ReconcileEvent> {
        match self {
            Self::Reconciled(event) => Some(event),
            Self::Waiting => None,
        }
    }

    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }
}
