//! Error types for the reconciler crate.

use std::fmt::Display;

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No registry entry matches the function's runtime alias.
    #[error("runtime {runtime:?} not registered in the controller config")]
    RuntimeNotRegistered { runtime: String },

    /// A list/create/update/delete against the store failed.
    #[error("store operation '{operation}' failed: {reason}")]
    Store { operation: String, reason: String },

    /// Registering a dependency watch failed.
    #[error("failed to track {reference}: {reason}")]
    Tracking { reference: String, reason: String },

    /// The sink destination could not be turned into a URI.
    #[error("sink resolution failed: {reason}")]
    SinkResolution { reason: String },

    /// A pass did not finish before its deadline.
    #[error("reconcile pass exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { timeout_ms: u64 },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a runtime not registered error.
    pub fn runtime_not_registered(runtime: impl Into<String>) -> Self {
        Self::RuntimeNotRegistered {
            runtime: runtime.into(),
        }
    }

    /// Create a store error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Display) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a tracking error.
    pub fn tracking(reference: impl Display, reason: impl Into<String>) -> Self {
        Self::Tracking {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a sink resolution error.
    pub fn sink_resolution(reason: impl Into<String>) -> Self {
        Self::SinkResolution {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Machine-readable reason used on conditions and events.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::RuntimeNotRegistered { .. } => "RuntimeNotRegistered",
            Self::Store { .. } => "StoreFailure",
            Self::Tracking { .. } => "TrackingFailure",
            Self::SinkResolution { .. } => "SinkResolutionFailure",
            Self::DeadlineExceeded { .. } => "DeadlineExceeded",
            Self::InvalidConfig { .. } => "InvalidConfig",
        }
    }
}

impl From<fnflow_core::Error> for Error {
    fn from(err: fnflow_core::Error) -> Self {
        Self::invalid_config(err.to_string())
    }
}
