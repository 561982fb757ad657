//! Core errors, result helpers and configuration for fnflow.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{ControllerConfig, RUNTIME_ENV_PREFIX};
pub use error::Error;
pub use result::{Result, ResultExt};
