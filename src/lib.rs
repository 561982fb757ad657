#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # fnflow
//!
//! Function controller. Declared functions are reconciled into a code
//! artifact and a compute unit by [`fnflow_reconciler`]; this crate adds the
//! command line around it: manifest loading, dry-run rendering and a local
//! run against the in-memory store.

pub use fnflow_api;
pub use fnflow_core;
pub use fnflow_reconciler;

pub mod cli;
pub mod commands;
pub mod manifest;
pub mod simulate;
