//! Resource model for fnflow.
//!
//! A [`Function`] declares source code, a runtime and an optional event sink.
//! The controller materialises it as two children:
//!
//! - a [`CodeArtifact`] holding the source text, and
//! - a [`ComputeUnit`] running the code in a runtime container.
//!
//! Both children are labeled with the owning function's name and carry an
//! owner reference so they are collected when the function goes away.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod artifact;
pub mod compute;
pub mod condition;
pub mod destination;
pub mod function;
pub mod meta;

pub use artifact::{CODE_KEY, CodeArtifact};
pub use compute::{
    ComputeUnit, ComputeUnitSpec, ComputeUnitStatus, Container, EnvVar, KeyToPath,
    RevisionTemplate, Volume, VolumeMount,
};
pub use condition::{Condition, ConditionStatus, ConditionType, Conditions};
pub use destination::Destination;
pub use function::{EventAttributes, FUNCTION_API_VERSION, Function, FunctionSpec, FunctionStatus};
pub use meta::{LabelSelector, ObjectKey, ObjectMeta, ObjectReference, OwnerReference, Resource, Uid};
