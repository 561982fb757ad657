//! Event destinations.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectReference;

/// Where result events are delivered.
///
/// With only `uri` the URI must be absolute. With only `reference` the
/// referenced object's address is used. With both, `uri` is resolved
/// relative to the reference's address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Destination {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            reference: None,
            uri: Some(uri.into()),
        }
    }

    #[must_use]
    pub const fn from_reference(reference: ObjectReference) -> Self {
        Self {
            reference: Some(reference),
            uri: None,
        }
    }
}
