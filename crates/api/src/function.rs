//! The user-declared function resource.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::condition::Conditions;
use crate::destination::Destination;
use crate::meta::{ObjectMeta, OwnerReference, Resource};

/// Group/version of the function resource.
pub const FUNCTION_API_VERSION: &str = "flow.triggermesh.io/v1alpha1";

/// Plural resource name, used in self links.
const FUNCTION_PLURAL: &str = "functions";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub metadata: ObjectMeta,
    pub spec: FunctionSpec,
    #[serde(default)]
    pub status: FunctionStatus,
}

/// Desired state, supplied by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Runtime alias looked up in the runtime registry.
    pub runtime: String,
    /// Handler name inside the source file.
    pub entrypoint: String,
    #[serde(default)]
    pub public: bool,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<Destination>,
}

/// Observed state, owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Url>,
    #[serde(rename = "sinkUri", default, skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<Url>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ce_attributes: Vec<EventAttributes>,
}

/// Type/source pair consumers use to build event filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttributes {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
}

impl Function {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: FunctionSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: FunctionStatus::default(),
        }
    }

    /// API path of this object; advertised as the event source.
    #[must_use]
    pub fn self_link(&self) -> String {
        format!(
            "/apis/{FUNCTION_API_VERSION}/namespaces/{}/{FUNCTION_PLURAL}/{}",
            self.metadata.namespace, self.metadata.name
        )
    }

    /// Controller owner reference for children, if the store assigned a uid.
    #[must_use]
    pub fn controller_reference(&self) -> Option<OwnerReference> {
        self.metadata.uid.map(|uid| OwnerReference {
            api_version: FUNCTION_API_VERSION.to_string(),
            kind: <Self as Resource>::KIND.to_string(),
            name: self.metadata.name.clone(),
            uid,
            controller: true,
        })
    }
}

impl FunctionSpec {
    pub fn new(
        runtime: impl Into<String>,
        entrypoint: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            entrypoint: entrypoint.into(),
            public: false,
            code: code.into(),
            sink: None,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Destination) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub const fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }
}

impl Resource for Function {
    const API_VERSION: &'static str = FUNCTION_API_VERSION;
    const KIND: &'static str = "Function";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
