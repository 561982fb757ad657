//! Compute unit: the addressable service that runs a function's code.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::meta::{ObjectMeta, Resource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    pub metadata: ObjectMeta,
    pub spec: ComputeUnitSpec,
    #[serde(default)]
    pub status: ComputeUnitStatus,
}

/// Desired shape of the service; everything here is owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnitSpec {
    /// Exposure flag copied from the function.
    #[serde(default)]
    pub public: bool,
    pub template: RevisionTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplate {
    pub container: Container,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Volume backed by a code artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub artifact_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// Projects one artifact data key to a file inside the volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToPath {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Observed state, written by whatever runs the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnitStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Url>,
}

impl ComputeUnit {
    /// Ready and addressable.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.status.ready && self.status.address.is_some()
    }

    /// Value of a container environment variable.
    #[must_use]
    pub fn env(&self, name: &str) -> Option<&str> {
        self.spec
            .template
            .container
            .env
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }
}

impl Resource for ComputeUnit {
    const API_VERSION: &'static str = "serving.knative.dev/v1";
    const KIND: &'static str = "Service";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
