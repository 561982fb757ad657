//! Code artifact: the stored blob holding a function's source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// Data key the source text is stored under.
pub const CODE_KEY: &str = "code";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CodeArtifact {
    #[must_use]
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            data: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.data.insert(CODE_KEY.to_string(), code.into());
        self
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.data.get(CODE_KEY).map(String::as_str)
    }
}

impl Resource for CodeArtifact {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "ConfigMap";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
