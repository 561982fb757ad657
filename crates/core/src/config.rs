//! Controller configuration.
//!
//! The configuration is read from a TOML, YAML or JSON file (picked by
//! extension) and then overlaid with `RUNTIME_<NAME>=<image>` environment
//! variables, so operators can register runtimes without editing the file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Environment variable prefix that registers a runtime image.
pub const RUNTIME_ENV_PREFIX: &str = "RUNTIME_";

/// Configuration for the function controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Runtime name to container image reference.
    #[serde(default)]
    pub runtimes: BTreeMap<String, String>,

    /// Label key carried by every managed child, valued with the function name.
    #[serde(default = "default_label_key")]
    pub label_key: String,

    /// Event type emitted by compute units and advertised in status.
    #[serde(default = "default_event_type")]
    pub event_type: String,

    /// Command override for the runtime container.
    #[serde(default = "default_runtime_entrypoint")]
    pub runtime_entrypoint: String,

    /// Directory the code artifact is mounted into.
    #[serde(default = "default_mount_dir")]
    pub mount_dir: String,

    /// Number of concurrent reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline for a single reconcile pass, in seconds.
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// First requeue delay after a failed pass, in milliseconds.
    #[serde(default = "default_requeue_base")]
    pub requeue_base_ms: u64,

    /// Upper bound for the requeue delay, in milliseconds.
    #[serde(default = "default_requeue_max")]
    pub requeue_max_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            runtimes: BTreeMap::new(),
            label_key: default_label_key(),
            event_type: default_event_type(),
            runtime_entrypoint: default_runtime_entrypoint(),
            mount_dir: default_mount_dir(),
            workers: default_workers(),
            pass_timeout_secs: default_pass_timeout(),
            requeue_base_ms: default_requeue_base(),
            requeue_max_ms: default_requeue_max(),
        }
    }
}

impl ControllerConfig {
    /// Create a config with defaults and no registered runtimes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime image.
    #[must_use]
    pub fn with_runtime(mut self, name: impl Into<String>, image: impl Into<String>) -> Self {
        self.runtimes.insert(name.into(), image.into());
        self
    }

    /// Load from a file, overlay the process environment and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?.with_env(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file, picking the format from the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the extension is not
    /// recognised, or the contents do not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml" | "yml") => Self::from_yaml(&contents),
            Some("json") => {
                serde_json::from_str(&contents).map_err(|e| Error::json_parse_failed(e.to_string()))
            }
            _ => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Parse TOML contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents are not valid TOML for this config.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }

    /// Parse YAML contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents are not valid YAML for this config.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::yaml_parse_failed(e.to_string()))
    }

    /// Overlay `RUNTIME_<NAME>=<image>` variables; the name is lower-cased.
    ///
    /// Variables win over entries of the same name from the file.
    #[must_use]
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides = vars
            .into_iter()
            .filter_map(|(key, image)| {
                key.strip_prefix(RUNTIME_ENV_PREFIX)
                    .filter(|name| !name.is_empty() && !image.is_empty())
                    .map(|name| (name.to_ascii_lowercase(), image.clone()))
            })
            .collect_vec();

        for (name, image) in overrides {
            debug!(runtime = %name, image = %image, "Runtime registered from environment");
            self.runtimes.insert(name, image);
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be greater than zero"));
        }
        if self.pass_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "pass_timeout_secs must be greater than zero",
            ));
        }
        if self.requeue_base_ms > self.requeue_max_ms {
            return Err(Error::invalid_config(format!(
                "requeue_base_ms ({}) exceeds requeue_max_ms ({})",
                self.requeue_base_ms, self.requeue_max_ms
            )));
        }
        if self.label_key.trim().is_empty() {
            return Err(Error::invalid_config("label_key must not be empty"));
        }
        if self.runtimes.keys().any(|name| name.trim().is_empty()) {
            return Err(Error::invalid_config("runtime names must not be empty"));
        }
        if let Some((name, _)) = self.runtimes.iter().find(|(_, image)| image.trim().is_empty()) {
            return Err(Error::invalid_config(format!(
                "runtime '{name}' has an empty image reference"
            )));
        }
        Ok(())
    }

    /// Deadline for a single reconcile pass.
    #[must_use]
    pub const fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    /// First requeue delay after a failure.
    #[must_use]
    pub const fn requeue_base(&self) -> Duration {
        Duration::from_millis(self.requeue_base_ms)
    }

    /// Maximum requeue delay.
    #[must_use]
    pub const fn requeue_max(&self) -> Duration {
        Duration::from_millis(self.requeue_max_ms)
    }
}

fn default_label_key() -> String {
    "flow.triggermesh.io/function".to_string()
}

fn default_event_type() -> String {
    "io.triggermesh.flow.function".to_string()
}

fn default_runtime_entrypoint() -> String {
    "/opt/aws-custom-runtime".to_string()
}

fn default_mount_dir() -> String {
    "/opt".to_string()
}

const fn default_workers() -> usize {
    2
}

const fn default_pass_timeout() -> u64 {
    30
}

const fn default_requeue_base() -> u64 {
    100
}

const fn default_requeue_max() -> u64 {
    60_000
}
