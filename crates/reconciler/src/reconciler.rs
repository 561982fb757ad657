//! Reconciler implementation.

use std::sync::Arc;

use fnflow_api::{CodeArtifact, ComputeUnit, EventAttributes, Function, Resource};
use fnflow_core::{ControllerConfig, ResultExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::apply::ensure_resource;
use crate::error::{Error, Result};
use crate::resources::{expected_code_artifact, expected_compute_unit, selector_for};
use crate::runtime::RuntimeRegistry;
use crate::sink::{SinkResolver, StoreSinkResolver};
use crate::status::{FunctionStatusExt, REASON_COMPUTE_UNIT_NOT_READY, REASON_NO_ADDRESS};
use crate::store::{AddressableLookup, ResourceClient};
use crate::tracker::{InMemoryTracker, Tracker};
use crate::types::{ReconcileEvent, ReconcileOutcome};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Runtime alias to image lookup.
    pub runtimes: RuntimeRegistry,
    /// Label key stamped on children, valued with the function name.
    pub label_key: String,
    /// Event type advertised in status and injected into compute units.
    pub event_type: String,
    /// Command override for the runtime container.
    pub runtime_entrypoint: String,
    /// Directory the source file is mounted into.
    pub mount_dir: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ReconcilerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            runtimes: RuntimeRegistry::from_entries(&config.runtimes),
            label_key: config.label_key.clone(),
            event_type: config.event_type.clone(),
            runtime_entrypoint: config.runtime_entrypoint.clone(),
            mount_dir: config.mount_dir.clone(),
        }
    }
}

/// Keeps one function's code artifact and compute unit in line with its spec.
pub struct Reconciler {
    /// Code artifact store.
    artifacts: Arc<dyn ResourceClient<CodeArtifact>>,
    /// Compute unit store.
    units: Arc<dyn ResourceClient<ComputeUnit>>,
    /// Sink destination resolution.
    sink_resolver: Arc<dyn SinkResolver>,
    /// Child watch registrations.
    tracker: Arc<dyn Tracker>,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        artifacts: Arc<dyn ResourceClient<CodeArtifact>>,
        units: Arc<dyn ResourceClient<ComputeUnit>>,
        sink_resolver: Arc<dyn SinkResolver>,
        tracker: Arc<dyn Tracker>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            artifacts,
            units,
            sink_resolver,
            tracker,
            config,
        }
    }

    /// Run one pass for `function`, updating its status in place.
    ///
    /// The caller persists the status afterwards, whether the pass
    /// succeeded or not. Safe to re-run; a pass over converged state issues
    /// no writes.
    ///
    /// # Errors
    ///
    /// Returns an error if a child cannot be written, the runtime is not
    /// registered, or a child cannot be tracked. The matching condition has
    /// already been marked false.
    pub async fn reconcile_kind(&self, function: &mut Function) -> Result<ReconcileOutcome> {
        let key = function.key();
        debug!(function = %key, generation = function.metadata.generation, "Reconciling function");

        function.status.initialize_conditions();
        function.status.observed_generation = function.metadata.generation;

        let artifact = match self.reconcile_code_artifact(function).await {
            Ok(artifact) => artifact,
            Err(e) => {
                function
                    .status
                    .mark_code_artifact_unavailable(e.reason(), &e.to_string());
                return Err(e);
            }
        };
        function.status.mark_code_artifact_available();

        self.tracker.track(&artifact.object_reference(), &key)?;

        let unit = match self.reconcile_compute_unit(function, &artifact).await {
            Ok(unit) => unit,
            Err(e) => {
                function
                    .status
                    .mark_compute_unit_unavailable(e.reason(), &e.to_string());
                return Err(e);
            }
        };

        self.tracker.track(&unit.object_reference(), &key)?;

        let Some(address) = unit.status.address.as_ref().filter(|_| unit.is_ready()) else {
            debug!(function = %key, compute_unit = %unit.key(), "Compute unit not ready");
            function.status.mark_compute_unit_unavailable(
                REASON_COMPUTE_UNIT_NOT_READY,
                &format!("compute unit {:?} is not ready", unit.metadata.name),
            );
            function.status.address = None;
            function.status.ce_attributes.clear();
            function.status.mark_sink_not_advertised(
                REASON_NO_ADDRESS,
                "compute unit has no address to receive events on",
            );
            return Ok(ReconcileOutcome::Waiting);
        };

        function.status.address = Some(service_address(address));
        function.status.mark_compute_unit_available();

        function.status.ce_attributes = vec![EventAttributes {
            event_type: self.config.event_type.clone(),
            source: function.self_link(),
        }];
        function.status.mark_sink_advertised();

        info!(function = %key, address = ?function.status.address.as_ref().map(Url::as_str), "Function reconciled");
        Ok(ReconcileOutcome::Reconciled(ReconcileEvent::reconciled(&key)))
    }

    async fn reconcile_code_artifact(&self, function: &Function) -> Result<CodeArtifact> {
        let expected = expected_code_artifact(&self.config, function);
        let selector = selector_for(&self.config, function);
        let applied = ensure_resource(self.artifacts.as_ref(), expected, &selector).await?;
        Ok(applied.resource)
    }

    async fn reconcile_compute_unit(
        &self,
        function: &mut Function,
        artifact: &CodeArtifact,
    ) -> Result<ComputeUnit> {
        let image = self
            .config
            .runtimes
            .image_for(&function.spec.runtime)?
            .to_string();

        let sink = self.resolve_sink(function).await;
        function.status.sink_uri.clone_from(&sink);

        let expected = expected_compute_unit(
            &self.config,
            function,
            &artifact.metadata.name,
            &image,
            sink.as_ref(),
        );
        let selector = selector_for(&self.config, function);
        let applied = ensure_resource(self.units.as_ref(), expected, &selector).await?;
        Ok(applied.resource)
    }

    /// Best effort: a sink that cannot be resolved is dropped.
    ///
    /// A referenced sink is watched so the function is revisited once the
    /// reference becomes addressable.
    async fn resolve_sink(&self, function: &Function) -> Option<Url> {
        let destination = function.spec.sink.as_ref()?;
        let key = function.key();

        if let Some(reference) = &destination.reference {
            let mut reference = reference.clone();
            reference
                .namespace
                .get_or_insert_with(|| function.metadata.namespace.clone());
            if let Err(e) = self.tracker.track(&reference, &key) {
                warn!(function = %key, sink = %reference, error = %e, "Cannot watch sink reference");
            }
        }

        self.sink_resolver
            .resolve_uri(destination, function)
            .await
            .tap_err(|e| warn!(function = %key, error = %e, "Sink resolution failed, continuing without a sink"))
            .ok()
    }

    /// Get the dependency tracker.
    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.tracker
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Scheme and authority of a compute unit's address.
fn service_address(address: &Url) -> Url {
    let mut service = address.clone();
    service.set_path("");
    service.set_query(None);
    service.set_fragment(None);
    service
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    artifacts: Option<Arc<dyn ResourceClient<CodeArtifact>>>,
    units: Option<Arc<dyn ResourceClient<ComputeUnit>>>,
    sink_resolver: Option<Arc<dyn SinkResolver>>,
    tracker: Option<Arc<dyn Tracker>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            artifacts: None,
            units: None,
            sink_resolver: None,
            tracker: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Use one store for both child kinds and for sink lookups.
    #[must_use]
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: ResourceClient<CodeArtifact> + ResourceClient<ComputeUnit> + AddressableLookup + 'static,
    {
        self.artifacts = Some(store.clone());
        self.units = Some(store.clone());
        self.sink_resolver = Some(Arc::new(StoreSinkResolver::new(store)));
        self
    }

    /// Set the code artifact client.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ResourceClient<CodeArtifact>>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Set the compute unit client.
    #[must_use]
    pub fn with_compute_units(mut self, units: Arc<dyn ResourceClient<ComputeUnit>>) -> Self {
        self.units = Some(units);
        self
    }

    /// Set a custom sink resolver.
    #[must_use]
    pub fn with_sink_resolver(mut self, resolver: Arc<dyn SinkResolver>) -> Self {
        self.sink_resolver = Some(resolver);
        self
    }

    /// Set a custom tracker.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a runtime image.
    #[must_use]
    pub fn runtime(mut self, name: &str, image: impl Into<String>) -> Self {
        self.config.runtimes = self.config.runtimes.with_runtime(name, image);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a store client or the sink
    /// resolver is missing.
    pub fn build(self) -> Result<Reconciler> {
        let artifacts = self
            .artifacts
            .ok_or_else(|| Error::invalid_config("Code artifact client is required"))?;
        let units = self
            .units
            .ok_or_else(|| Error::invalid_config("Compute unit client is required"))?;
        let sink_resolver = self
            .sink_resolver
            .ok_or_else(|| Error::invalid_config("Sink resolver is required"))?;
        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(InMemoryTracker::new()));

        Ok(Reconciler::new(
            artifacts,
            units,
            sink_resolver,
            tracker,
            self.config,
        ))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use fnflow_api::{ConditionStatus, ConditionType, FunctionSpec};

    use super::*;
    use crate::store::InMemoryStore;

    fn reconciler(store: Arc<InMemoryStore>) -> Option<Reconciler> {
        ReconcilerBuilder::new()
            .with_store(store)
            .runtime("python", "registry.example/klr/python")
            .build()
            .ok()
    }

    #[test]
    fn test_builder_requires_clients() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_config_from_controller_config() {
        let controller = ControllerConfig::new().with_runtime("Python", "img");
        let config = ReconcilerConfig::from(&controller);
        assert_eq!(config.runtimes.image_for("python"), Ok("img"));
        assert_eq!(config.label_key, "flow.triggermesh.io/function");
        assert_eq!(config.mount_dir, "/opt");
    }

    #[test]
    fn test_service_address_drops_path() {
        let address = Url::parse("http://greeter.default.example.com:8080/path?q=1#f").ok();
        let service = address.as_ref().map(service_address);
        assert_eq!(
            service.as_ref().map(Url::as_str),
            Some("http://greeter.default.example.com:8080/")
        );
    }

    #[tokio::test]
    async fn test_first_pass_waits_for_compute_unit() {
        let store = InMemoryStore::new_arc();
        let Some(reconciler) = reconciler(store.clone()) else {
            panic!("reconciler should build");
        };
        let stored = store
            .create(Function::new(
                "default",
                "greeter",
                FunctionSpec::new("python3.9", "handler", "code"),
            ))
            .await;
        let Ok(mut function) = stored else {
            panic!("function should be stored");
        };

        let outcome = reconciler.reconcile_kind(&mut function).await;

        assert_eq!(outcome, Ok(ReconcileOutcome::Waiting));
        assert_eq!(
            function.status.conditions.status(ConditionType::CodeArtifactAvailable),
            ConditionStatus::True
        );
        assert_eq!(
            function.status.conditions.status(ConditionType::ComputeUnitAvailable),
            ConditionStatus::False
        );
        assert!(function.status.address.is_none());
        assert_eq!(function.status.observed_generation, 1);
    }
}
