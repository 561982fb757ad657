//! End-to-end behaviour of a single reconcile pass against the in-memory store.
//!
//! Every test drives `Reconciler::reconcile_kind` directly and inspects the
//! store afterwards; the controller runtime is covered in `controller_test.rs`.

#![allow(clippy::panic)]

use std::sync::Arc;

use fnflow_api::{
    CodeArtifact, ComputeUnit, ConditionStatus, ConditionType, Destination, Function, FunctionSpec,
    LabelSelector, ObjectMeta, ObjectReference, Resource,
};
use fnflow_reconciler::resources::ENV_SINK;
use fnflow_reconciler::{
    Error, InMemoryStore, InMemoryTracker, ReconcileOutcome, Reconciler, ReconcilerBuilder,
    ResourceClient, StoreOp, Tracker,
};
use url::Url;

const LABEL: &str = "flow.triggermesh.io/function";
const PYTHON_IMAGE: &str = "registry.example/klr/python:3.9";
const NODE_IMAGE: &str = "registry.example/klr/node:14";

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

/// Test helper: Unwrap an Option or panic with context
fn unwrap_option<T>(option: Option<T>, context: &str) -> T {
    match option {
        Some(value) => value,
        None => panic!("{}", context),
    }
}

struct Fixture {
    store: Arc<InMemoryStore>,
    tracker: Arc<InMemoryTracker>,
    reconciler: Reconciler,
}

fn fixture() -> Fixture {
    let store = InMemoryStore::new_arc();
    let tracker = Arc::new(InMemoryTracker::new());
    let reconciler = unwrap_result(
        ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_tracker(tracker.clone())
            .runtime("python", PYTHON_IMAGE)
            .runtime("node", NODE_IMAGE)
            .build(),
        "reconciler should build",
    );
    Fixture {
        store,
        tracker,
        reconciler,
    }
}

impl Fixture {
    async fn create_function(&self, name: &str, spec: FunctionSpec) -> Function {
        unwrap_result(
            self.store.create(Function::new("default", name, spec)).await,
            "function should be created",
        )
    }

    async fn artifacts(&self, function: &str) -> Vec<CodeArtifact> {
        unwrap_result(
            self.store
                .list("default", &LabelSelector::single(LABEL, function))
                .await,
            "artifacts should list",
        )
    }

    async fn units(&self, function: &str) -> Vec<ComputeUnit> {
        unwrap_result(
            self.store
                .list("default", &LabelSelector::single(LABEL, function))
                .await,
            "compute units should list",
        )
    }

    async fn only_unit(&self, function: &str) -> ComputeUnit {
        let mut units = self.units(function).await;
        assert_eq!(units.len(), 1, "exactly one compute unit expected");
        unwrap_option(units.pop(), "compute unit")
    }

    async fn mark_ready(&self, function: &str) -> Url {
        let unit = self.only_unit(function).await;
        let address = unwrap_result(
            Url::parse(&format!(
                "http://{}.default.svc.cluster.local/ignored/path",
                unit.metadata.name
            )),
            "address should parse",
        );
        unwrap_result(
            self.store.mark_ready(&unit.key(), address.clone()).await,
            "compute unit should be marked ready",
        );
        address
    }
}

fn python_spec(code: &str) -> FunctionSpec {
    FunctionSpec::new("python3.9", "handler", code)
}

// ==========================================================================
// Convergence and idempotence
// ==========================================================================

/// Given a new function
/// When it is reconciled twice with no outside changes
/// Then the second pass issues no writes
#[tokio::test]
async fn second_pass_issues_no_writes() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;

    let first = fx.reconciler.reconcile_kind(&mut function).await;
    assert_eq!(first, Ok(ReconcileOutcome::Waiting));
    let writes = fx.store.child_write_count();
    let status = function.status.clone();

    let second = fx.reconciler.reconcile_kind(&mut function).await;

    assert_eq!(second, Ok(ReconcileOutcome::Waiting));
    assert_eq!(fx.store.child_write_count(), writes);
    assert_eq!(function.status, status);
}

/// Given a converged, ready function
/// When it is reconciled again
/// Then neither children nor status change
#[tokio::test]
async fn ready_function_is_stable() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "first pass");
    fx.mark_ready("greeter").await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "ready pass");
    let writes = fx.store.child_write_count();
    let status = function.status.clone();

    let outcome = unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "third pass");

    assert!(!outcome.is_waiting());
    assert_eq!(fx.store.child_write_count(), writes);
    assert_eq!(function.status, status);
}

/// Given a function
/// When it has been reconciled several times
/// Then exactly one code artifact and one compute unit exist
#[tokio::test]
async fn exactly_one_of_each_child() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;

    for _ in 0..3 {
        unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");
    }

    assert_eq!(fx.artifacts("greeter").await.len(), 1);
    assert_eq!(fx.units("greeter").await.len(), 1);
}

// ==========================================================================
// Identity stability
// ==========================================================================

/// Given a reconciled function
/// When its code changes
/// Then the artifact is updated in place and the compute unit keeps its name
#[tokio::test]
async fn code_update_keeps_child_names() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "first pass");
    let artifact = unwrap_option(fx.artifacts("greeter").await.pop(), "artifact");
    let unit = fx.only_unit("greeter").await;

    function.spec.code = "v2".to_string();
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "second pass");

    let updated = unwrap_option(fx.artifacts("greeter").await.pop(), "artifact");
    assert_eq!(updated.metadata.name, artifact.metadata.name);
    assert_eq!(updated.metadata.uid, artifact.metadata.uid);
    assert_eq!(updated.code(), Some("v2"));
    assert_eq!(fx.only_unit("greeter").await.metadata.name, unit.metadata.name);
}

/// Given a reconciled function
/// When its code artifact is deleted out of band
/// Then the next pass creates one under a fresh name
#[tokio::test]
async fn deleted_artifact_is_recreated_with_new_name() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "first pass");
    let artifact = unwrap_option(fx.artifacts("greeter").await.pop(), "artifact");

    unwrap_result(
        ResourceClient::<CodeArtifact>::delete(fx.store.as_ref(), &artifact.key()).await,
        "artifact should delete",
    );
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "second pass");

    let recreated = unwrap_option(fx.artifacts("greeter").await.pop(), "artifact");
    assert_ne!(recreated.metadata.name, artifact.metadata.name);
    assert!(recreated.metadata.name.starts_with("greeter-"));
}

/// Given two artifacts labeled for the same function
/// When the function is reconciled
/// Then only the oldest remains
#[tokio::test]
async fn duplicate_children_collapse() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    let owner = unwrap_option(function.controller_reference(), "owner reference");
    for name in ["greeter-first1", "greeter-second"] {
        let artifact = CodeArtifact::new(
            ObjectMeta::new("default", name)
                .with_label(LABEL, "greeter")
                .with_owner(owner.clone()),
        )
        .with_code("stale");
        unwrap_result(fx.store.create(artifact).await, "seed artifact");
    }
    let oldest = unwrap_option(
        fx.artifacts("greeter")
            .await
            .into_iter()
            .min_by_key(|a| (a.metadata.creation_timestamp, a.metadata.name.clone())),
        "seeded artifacts",
    );

    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");

    let remaining = fx.artifacts("greeter").await;
    assert_eq!(remaining.len(), 1);
    let kept = unwrap_option(remaining.first(), "artifact");
    assert_eq!(kept.metadata.name, oldest.metadata.name);
    assert_eq!(kept.code(), Some("v1"));
}

// ==========================================================================
// Runtime and layout
// ==========================================================================

/// Given runtime "python3.9"
/// When the compute unit is built
/// Then the python image is used and the source is mounted as source.py
#[tokio::test]
async fn python_runtime_mounts_py_source() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;

    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");

    let unit = fx.only_unit("greeter").await;
    let template = &unit.spec.template;
    assert_eq!(template.container.image, PYTHON_IMAGE);
    let item = unwrap_option(
        template.volumes.first().and_then(|v| v.items.first()),
        "volume item",
    );
    assert_eq!(item.path, "source.py");
    assert_eq!(unit.env("_HANDLER"), Some("source.handler"));
}

/// Given runtime "nodejs14.x"
/// When the compute unit is built
/// Then the source is mounted with a js extension
#[tokio::test]
async fn node_runtime_mounts_js_source() {
    let fx = fixture();
    let mut function = fx
        .create_function("echo", FunctionSpec::new("nodejs14.x", "handle", "module.exports = {}"))
        .await;

    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");

    let unit = fx.only_unit("echo").await;
    let item = unwrap_option(
        unit.spec.template.volumes.first().and_then(|v| v.items.first()),
        "volume item",
    );
    assert_eq!(item.path, "source.js");
    assert_eq!(unit.spec.template.container.image, NODE_IMAGE);
}

/// Given an unregistered runtime
/// When the function is reconciled
/// Then the pass fails with RuntimeNotRegistered and no compute unit exists
#[tokio::test]
async fn unknown_runtime_marks_compute_unit_unavailable() {
    let fx = fixture();
    let mut function = fx
        .create_function("legacy", FunctionSpec::new("cobol", "MAIN", "DISPLAY 'HI'."))
        .await;

    let result = fx.reconciler.reconcile_kind(&mut function).await;

    assert!(matches!(result, Err(Error::RuntimeNotRegistered { .. })));
    let condition = unwrap_option(
        function.status.conditions.get(ConditionType::ComputeUnitAvailable),
        "condition",
    );
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "RuntimeNotRegistered");
    assert_eq!(
        function.status.conditions.status(ConditionType::Ready),
        ConditionStatus::False
    );
    assert!(fx.units("legacy").await.is_empty());
    assert_eq!(fx.artifacts("legacy").await.len(), 1);
}

// ==========================================================================
// Sink resolution
// ==========================================================================

/// Given a sink reference that does not resolve
/// When the function is reconciled
/// Then the compute unit is created with an empty sink, the pass succeeds
/// and the reference is watched
#[tokio::test]
async fn unresolvable_sink_degrades_to_empty() {
    let fx = fixture();
    let sink = Destination::from_reference(ObjectReference {
        api_version: ComputeUnit::API_VERSION.to_string(),
        kind: ComputeUnit::KIND.to_string(),
        name: "missing".to_string(),
        namespace: None,
    });
    let mut function = fx
        .create_function("greeter", python_spec("v1").with_sink(sink))
        .await;

    let outcome = fx.reconciler.reconcile_kind(&mut function).await;

    assert_eq!(outcome, Ok(ReconcileOutcome::Waiting));
    assert_eq!(fx.only_unit("greeter").await.env(ENV_SINK), Some(""));
    assert!(function.status.sink_uri.is_none());
    assert_ne!(
        function.status.conditions.status(ConditionType::SinkAdvertised),
        ConditionStatus::False
    );

    let watched = ObjectReference::new(
        ComputeUnit::API_VERSION,
        ComputeUnit::KIND,
        "default",
        "missing",
    );
    assert_eq!(fx.tracker.owners_of(&watched), vec![function.key()]);
}

/// Given a sink pointing at another ready compute unit
/// When the function is reconciled
/// Then the sink URI is injected and recorded in status
#[tokio::test]
async fn resolved_sink_is_injected() {
    let fx = fixture();
    let display = unwrap_result(
        fx.store
            .create(ComputeUnit {
                metadata: ObjectMeta::new("default", "display"),
                ..ComputeUnit::default()
            })
            .await,
        "display unit",
    );
    let display_address = unwrap_result(
        Url::parse("http://display.default.svc.cluster.local"),
        "address",
    );
    unwrap_result(
        fx.store.mark_ready(&display.key(), display_address.clone()).await,
        "display ready",
    );
    let mut function = fx
        .create_function(
            "greeter",
            python_spec("v1").with_sink(Destination::from_reference(display.object_reference())),
        )
        .await;

    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");

    assert_eq!(function.status.sink_uri, Some(display_address.clone()));
    assert_eq!(
        fx.only_unit("greeter").await.env(ENV_SINK),
        Some(display_address.as_str())
    );
}

// ==========================================================================
// Readiness gating
// ==========================================================================

/// Given a compute unit that is not ready
/// When the function is reconciled
/// Then address and event attributes stay empty and Ready is not true
#[tokio::test]
async fn not_ready_unit_withholds_address() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;

    let outcome = fx.reconciler.reconcile_kind(&mut function).await;

    assert_eq!(outcome, Ok(ReconcileOutcome::Waiting));
    assert!(function.status.address.is_none());
    assert!(function.status.ce_attributes.is_empty());
    let condition = unwrap_option(
        function.status.conditions.get(ConditionType::ComputeUnitAvailable),
        "condition",
    );
    assert_eq!(condition.reason, "ComputeUnitNotReady");
    assert_ne!(
        function.status.conditions.status(ConditionType::Ready),
        ConditionStatus::True
    );
}

/// Given a compute unit that became ready
/// When the function is reconciled
/// Then address, event attributes and Ready are published
#[tokio::test]
async fn ready_unit_publishes_address() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "first pass");
    let address = fx.mark_ready("greeter").await;

    let outcome = unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "ready pass");

    let event = unwrap_option(outcome.event(), "reconciled event");
    assert_eq!(event.reason, "FunctionReconciled");
    assert_eq!(event.message, "Function reconciled: \"default/greeter\"");

    let published = unwrap_option(function.status.address.clone(), "address");
    assert_eq!(published.host_str(), address.host_str());
    assert_eq!(published.path(), "/");

    let attributes = unwrap_option(function.status.ce_attributes.first(), "attributes");
    assert_eq!(attributes.event_type, "io.triggermesh.flow.function");
    assert_eq!(
        attributes.source,
        "/apis/flow.triggermesh.io/v1alpha1/namespaces/default/functions/greeter"
    );
    assert_eq!(
        function.status.conditions.status(ConditionType::Ready),
        ConditionStatus::True
    );
}

/// Given a ready function
/// When its compute unit stops being ready
/// Then the address, attributes and SinkAdvertised are withdrawn
#[tokio::test]
async fn readiness_loss_withdraws_address() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "first pass");
    fx.mark_ready("greeter").await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "ready pass");

    let unit = fx.only_unit("greeter").await;
    unwrap_result(
        fx.store
            .set_compute_unit_status(&unit.key(), Default::default())
            .await,
        "unit status reset",
    );
    let outcome = fx.reconciler.reconcile_kind(&mut function).await;

    assert_eq!(outcome, Ok(ReconcileOutcome::Waiting));
    assert!(function.status.address.is_none());
    assert!(function.status.ce_attributes.is_empty());
    assert_eq!(
        function.status.conditions.status(ConditionType::SinkAdvertised),
        ConditionStatus::Unknown
    );
    assert!(!fnflow_reconciler::FunctionStatusExt::is_ready(&function.status));
}

// ==========================================================================
// Failures
// ==========================================================================

/// Given the store rejects the next artifact creation
/// When the function is reconciled
/// Then CodeArtifactAvailable is false with a store reason
#[tokio::test]
async fn artifact_store_failure_marks_condition() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    fx.store.fail_next(StoreOp::Create, CodeArtifact::KIND);

    let result = fx.reconciler.reconcile_kind(&mut function).await;

    assert!(matches!(result, Err(Error::Store { .. })));
    let condition = unwrap_option(
        function.status.conditions.get(ConditionType::CodeArtifactAvailable),
        "condition",
    );
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "StoreFailure");
    assert!(fx.units("greeter").await.is_empty());
}

/// Given the store rejects the next compute unit list
/// When the function is reconciled
/// Then ComputeUnitAvailable is false and a retry converges
#[tokio::test]
async fn compute_unit_store_failure_is_retryable() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    fx.store.fail_next(StoreOp::List, ComputeUnit::KIND);

    let result = fx.reconciler.reconcile_kind(&mut function).await;
    assert!(matches!(result, Err(Error::Store { .. })));
    assert_eq!(
        function.status.conditions.status(ConditionType::ComputeUnitAvailable),
        ConditionStatus::False
    );

    let retry = fx.reconciler.reconcile_kind(&mut function).await;
    assert_eq!(retry, Ok(ReconcileOutcome::Waiting));
    assert_eq!(fx.units("greeter").await.len(), 1);
}

/// A tracker that refuses every registration.
struct RefusingTracker;

impl Tracker for RefusingTracker {
    fn track(
        &self,
        reference: &ObjectReference,
        _owner: &fnflow_api::ObjectKey,
    ) -> fnflow_reconciler::Result<()> {
        Err(Error::tracking(reference, "watch limit reached"))
    }

    fn owners_of(&self, _reference: &ObjectReference) -> Vec<fnflow_api::ObjectKey> {
        Vec::new()
    }

    fn untrack_owner(&self, _owner: &fnflow_api::ObjectKey) {}

    fn forget(&self, _reference: &ObjectReference) {}
}

/// Given a tracker that cannot register watches
/// When the function is reconciled
/// Then the pass aborts before touching the compute unit
#[tokio::test]
async fn tracking_failure_aborts_pass() {
    let store = InMemoryStore::new_arc();
    let reconciler = unwrap_result(
        ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_tracker(Arc::new(RefusingTracker))
            .runtime("python", PYTHON_IMAGE)
            .build(),
        "reconciler should build",
    );
    let mut function = unwrap_result(
        store
            .create(Function::new("default", "greeter", python_spec("v1")))
            .await,
        "function",
    );

    let result = reconciler.reconcile_kind(&mut function).await;

    assert!(matches!(result, Err(Error::Tracking { .. })));
    let units: Vec<ComputeUnit> = unwrap_result(
        store.list("default", &LabelSelector::new()).await,
        "list units",
    );
    assert!(units.is_empty());
}

/// Given a reconciled function
/// Then both children are tracked against it
#[tokio::test]
async fn children_are_tracked() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;

    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");

    let artifact = unwrap_option(fx.artifacts("greeter").await.pop(), "artifact");
    let unit = fx.only_unit("greeter").await;
    assert_eq!(fx.tracker.owners_of(&artifact.object_reference()), vec![function.key()]);
    assert_eq!(fx.tracker.owners_of(&unit.object_reference()), vec![function.key()]);
}

/// Given a reconciled function
/// When the function is deleted
/// Then its children are collected
#[tokio::test]
async fn deleting_function_collects_children() {
    let fx = fixture();
    let mut function = fx.create_function("greeter", python_spec("v1")).await;
    unwrap_result(fx.reconciler.reconcile_kind(&mut function).await, "pass");

    unwrap_result(
        ResourceClient::<Function>::delete(fx.store.as_ref(), &function.key()).await,
        "function should delete",
    );

    assert!(fx.artifacts("greeter").await.is_empty());
    assert!(fx.units("greeter").await.is_empty());
}
