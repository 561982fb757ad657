//! End-to-end: manifest on disk, controller and readiness simulator over the
//! in-memory store.
//!
//! These tests verify that:
//! - Manifests load from files with several documents
//! - Every seeded function converges to Ready
//! - Sinks naming another function resolve once that function is addressable

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use fnflow::fnflow_api::{
    ComputeUnit, ConditionStatus, ConditionType, Function, LabelSelector, ObjectKey, Resource,
};
use fnflow::fnflow_core::ControllerConfig;
use fnflow::fnflow_reconciler::resources::ENV_SINK;
use fnflow::fnflow_reconciler::{
    Controller, ControllerSettings, FunctionClient, FunctionStatusExt, InMemoryStore,
    ReconcilerBuilder, ReconcilerConfig, ResourceClient,
};
use fnflow::manifest::load_functions;
use fnflow::simulate::ReadinessSimulator;

const MANIFEST: &str = r#"
apiVersion: flow.triggermesh.io/v1alpha1
kind: Function
metadata:
  name: display
spec:
  runtime: python3.9
  entrypoint: handler
  code: |
    def handler(event, context):
        return event
---
apiVersion: flow.triggermesh.io/v1alpha1
kind: Function
metadata:
  name: greeter
spec:
  runtime: nodejs14.x
  entrypoint: handle
  public: true
  code: "module.exports.handle = async (e) => ({ hello: e.name })"
  sink:
    ref:
      apiVersion: flow.triggermesh.io/v1alpha1
      kind: Function
      name: display
"#;

fn config() -> ControllerConfig {
    ControllerConfig::default()
        .with_runtime("python", "registry.example/klr/python")
        .with_runtime("node", "registry.example/klr/node")
}

async fn stored(store: &InMemoryStore, key: &ObjectKey) -> Option<Function> {
    store.get_function(key).await.ok().flatten()
}

/// Given a manifest file with two functions, one sinking into the other
/// When the controller runs with the readiness simulator
/// Then both converge to Ready and the sink is injected
#[tokio::test]
async fn test_manifest_functions_converge() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
    file.write_all(MANIFEST.as_bytes())?;
    let functions = load_functions(file.path())?;
    assert_eq!(functions.len(), 2);

    let config = config();
    let store = InMemoryStore::new_arc();
    let reconciler = ReconcilerBuilder::new()
        .with_store(store.clone())
        .with_config(ReconcilerConfig::from(&config))
        .build()?;
    let controller = Arc::new(Controller::new(
        Arc::new(reconciler),
        store.clone(),
        ControllerSettings::from(&config),
    ));
    let stopper = controller.stopper();

    let simulator = tokio::spawn(
        ReadinessSimulator::new(store.clone(), Duration::from_millis(10)).run(store.subscribe()),
    );
    let running = tokio::spawn(Arc::clone(&controller).run(store.subscribe()));

    let mut keys = Vec::new();
    for function in functions {
        keys.push(store.create(function).await?.key());
    }

    let greeter = ObjectKey::new("default", "greeter");
    let converged = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut ready = true;
            for key in &keys {
                ready &= stored(&store, key)
                    .await
                    .is_some_and(|function| function.status.is_ready());
            }
            let sink_set = stored(&store, &greeter)
                .await
                .is_some_and(|function| function.status.sink_uri.is_some());
            if ready && sink_set {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "functions should converge");

    stopper.stop();
    let stopped = tokio::time::timeout(Duration::from_secs(2), running).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));
    simulator.abort();

    let Some(greeter) = stored(&store, &greeter).await else {
        return Err("greeter should exist".into());
    };
    assert_eq!(
        greeter.status.conditions.status(ConditionType::SinkAdvertised),
        ConditionStatus::True
    );
    let sink_host = greeter
        .status
        .sink_uri
        .as_ref()
        .and_then(|uri| uri.host_str().map(str::to_string))
        .unwrap_or_default();
    assert!(sink_host.starts_with("display-"), "sink host was {sink_host}");
    assert!(sink_host.ends_with(".default.svc.cluster.local"));

    let units: Vec<ComputeUnit> = store
        .list("default", &LabelSelector::single(config.label_key.clone(), "greeter"))
        .await?;
    assert_eq!(units.len(), 1);
    assert_eq!(
        units[0].env(ENV_SINK),
        greeter.status.sink_uri.as_ref().map(url::Url::as_str)
    );
    assert!(units[0].spec.public);

    Ok(())
}
