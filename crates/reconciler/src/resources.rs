//! Builders for the children a function should have.

use fnflow_api::{
    CODE_KEY, CodeArtifact, ComputeUnit, ComputeUnitSpec, ComputeUnitStatus, Container, EnvVar, Function, KeyToPath,
    LabelSelector, ObjectMeta, RevisionTemplate, Volume, VolumeMount,
};
use url::Url;

use crate::layout::SourceLayout;
use crate::reconciler::ReconcilerConfig;

/// Env var carrying the resolved sink URI.
pub const ENV_SINK: &str = "K_SINK";
/// Env var naming the handler inside the mounted source.
pub const ENV_HANDLER: &str = "_HANDLER";
/// Env var selecting the runtime's response format.
pub const ENV_RESPONSE_WRAPPER: &str = "RESPONSE_WRAPPER";
/// Env var with the event type stamped on results.
pub const ENV_EVENT_TYPE: &str = "CE_TYPE";
/// Env var with the event source stamped on results.
pub const ENV_EVENT_SOURCE: &str = "CE_K_SERVICE";
/// Env var with the event subject stamped on results.
pub const ENV_EVENT_SUBJECT: &str = "CE_SUBJECT";

const RESPONSE_WRAPPER_CLOUDEVENTS: &str = "CLOUDEVENTS";

/// Selector matching every child of `function`.
#[must_use]
pub fn selector_for(config: &ReconcilerConfig, function: &Function) -> LabelSelector {
    LabelSelector::single(config.label_key.clone(), function.metadata.name.clone())
}

/// Labels, namespace, owner reference and name base shared by both children.
///
/// The name is the function's; the apply step adds the random suffix.
fn child_meta(config: &ReconcilerConfig, function: &Function) -> ObjectMeta {
    let meta = ObjectMeta::new(
        function.metadata.namespace.clone(),
        function.metadata.name.clone(),
    )
    .with_label(config.label_key.clone(), function.metadata.name.clone());

    match function.controller_reference() {
        Some(owner) => meta.with_owner(owner),
        None => meta,
    }
}

/// Code artifact holding `spec.code`.
#[must_use]
pub fn expected_code_artifact(config: &ReconcilerConfig, function: &Function) -> CodeArtifact {
    CodeArtifact::new(child_meta(config, function)).with_code(function.spec.code.clone())
}

/// Compute unit running `artifact_name`'s code on `image`.
#[must_use]
pub fn expected_compute_unit(
    config: &ReconcilerConfig,
    function: &Function,
    artifact_name: &str,
    image: &str,
    sink: Option<&Url>,
) -> ComputeUnit {
    let layout = SourceLayout::resolve(&function.spec.runtime, &function.spec.entrypoint);
    let sink = sink.map(Url::to_string).unwrap_or_default();

    let env = vec![
        EnvVar::new(ENV_SINK, sink),
        EnvVar::new(ENV_HANDLER, layout.handler.clone()),
        EnvVar::new(ENV_RESPONSE_WRAPPER, RESPONSE_WRAPPER_CLOUDEVENTS),
        EnvVar::new(ENV_EVENT_TYPE, config.event_type.clone()),
        EnvVar::new(ENV_EVENT_SOURCE, function.self_link()),
        EnvVar::new(ENV_EVENT_SUBJECT, layout.handler),
    ];

    ComputeUnit {
        metadata: child_meta(config, function),
        spec: ComputeUnitSpec {
            public: function.spec.public,
            template: RevisionTemplate {
                container: Container {
                    image: image.to_string(),
                    command: vec![config.runtime_entrypoint.clone()],
                    env,
                    volume_mounts: vec![VolumeMount {
                        name: artifact_name.to_string(),
                        mount_path: config.mount_dir.clone(),
                        read_only: true,
                    }],
                },
                volumes: vec![Volume {
                    name: artifact_name.to_string(),
                    artifact_name: artifact_name.to_string(),
                    items: vec![KeyToPath {
                        key: CODE_KEY.to_string(),
                        path: layout.mounted_file_name,
                    }],
                }],
            },
        },
        status: ComputeUnitStatus::default(),
    }
}
