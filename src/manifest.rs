//! Function manifests.
//!
//! A manifest is a YAML stream of one or more documents. Each document is a
//! Function with optional `apiVersion` and `kind` envelope fields; when
//! present they must name the function resource.

use std::path::Path;

use anyhow::{Context, Result, bail};
use fnflow_api::{FUNCTION_API_VERSION, Function, Resource};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(flatten)]
    function: Function,
}

/// Parse every function in a YAML stream.
///
/// Empty documents are skipped. Status and store-assigned metadata in the
/// input are discarded.
///
/// # Errors
///
/// Returns an error if a document does not parse, names another kind, or
/// has an empty name.
pub fn parse_functions(contents: &str) -> Result<Vec<Function>> {
    let mut functions = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(contents).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {index} is not valid YAML"))?;
        if value.is_null() {
            continue;
        }

        let Document {
            api_version,
            kind,
            function,
        } = serde_yaml::from_value(value)
            .with_context(|| format!("document {index} is not a Function"))?;

        if let Some(kind) = kind.filter(|kind| kind != Function::KIND) {
            bail!("document {index} has kind '{kind}', expected '{}'", Function::KIND);
        }
        if let Some(api_version) = api_version.filter(|v| v != FUNCTION_API_VERSION) {
            bail!(
                "document {index} has apiVersion '{api_version}', expected '{FUNCTION_API_VERSION}'"
            );
        }
        if function.metadata.name.trim().is_empty() {
            bail!("document {index} has no metadata.name");
        }

        functions.push(Function::new(
            function.metadata.namespace,
            function.metadata.name,
            function.spec,
        ));
    }

    Ok(functions)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn load_functions(path: &Path) -> Result<Vec<Function>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    parse_functions(&contents).with_context(|| format!("Invalid manifest {}", path.display()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const TWO_FUNCTIONS: &str = r#"
apiVersion: flow.triggermesh.io/v1alpha1
kind: Function
metadata:
  name: greeter
  namespace: team-a
spec:
  runtime: python
  entrypoint: handler
  public: true
  code: |
    def handler(event, context):
        return {"hello": "world"}
---
---
metadata:
  name: echo
spec:
  runtime: node
  entrypoint: handle
  code: "module.exports.handle = async (e) => e"
  sink:
    uri: http://display.default.svc.cluster.local
"#;

    #[test]
    fn parses_every_document() {
        let functions = parse_functions(TWO_FUNCTIONS).unwrap();

        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].metadata.namespace, "team-a");
        assert!(functions[0].spec.public);
        assert_eq!(functions[1].metadata.namespace, "default");
        assert!(functions[1].spec.sink.is_some());
    }

    #[test]
    fn rejects_other_kinds() {
        let manifest = "kind: Service\nmetadata:\n  name: x\nspec:\n  runtime: python\n  entrypoint: h\n  code: c\n";
        assert!(parse_functions(manifest).is_err());
    }

    #[test]
    fn rejects_missing_name() {
        let manifest = "metadata:\n  name: ''\nspec:\n  runtime: python\n  entrypoint: h\n  code: c\n";
        assert!(parse_functions(manifest).is_err());
    }

    #[test]
    fn drops_status_from_input() {
        let manifest = "metadata:\n  name: x\n  resourceVersion: 9\nspec:\n  runtime: python\n  entrypoint: h\n  code: c\nstatus:\n  observedGeneration: 4\n";
        let functions = parse_functions(manifest).unwrap();
        assert_eq!(functions[0].status.observed_generation, 0);
        assert_eq!(functions[0].metadata.resource_version, 0);
    }
}
