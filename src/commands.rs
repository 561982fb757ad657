//! CLI command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fnflow_api::{Function, ObjectKey, Resource};
use fnflow_core::ControllerConfig;
use fnflow_reconciler::resources::{expected_code_artifact, expected_compute_unit};
use fnflow_reconciler::{
    Controller, ControllerSettings, FunctionClient, FunctionStatusExt, InMemoryStore,
    ReconcilerBuilder, ReconcilerConfig, ResourceClient, SinkResolver, StoreSinkResolver,
    generate_name,
};
use futures::future::try_join_all;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::manifest::load_functions;
use crate::simulate::ReadinessSimulator;

/// How often `run` checks whether every function is ready.
const CONVERGENCE_POLL: Duration = Duration::from_millis(100);

/// Execute a CLI command.
///
/// # Errors
///
/// Returns an error if the command fails.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Runtimes { config } => cmd_runtimes(config.as_deref()),
        Commands::Render { config, manifest } => cmd_render(config.as_deref(), &manifest).await,
        Commands::Run {
            config,
            manifests,
            ready_after,
            timeout,
        } => {
            cmd_run(
                config.as_deref(),
                &manifests,
                Duration::from_millis(ready_after),
                timeout.map(Duration::from_secs),
            )
            .await
        }
    }
}

/// Load the controller config from `path`, or from defaults plus the
/// environment when no file is given.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the config is invalid.
pub fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    match path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let config = ControllerConfig::default().with_env(std::env::vars());
            config.validate().context("Invalid configuration")?;
            Ok(config)
        }
    }
}

fn cmd_runtimes(config: Option<&Path>) -> Result<()> {
    let config = ReconcilerConfig::from(&load_config(config)?);

    if config.runtimes.is_empty() {
        println!("No runtimes registered. Add [runtimes] to the config or set RUNTIME_<NAME>=<image>.");
        return Ok(());
    }

    let width = config
        .runtimes
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);
    for (name, image) in config.runtimes.iter() {
        println!("{name:<width$}  {image}");
    }
    Ok(())
}

/// Print the children each function in `manifest` would get, as YAML.
///
/// Sinks are resolved the same best-effort way a pass does them. No store is
/// consulted, so referenced sinks come out empty.
async fn cmd_render(config: Option<&Path>, manifest: &Path) -> Result<()> {
    let config = ReconcilerConfig::from(&load_config(config)?);
    let functions = load_functions(manifest)?;
    let resolver = StoreSinkResolver::new(InMemoryStore::new_arc());

    let mut documents = Vec::with_capacity(functions.len() * 2);
    for function in &functions {
        let image = config
            .runtimes
            .image_for(&function.spec.runtime)
            .with_context(|| format!("Cannot render function {}", function.key()))?;

        let mut artifact = expected_code_artifact(&config, function);
        artifact.metadata.name = generate_name(&artifact.metadata.name);

        let sink = match &function.spec.sink {
            Some(destination) => resolver
                .resolve_uri(destination, function)
                .await
                .inspect_err(|e| warn!(function = %function.key(), error = %e, "Sink left unresolved"))
                .ok(),
            None => None,
        };

        let mut unit = expected_compute_unit(
            &config,
            function,
            &artifact.metadata.name,
            image,
            sink.as_ref(),
        );
        unit.metadata.name = generate_name(&unit.metadata.name);

        documents.push(serde_yaml::to_string(&artifact).context("Failed to render code artifact")?);
        documents.push(serde_yaml::to_string(&unit).context("Failed to render compute unit")?);
    }

    print!("{}", documents.join("---\n"));
    Ok(())
}

/// Seed an in-memory store with the manifests and run the controller until
/// every function is ready, the timeout passes or Ctrl+C is pressed.
async fn cmd_run(
    config: Option<&Path>,
    manifests: &[PathBuf],
    ready_after: Duration,
    timeout: Option<Duration>,
) -> Result<()> {
    let config = load_config(config)?;
    let functions = manifests
        .iter()
        .map(|path| load_functions(path))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    let store = InMemoryStore::new_arc();
    let reconciler = ReconcilerBuilder::new()
        .with_store(store.clone())
        .with_config(ReconcilerConfig::from(&config))
        .build()
        .context("Failed to build reconciler")?;
    let controller = Arc::new(Controller::new(
        Arc::new(reconciler),
        store.clone(),
        ControllerSettings::from(&config),
    ));
    let stopper = controller.stopper();

    let simulator = tokio::spawn(
        ReadinessSimulator::new(store.clone(), ready_after).run(store.subscribe()),
    );
    let running = tokio::spawn(Arc::clone(&controller).run(store.subscribe()));

    let keys = try_join_all(functions.into_iter().map(|function| store.create(function)))
        .await
        .context("Failed to seed functions")?
        .iter()
        .map(Resource::key)
        .collect::<Vec<ObjectKey>>();
    info!(count = keys.len(), "Functions seeded");

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = wait_until_ready(&store, &keys) => info!("All functions ready"),
        () = deadline => warn!("Timed out waiting for functions to become ready"),
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down");
        }
    }

    stopper.stop();
    running
        .await
        .context("Controller task failed")?
        .context("Controller stopped with an error")?;
    simulator.abort();

    print_statuses(&store, &keys).await
}

async fn wait_until_ready(store: &InMemoryStore, keys: &[ObjectKey]) {
    loop {
        let mut ready = 0;
        for key in keys {
            if let Ok(Some(function)) = store.get_function(key).await {
                if function.status.is_ready() {
                    ready += 1;
                }
            }
        }
        if ready == keys.len() {
            return;
        }
        tokio::time::sleep(CONVERGENCE_POLL).await;
    }
}

async fn print_statuses(store: &InMemoryStore, keys: &[ObjectKey]) -> Result<()> {
    let mut report = Vec::with_capacity(keys.len());
    for key in keys {
        let function: Option<Function> = store
            .get_function(key)
            .await
            .with_context(|| format!("Failed to read function {key}"))?;
        let Some(function) = function else {
            continue;
        };
        report.push(json!({
            "namespace": function.metadata.namespace,
            "name": function.metadata.name,
            "ready": function.status.is_ready(),
            "status": function.status,
        }));
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize statuses")?
    );
    Ok(())
}
