//! # fnflow
//!
//! Entry point for the function controller CLI.
//!
//! - `runtimes` lists the registered runtime images
//! - `render` prints the children a manifest would produce
//! - `run` drives the controller against an in-memory store until every
//!   function is ready
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fnflow::cli::{Cli, LogFormat};
use fnflow::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format);
    debug!(command = ?cli.command, "Starting fnflow");

    execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
