//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// fnflow - function controller
#[derive(Parser, Debug)]
#[command(name = "fnflow")]
#[command(version)]
#[command(about = "Keeps declared functions in sync with their code artifact and compute unit")]
#[command(
    long_about = "fnflow reconciles Function resources into a code artifact holding the source and a compute unit running it in a runtime container, and publishes the unit's address once it is ready."
)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the registered runtimes
    Runtimes {
        /// Controller config file (.toml, .yaml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the children a function manifest would produce
    Render {
        /// Controller config file (.toml, .yaml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Function manifest (YAML, may hold several documents)
        manifest: PathBuf,
    },

    /// Run the controller against an in-memory store seeded with manifests
    Run {
        /// Controller config file (.toml, .yaml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Function manifests (YAML, may hold several documents)
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        /// Delay before a new compute unit is reported ready, in milliseconds
        #[arg(long, default_value_t = 500)]
        ready_after: u64,

        /// Give up waiting for convergence after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}
