//! skiff - run and inspect event-driven skills
//!
//! Main entry point for the skiff CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use skiff_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{config, inspect, query, serve};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// skiff - run and inspect event-driven skills
#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Project directory to look for skiff.toml in (default: current directory)
    #[arg(long, global = true, env = "SKIFF_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the payload intake endpoint
    Serve(serve::ServeArgs),

    /// Run a templated query against the fact store
    Query(query::QueryArgs),

    /// Decode a payload file and show what a handler would see
    Inspect(inspect::InspectArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing
// ─────────────────────────────────────────────────────────────────────────────

/// Console layer plus an optional daily-rolling JSON file layer.
///
/// `RUST_LOG` wins over the configured level. The returned guard must live
/// until exit so buffered file output is flushed.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_filter = if verbose {
        "skiff=debug,skiff_runtime=debug,skiff_datalog=debug,skiff_server=debug,skiff_config=debug,info".to_string()
    } else {
        logging.level.clone()
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let (file_layer, guard) = if logging.json_file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(|| skiff_config::xdg_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "skiff.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(
                "skiff=trace,skiff_runtime=trace,skiff_datalog=trace,skiff_server=trace,skiff_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = skiff_config::load_config(cli.project_dir.as_deref())?;
    let _guard = init_tracing(&loaded.config.logging(), cli.verbose);

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    if !loaded.env_overrides.is_empty() {
        tracing::debug!(overrides = ?loaded.env_overrides, "Applied environment overrides");
    }

    // Create context for commands
    let ctx = commands::Context {
        loaded,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Query(args) => query::run(args, &ctx).await,
        Commands::Inspect(args) => inspect::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
