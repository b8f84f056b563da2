//! Recollect - write-ahead buffered memory fragment store
//!
//! Main entry point for the Recollect CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use recollect_config::LoggingConfig;
use tracing::warn;

mod commands;

use commands::{bench, ingest, recent, remember, show, stats};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Recollect - write-ahead buffered memory fragment store
#[derive(Parser)]
#[command(name = "recollect")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Database file (default: from config, or the platform data directory)
    #[arg(long, global = true, env = "RECOLLECT_DB")]
    pub db: Option<PathBuf>,

    /// Config file to use instead of the discovered layers
    #[arg(long, global = true, env = "RECOLLECT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Remember a single fragment
    Remember(remember::RememberArgs),

    /// Remember every non-empty line of a file
    Ingest(ingest::IngestArgs),

    /// Show one fragment
    Show(show::ShowArgs),

    /// List the most recent fragments
    Recent(recent::RecentArgs),

    /// Show store statistics
    Stats(stats::StatsArgs),

    /// Measure enqueue throughput with concurrent producers
    Bench(bench::BenchArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, warnings) = match &cli.config {
        Some(path) => {
            let config = recollect_config::load_config_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            (config, Vec::new())
        }
        None => {
            let loaded = recollect_config::load_config(None);
            let warnings = loaded.warnings();
            (loaded.config, warnings)
        }
    };
    config.validate()?;

    let _guard = init_tracing(&config.logging_or_default(), cli.verbose);
    for warning in warnings {
        warn!("{}", warning);
    }

    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| config.store_or_default().resolve_database());

    let ctx = commands::Context {
        db,
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Remember(args) => remember::run(args, &ctx).await,
        Commands::Ingest(args) => ingest::run(args, &ctx).await,
        Commands::Show(args) => show::run(args, &ctx),
        Commands::Recent(args) => recent::run(args, &ctx),
        Commands::Stats(args) => stats::run(args, &ctx),
        Commands::Bench(args) => bench::run(args, &ctx).await,
    }
}

/// Console (human-readable, stderr) plus an optional rotating JSON file.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(
    logging: &LoggingConfig,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let level = if verbose { "debug" } else { logging.level.as_str() };
    let console_filter = format!(
        "recollect={level},recollect_engine={level},recollect_store={level},recollect_config={level},warn"
    );

    let (file_layer, guard) = if logging.json_file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(|| recollect_config::user_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "recollect.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(
                "recollect=trace,recollect_engine=trace,recollect_store=trace,recollect_config=trace,info",
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
                .with_filter(EnvFilter::new(console_filter)),
        )
        .with(file_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use recollect_config::RecollectConfig;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["recollect", "stats", "--json", "--db", "x.db"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
    }

    #[test]
    fn test_default_config_resolves_a_database() {
        let config = RecollectConfig::default();
        assert!(
            config
                .store_or_default()
                .resolve_database()
                .ends_with("fragments.db")
        );
    }
}
