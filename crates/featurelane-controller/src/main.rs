//! featurelane controller
//!
//! Commands:
//! - `run` - Reconcile ingestion jobs until interrupted
//! - `plan` - Show the desired job topology
//! - `subscribers` - List the stores a feature set is delivered to
//! - `apply-store` - Create or update a store from YAML
//! - `delete-store` - Delete a store
//! - `register` - Register a feature set from YAML
//! - `jobs` - Show ingestion jobs
//!
//! ## Logging
//!
//! `RUST_LOG` sets the filter (default `info`). `--log-format` or the
//! `logging.format` config key selects `pretty` or `json` output.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod output;
mod shutdown;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "featurelane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Streaming ingestion control plane for feature stores", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FEATURELANE_CONFIG")]
    config: Option<String>,

    /// Log format (pretty, json); overrides logging.format
    #[arg(long, env = "FEATURELANE_LOG_FORMAT")]
    log_format: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile ingestion jobs against the registry until interrupted
    Run {
        /// Run a single cycle without saving jobs
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the ingestion jobs the current registry state calls for
    Plan,

    /// List the stores a feature set is delivered to
    Subscribers {
        /// Feature set reference (project/name)
        reference: String,
    },

    /// Create or update a store from a YAML definition
    ApplyStore {
        /// Path to store YAML file
        file: String,

        /// Store version the write must replace (0 = must not exist)
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Delete a store
    DeleteStore {
        /// Store name
        name: String,
    },

    /// Register a feature set from a YAML definition
    Register {
        /// Path to feature set YAML file
        file: String,
    },

    /// Show ingestion jobs
    Jobs {
        /// Filter by status (pending, running, aborting, aborted, error)
        #[arg(long)]
        status: Option<String>,
    },
}

fn init_tracing(format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = config::load_config(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    init_tracing(&log_format);
    source.log();

    let format = OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Run { dry_run } => {
            commands::run::run(&config, dry_run).await?;
        }
        Commands::Plan => {
            commands::plan::run(&config, format).await?;
        }
        Commands::Subscribers { reference } => {
            commands::subscribers::run(&config, &reference, format).await?;
        }
        Commands::ApplyStore {
            file,
            expected_version,
        } => {
            commands::apply_store::run(&config, &file, expected_version).await?;
        }
        Commands::DeleteStore { name } => {
            commands::delete_store::run(&config, &name).await?;
        }
        Commands::Register { file } => {
            commands::register::run(&config, &file).await?;
        }
        Commands::Jobs { status } => {
            commands::jobs::run(&config, status.as_deref(), format).await?;
        }
    }

    Ok(())
}
