mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regsync::models::Term;

use commands::AppContext;

#[derive(Parser)]
#[command(
    name = "regsync",
    version,
    about = "Reconcile the registrar course catalog into a local snapshot",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to REGSYNC_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List upstream terms, most recent first
    Terms,

    /// Reconcile one term and republish its snapshot
    Sync {
        /// Term code (e.g. 1252)
        #[arg(short, long)]
        term: Term,

        /// Only these departments (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        departments: Vec<String>,
    },

    /// Sync every upstream term in a range, oldest first
    Backfill {
        /// First term to include
        #[arg(long)]
        from: Option<Term>,

        /// Last term to include
        #[arg(long)]
        to: Option<Term>,
    },

    /// Refresh seat counts and statuses
    Seats {
        /// Term code (e.g. 1252)
        #[arg(short, long)]
        term: Term,

        /// Keep refreshing until interrupted
        #[arg(long, default_value = "false")]
        forever: bool,
    },

    /// Scrape course evaluations and recompute instructor ratings
    Evals {
        /// Term code (e.g. 1252)
        #[arg(short, long)]
        term: Term,
    },

    /// Read the republished snapshot of a term
    Snapshot {
        /// Term code (e.g. 1252)
        #[arg(short, long)]
        term: Term,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = AppContext::load(cli.config.as_deref())?;

    // Initialize tracing/logging
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| ctx.config.logging.format.clone());
    setup_tracing(&format, &ctx.config.logging.level, cli.verbose)?;

    tracing::info!(
        database = %ctx.config.database.sqlite_path.display(),
        "regsync starting"
    );

    match cli.command {
        Commands::Terms => {
            tracing::info!("Starting terms command");
            commands::terms(&ctx).await?;
        }

        Commands::Sync { term, departments } => {
            tracing::info!(%term, departments = ?departments, "Starting sync command");
            commands::sync(&ctx, term, departments).await?;
        }

        Commands::Backfill { from, to } => {
            tracing::info!(from = ?from, to = ?to, "Starting backfill command");
            commands::backfill(&ctx, from, to).await?;
        }

        Commands::Seats { term, forever } => {
            tracing::info!(%term, forever, "Starting seats command");
            commands::seats(&ctx, term, forever).await?;
        }

        Commands::Evals { term } => {
            tracing::info!(%term, "Starting evals command");
            commands::evals(&ctx, term).await?;
        }

        Commands::Snapshot { term } => {
            tracing::info!(%term, "Starting snapshot command");
            commands::snapshot(&ctx, term).await?;
        }
    }

    tracing::info!("regsync completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("regsync=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("regsync={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
