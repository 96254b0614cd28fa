//! Trade P&L engine - main entry point
//!
//! This binary provides three subcommands:
//! - run: Enrich trade batches, upsert daily metrics and rebuild facts
//! - facts: Rebuild daily P&L facts and account summaries from the store
//! - status: Show the last checkpoint and store counts

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "pnl-engine")]
#[command(about = "Incremental trade enrichment and daily P&L aggregation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "configs/pnl_engine.json")]
    config: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enrich trade batches and refresh metrics and facts
    Run {
        /// Trade CSV files, one batch each (overrides config inputs)
        trades: Vec<String>,

        /// Position snapshot CSV (overrides config)
        #[arg(short, long)]
        positions: Option<String>,

        /// SQLite database path (overrides config)
        #[arg(long)]
        db: Option<String>,

        /// Output directory for CSV tables (overrides config)
        #[arg(short, long)]
        output: Option<String>,

        /// Only admit trades newer than the last checkpoint
        #[arg(long)]
        resume: bool,

        /// Enrich sequentially instead of in parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Rebuild daily P&L facts and account summaries from stored metrics
    Facts {
        /// Position snapshot CSV (overrides config)
        #[arg(short, long)]
        positions: Option<String>,

        /// SQLite database path (overrides config)
        #[arg(long)]
        db: Option<String>,

        /// Output directory for CSV tables (overrides config)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show the last checkpoint and store counts
    Status {
        /// SQLite database path (overrides config)
        #[arg(long)]
        db: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if file_only {
        // Keep the console clean for the progress bar
        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    }

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Run { .. } => ("run", true),
        Commands::Facts { .. } => ("facts", false),
        Commands::Status { .. } => ("status", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Run {
            trades,
            positions,
            db,
            output,
            resume,
            sequential,
        } => commands::run::run(
            cli.config, trades, positions, db, output, resume, sequential,
        ),

        Commands::Facts {
            positions,
            db,
            output,
        } => commands::facts::run(cli.config, positions, db, output),

        Commands::Status { db } => commands::status::run(cli.config, db),
    }
}
