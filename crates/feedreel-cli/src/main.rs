//! Feedreel CLI - Headless Feed Player
//!
//! Features:
//! - Catalog parsing and inspection
//! - Source probing (reachability and backend routing)
//! - Unattended playback runs with persisted session state

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod host;
mod output;

/// Feedreel CLI - Feed playback toolkit
#[derive(Parser)]
#[command(name = "feedreel")]
#[command(version)]
#[command(about = "Headless feed player and catalog toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Session configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a catalog file and list its entries
    Parse {
        /// Path to the catalog payload
        file: PathBuf,
    },

    /// Check a single source URL
    Probe {
        /// Source URL
        url: String,

        /// Probe timeout in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Walk a remote feed headlessly
    Play {
        /// Catalog URL
        catalog_url: String,

        /// Seconds each reachable source "plays" before it ends
        #[arg(short, long, default_value = "5")]
        dwell: u64,

        /// Session state file
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Stop after this many sources have played (0 = indefinite)
        #[arg(short = 'n', long, default_value = "0")]
        max_plays: usize,

        /// Link type hint (slow-2g, 2g, 3g, 4g)
        #[arg(long)]
        link_type: Option<String>,

        /// Probe each source before loading it
        #[arg(long)]
        validate: bool,
    },
}

fn init_tracing(verbose: bool, log_format: &str) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, &cli.log_format);
    feedreel_core::init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Parse { file } => {
            commands::parse(&file, &cli.format)?;
        }
        Commands::Probe { url, timeout_ms } => {
            commands::probe(&url, timeout_ms, &cli.format).await?;
        }
        Commands::Play {
            catalog_url,
            dwell,
            state,
            max_plays,
            link_type,
            validate,
        } => {
            let options = commands::PlayOptions {
                dwell_secs: dwell,
                state,
                max_plays,
                link_type,
                validate,
            };
            commands::play(&catalog_url, config, options, &cli.format).await?;
        }
    }

    Ok(())
}
