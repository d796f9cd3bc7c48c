//! gridscaled — the Gridscale daemon.
//!
//! Single binary with two modes:
//! - `eventgen`: metric aggregation, trigger evaluation, scale calls,
//!   and the aggregated-metric read API.
//! - `operator`: lock-gated housekeeping (metric pruning, schedule
//!   sync).
//!
//! # Usage
//!
//! ```text
//! gridscaled eventgen --config /etc/gridscale/gridscale.toml
//! gridscaled operator --config /etc/gridscale/gridscale.toml
//! ```

mod config;
mod eventgen;
mod operator;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::Config;

#[derive(Parser)]
#[command(name = "gridscaled", about = "Gridscale daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the event-generation pipeline and the read API.
    Eventgen {
        /// Path to the TOML config file.
        #[arg(long, default_value = "/etc/gridscale/gridscale.toml")]
        config: PathBuf,
    },
    /// Run the lock-gated operator daemons.
    Operator {
        /// Path to the TOML config file.
        #[arg(long, default_value = "/etc/gridscale/gridscale.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridscaled=debug,gridscale=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Eventgen { config } => eventgen::run(Config::load(&config)?).await,
        Command::Operator { config } => operator::run(Config::load(&config)?).await,
    }
}
