//! Memecoin Trader - simulated memecoin trading loop
//!
//! # WARNING
//! - Paper trading only. No orders are ever sent anywhere.
//! - Simulated fills ignore slippage and liquidity; results overstate what a
//!   live bot would see.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// Use the library crate
use memecoin_trader::cli::commands;
use memecoin_trader::config::{Config, FeedSource};

/// Memecoin Trader - simulated memecoin trading loop
#[derive(Parser)]
#[command(name = "trader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop until Ctrl-C
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Override the configured token feed
        #[arg(long, value_enum)]
        source: Option<FeedSource>,
    },

    /// Show capital, P&L and win rate
    Status,

    /// Show open positions
    Positions,

    /// Show recent trades
    Trades {
        /// Number of trades to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Group trades by hour instead
        #[arg(long)]
        hourly: bool,
    },

    /// Show current configuration
    Config,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("memecoin_trader=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json_logs)?;

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run { ticks, source } => commands::run(&config, ticks, source).await,
        Commands::Status => commands::status(&config).await,
        Commands::Positions => commands::positions(&config).await,
        Commands::Trades { limit, hourly } => commands::trades(&config, limit, hourly).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
