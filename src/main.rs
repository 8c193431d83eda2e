//! Tier sniper - pump.fun launch poller with tiered take-profit exits
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Most pump.fun tokens go to zero (rug pulls, abandonment).
//! - Use `--simulate` or `--dry-run` before trading live.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use tier_sniper::cli::commands;
use tier_sniper::config::Config;

/// Pump.fun launch poller with tiered take-profit exits
#[derive(Parser)]
#[command(name = "snipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start discovery and the position monitor
    Start {
        /// Synthetic tokens, prices and fills
        #[arg(long)]
        simulate: bool,

        /// Real discovery and prices, simulated trades
        #[arg(long)]
        dry_run: bool,
    },

    /// Show persisted positions and P&L
    Status,

    /// Show the trading wallet and its balances
    Wallet,

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC endpoints and wallet
    Health,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tier_sniper=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start { simulate, dry_run } => commands::start(&config, simulate, dry_run).await,
        Commands::Status => commands::status(&config).await,
        Commands::Wallet => commands::wallet(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
