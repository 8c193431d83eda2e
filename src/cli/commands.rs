//! CLI command implementations

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{mask_url, Config};
use crate::discovery::{DiscoverySupervisor, Scanner, SyntheticDiscovery};
use crate::filter::{KeywordSafetyFilter, SafetyFilter};
use crate::pipeline::EntryPipeline;
use crate::position::{PositionMonitor, PositionStore};
use crate::rpc::{ChainSource, EndpointKind, EndpointPool, RetryPolicy, SolanaRpc};
use crate::trading::{
    JupiterPriceSource, JupiterTrader, PriceSource, SimulatedTrader, SyntheticPriceSource,
    TradeExecutor,
};
use crate::wallet;

/// Start the sniper bot
pub async fn start(config: &Config, simulate: bool, dry_run: bool) -> Result<()> {
    let simulate = simulate || config.simulation.enabled;
    if simulate {
        warn!("Running in SIMULATION mode - synthetic tokens, prices and fills");
    } else if dry_run {
        warn!("Running in DRY-RUN mode - no real trades will be executed");
    }

    info!("Starting tier sniper...");
    info!(
        "Buy amount: {} SOL, Slippage: {}bps",
        config.trading.buy_amount_sol, config.trading.slippage_bps
    );

    let pool = Arc::new(EndpointPool::new(
        config.rpc.http_endpoint_list(),
        config.rpc.ws_endpoint_list(),
    ));
    info!(
        "RPC endpoints: {}",
        pool.endpoints(EndpointKind::Http)
            .iter()
            .map(|u| mask_url(u))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let retry = RetryPolicy::new(pool.clone());
    let rpc = Arc::new(SolanaRpc::new(config.rpc.timeout(), config.rpc.commitment()?));

    let store = PositionStore::new(config.monitor.persistence_path.clone());
    store.load().await.context("Failed to load positions")?;

    let (prices, trader): (Arc<dyn PriceSource>, Arc<dyn TradeExecutor>) = if simulate {
        let prices: Arc<dyn PriceSource> = Arc::new(SyntheticPriceSource::new(&config.simulation));
        let trader: Arc<dyn TradeExecutor> = Arc::new(SimulatedTrader::new(prices.clone()));
        (prices, trader)
    } else if dry_run {
        let prices: Arc<dyn PriceSource> = Arc::new(JupiterPriceSource::new(
            config.trading.price_url.clone(),
            config.rpc.timeout(),
        )?);
        let trader: Arc<dyn TradeExecutor> = Arc::new(SimulatedTrader::new(prices.clone()));
        (prices, trader)
    } else {
        let keypair = Arc::new(wallet::load_keypair().context("Failed to load trading keypair")?);
        info!("Loaded keypair: {}", keypair.pubkey());

        let options = config.retry.default.options("getBalance");
        match wallet::sol_balance(&rpc, &retry, options, &keypair.pubkey()).await {
            Ok(sol) if sol < config.trading.buy_amount_sol => warn!(
                "Wallet balance {:.4} SOL is below the buy amount of {} SOL",
                sol, config.trading.buy_amount_sol
            ),
            Ok(sol) => info!("Wallet balance: {:.4} SOL", sol),
            Err(e) => warn!("Failed to fetch wallet balance: {}", e),
        }

        let prices: Arc<dyn PriceSource> = Arc::new(JupiterPriceSource::new(
            config.trading.price_url.clone(),
            config.rpc.timeout(),
        )?);
        let trader: Arc<dyn TradeExecutor> = Arc::new(JupiterTrader::new(
            &config.trading,
            config.rpc.timeout(),
            rpc.clone(),
            pool.clone(),
            keypair,
        )?);
        (prices, trader)
    };

    let filter: Arc<dyn SafetyFilter> = Arc::new(KeywordSafetyFilter::new(&config.filters)?);
    let pipeline = Arc::new(EntryPipeline::new(
        config,
        store.clone(),
        filter,
        trader.clone(),
        retry.clone(),
    ));
    let monitor = PositionMonitor::new(config, store.clone(), prices, trader, retry.clone())?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested, finishing current cycle...");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let discovery = async {
        if simulate {
            let mut generator = SyntheticDiscovery::new(&config.simulation, pipeline.clone());
            generator.run(shutdown.clone()).await;
        } else {
            let scanner = Scanner::new(config, rpc.clone(), retry.clone(), pipeline.clone());
            let mut supervisor = DiscoverySupervisor::new(config, scanner);
            supervisor.run(shutdown.clone()).await;
        }
    };

    tokio::join!(monitor.run(shutdown.clone()), discovery);

    store.save().await.context("Failed to save positions")?;
    let open = store.open_positions().await.len();
    info!("Stopped with {} open positions", open);

    Ok(())
}

/// Show positions from the persisted snapshot
pub async fn status(config: &Config) -> Result<()> {
    let Some(path) = config.monitor.persistence_path.as_deref() else {
        println!("Position persistence is disabled (set monitor.persistence_path).");
        return Ok(());
    };

    let path = Path::new(path);
    if !path.exists() {
        println!("No positions recorded yet ({}).", path.display());
        return Ok(());
    }

    let positions = PositionStore::read_snapshot(path).await?;
    let open: Vec<_> = positions.iter().filter(|p| !p.is_terminal()).collect();
    let cost: f64 = open.iter().map(|p| p.entry_sol_amount).sum();
    let value: f64 = open
        .iter()
        .map(|p| p.remaining_amount() * p.current_price)
        .sum();

    println!("\n=== SNIPER BOT STATUS ===\n");
    println!("Positions: {} ({} open)", positions.len(), open.len());
    println!("Open cost: {:.4} SOL", cost);
    println!("Held value: {:.4} SOL", value);

    println!("\n=== POSITIONS ===\n");
    if positions.is_empty() {
        println!("No positions.");
    }
    for p in &positions {
        println!(
            "{:<10} {:<44} {:>7.2}x {:>6.1}% sold  {:<12} opened {}",
            p.symbol,
            p.asset_id,
            p.price_ratio(),
            p.sold_percentage,
            p.status.to_string(),
            p.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Show the trading wallet, its SOL balance and the tokens it holds
pub async fn wallet(config: &Config) -> Result<()> {
    println!("\n=== WALLET ===\n");

    let keypair = wallet::load_keypair().context("Failed to load trading keypair")?;
    let owner = keypair.pubkey();
    println!("Address: {}", owner);

    let pool = Arc::new(EndpointPool::new(
        config.rpc.http_endpoint_list(),
        config.rpc.ws_endpoint_list(),
    ));
    let retry = RetryPolicy::new(pool);
    let rpc = SolanaRpc::new(config.rpc.timeout(), config.rpc.commitment()?);

    let sol = wallet::sol_balance(&rpc, &retry, config.retry.default.options("getBalance"), &owner)
        .await
        .context("Failed to fetch SOL balance")?;
    println!("Balance: {:.4} SOL", sol);
    if sol < config.trading.buy_amount_sol {
        println!(
            "Warning: below the buy amount of {} SOL",
            config.trading.buy_amount_sol
        );
    }

    let Some(path) = config.monitor.persistence_path.as_deref() else {
        return Ok(());
    };
    let path = Path::new(path);
    if !path.exists() {
        return Ok(());
    }

    let positions = PositionStore::read_snapshot(path).await?;
    let open: Vec<_> = positions.iter().filter(|p| !p.is_terminal()).collect();
    if open.is_empty() {
        return Ok(());
    }

    println!("\n=== TOKEN BALANCES ===\n");
    for p in open {
        let Ok(mint) = Pubkey::from_str(&p.asset_id) else {
            println!("{:<10} {:<44} (not a mint address)", p.symbol, p.asset_id);
            continue;
        };

        let options = config
            .retry
            .default
            .options(format!("getTokenAccountsByOwner {}", p.symbol));
        match wallet::token_balance(&rpc, &retry, options, &owner, &mint).await {
            Ok(held) => println!(
                "{:<10} {:<44} {:>16.2} held  {:>16.2} tracked",
                p.symbol,
                p.asset_id,
                held,
                p.remaining_amount()
            ),
            Err(e) => println!(
                "{:<10} {:<44} (balance fetch failed: {})",
                p.symbol, p.asset_id, e
            ),
        }
    }

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Probe every HTTP endpoint and the wallet
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let rpc = SolanaRpc::new(config.rpc.timeout(), config.rpc.commitment()?);
    let endpoints = config.rpc.http_endpoint_list();
    let mut healthy = 0;

    for endpoint in &endpoints {
        print!("RPC {}... ", mask_url(endpoint));
        let start = Instant::now();
        match rpc.tip_slot(endpoint).await {
            Ok(slot) => {
                healthy += 1;
                println!("OK (slot {}, {}ms)", slot, start.elapsed().as_millis());
            }
            Err(e) => println!("FAILED: {}", e),
        }
    }

    print!("Keypair... ");
    match wallet::load_keypair() {
        Ok(keypair) => println!("OK ({})", keypair.pubkey()),
        Err(e) => println!("NOT AVAILABLE: {}", e),
    }

    println!();
    if healthy == endpoints.len() {
        println!("All RPC endpoints healthy!");
    } else if healthy > 0 {
        println!("{}/{} RPC endpoints healthy.", healthy, endpoints.len());
    } else {
        anyhow::bail!("No RPC endpoint reachable");
    }

    Ok(())
}
