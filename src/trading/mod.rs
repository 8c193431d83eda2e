//! Trading collaborators
//!
//! Execution and pricing sit behind traits so the monitor and the entry
//! pipeline run unchanged against:
//! - Jupiter aggregator swaps and prices (live)
//! - Simulated fills at synthetic random-walk prices

pub mod jupiter;
pub mod price;
pub mod simulation;

use async_trait::async_trait;

use crate::error::Result;

pub use jupiter::JupiterTrader;
pub use price::JupiterPriceSource;
pub use simulation::{SimulatedTrader, SyntheticPriceSource};

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Wrapped SOL mint, the quote side of every swap
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Result of a filled buy
#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    /// SOL per token paid
    pub fill_price: f64,
    /// Tokens received (UI units)
    pub token_amount: f64,
    /// Transaction signature or simulated receipt
    pub receipt: String,
}

/// Buys and sells tokens against SOL
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn buy(&self, asset_id: &str, sol_amount: f64, slippage_bps: u32) -> Result<BuyFill>;

    /// Sell `token_amount` (UI units), returning the receipt
    async fn sell(&self, asset_id: &str, token_amount: f64, slippage_bps: u32) -> Result<String>;
}

/// Current token price in SOL
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price(&self, asset_id: &str) -> Result<f64>;
}
