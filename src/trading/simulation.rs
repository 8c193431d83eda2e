//! Simulated execution and synthetic prices
//!
//! Used by `--simulate` (synthetic discovery and prices) and `--dry-run`
//! (real discovery, simulated fills). The monitor cannot tell these apart
//! from live collaborators.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{BuyFill, PriceSource, TradeExecutor};
use crate::config::SimulationConfig;
use crate::error::{Error, Result};

/// Geometric random walk per asset. Each query advances that asset one step.
pub struct SyntheticPriceSource {
    initial_price: f64,
    drift: f64,
    volatility: f64,
    prices: Mutex<HashMap<String, f64>>,
}

impl SyntheticPriceSource {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            initial_price: config.initial_price,
            drift: config.drift,
            volatility: config.volatility,
            prices: Mutex::new(HashMap::new()),
        }
    }

    /// Pin an asset's price; the walk continues from here
    pub fn set_price(&self, asset_id: &str, price: f64) {
        self.lock().insert(asset_id.to_string(), price);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, f64>> {
        self.prices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn step(&self, price: f64) -> f64 {
        let z = standard_normal(&mut rand::thread_rng());
        price * (self.drift + self.volatility * z).exp()
    }
}

/// Box-Muller transform
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[async_trait]
impl PriceSource for SyntheticPriceSource {
    async fn price(&self, asset_id: &str) -> Result<f64> {
        let mut prices = self.lock();
        let price = match prices.get(asset_id).copied() {
            // First sighting quotes the listing price
            None => self.initial_price,
            Some(last) => self.step(last),
        };
        prices.insert(asset_id.to_string(), price);
        Ok(price)
    }
}

/// Fills every order at the current price of `prices`
pub struct SimulatedTrader {
    prices: Arc<dyn PriceSource>,
}

impl SimulatedTrader {
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self { prices }
    }

    fn receipt() -> String {
        format!("sim-{}", uuid::Uuid::new_v4())
    }
}

#[async_trait]
impl TradeExecutor for SimulatedTrader {
    async fn buy(&self, asset_id: &str, sol_amount: f64, _slippage_bps: u32) -> Result<BuyFill> {
        let price = self.prices.price(asset_id).await?;
        if price <= 0.0 {
            return Err(Error::PriceUnavailable(asset_id.to_string()));
        }

        let fill = BuyFill {
            fill_price: price,
            token_amount: sol_amount / price,
            receipt: Self::receipt(),
        };
        info!(
            asset = %asset_id,
            sol = sol_amount,
            tokens = fill.token_amount,
            price,
            receipt = %fill.receipt,
            "[SIM] Buy filled"
        );
        Ok(fill)
    }

    async fn sell(&self, asset_id: &str, token_amount: f64, _slippage_bps: u32) -> Result<String> {
        let price = self.prices.price(asset_id).await?;
        let receipt = Self::receipt();
        info!(
            asset = %asset_id,
            tokens = token_amount,
            sol = token_amount * price,
            receipt = %receipt,
            "[SIM] Sell filled"
        );
        Ok(receipt)
    }
}
