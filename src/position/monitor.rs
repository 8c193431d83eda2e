//! Position monitor
//!
//! On every tick: refresh the price of each open position, then fill at
//! most one profit tier per position. Tiers fill strictly in ascending
//! order, so a price jump past several tiers is worked off one tier per
//! tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::{Position, PositionStore};
use super::tiers::ProfitTiers;
use crate::config::{Config, RetrySettings};
use crate::error::{Error, Result};
use crate::rpc::RetryPolicy;
use crate::trading::{PriceSource, TradeExecutor};

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Open positions examined
    pub checked: usize,
    /// Price refreshes that failed; stale price kept
    pub stale_prices: usize,
    /// Tier exits filled
    pub exits: usize,
    /// Tier exits attempted but failed; retried next tick
    pub failed_exits: usize,
    /// Fully sold positions pruned by retention
    pub pruned: usize,
}

/// Recurring tier-exit task
pub struct PositionMonitor {
    store: PositionStore,
    tiers: ProfitTiers,
    prices: Arc<dyn PriceSource>,
    trader: Arc<dyn TradeExecutor>,
    retry: RetryPolicy,
    price_retry: RetrySettings,
    trade_retry: RetrySettings,
    slippage_bps: u32,
    tick_interval: Duration,
    retention: Option<Duration>,
}

impl PositionMonitor {
    pub fn new(
        config: &Config,
        store: PositionStore,
        prices: Arc<dyn PriceSource>,
        trader: Arc<dyn TradeExecutor>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            store,
            tiers: config.monitor.profit_tiers()?,
            prices,
            trader,
            retry,
            price_retry: config.retry.price().clone(),
            trade_retry: config.retry.trade().clone(),
            slippage_bps: config.trading.slippage_bps,
            tick_interval: config.monitor.tick(),
            retention: config.monitor.retention(),
        })
    }

    /// Tick until `shutdown` is cancelled. A tick in progress always
    /// completes, and no tick starts once cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_secs = self.tick_interval.as_secs(),
            tiers = %self.tiers,
            "Position monitor started"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.tick().await;
            if report.exits > 0 || report.failed_exits > 0 {
                info!(
                    checked = report.checked,
                    exits = report.exits,
                    failed_exits = report.failed_exits,
                    stale_prices = report.stale_prices,
                    "Monitor tick"
                );
            }
        }

        info!("Position monitor stopped");
    }

    /// One sweep over the open positions
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        if self.store.is_empty().await {
            return report;
        }

        // Work on copies; the store lock is never held across a network call
        for position in self.store.open_positions().await {
            report.checked += 1;

            let current_price = match self.refresh_price(&position).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(
                        asset = %position.asset_id,
                        symbol = %position.symbol,
                        error = %e,
                        "Price refresh failed, keeping stale price"
                    );
                    report.stale_prices += 1;
                    position.current_price
                }
            };

            match self.evaluate(&position, current_price).await {
                Ok(true) => report.exits += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        asset = %position.asset_id,
                        symbol = %position.symbol,
                        error = %e,
                        "Tier exit failed, will retry next tick"
                    );
                    report.failed_exits += 1;
                }
            }
        }

        if let Some(retention) = self.retention {
            report.pruned = self.store.prune_terminal(retention).await;
        }

        if let Err(e) = self.store.save().await {
            warn!("Failed to persist positions: {}", e);
        }

        report
    }

    async fn refresh_price(&self, position: &Position) -> Result<f64> {
        let options = self
            .price_retry
            .options(format!("getPrice {}", position.symbol));

        let price = self
            .retry
            .guard(options, || self.prices.price(&position.asset_id))
            .await?;

        if !price.is_finite() || price <= 0.0 {
            return Err(Error::PriceUnavailable(format!(
                "{} (got {})",
                position.asset_id, price
            )));
        }

        self.store.update_price(&position.asset_id, price).await?;
        Ok(price)
    }

    /// Fill the next armed tier, if any. Returns whether an exit filled.
    async fn evaluate(&self, position: &Position, current_price: f64) -> Result<bool> {
        if position.entry_price <= 0.0 {
            return Ok(false);
        }

        let ratio = current_price / position.entry_price;
        debug!(
            asset = %position.asset_id,
            price = current_price,
            ratio,
            sold_pct = position.sold_percentage,
            "Position checked"
        );

        let Some(tier) = self.tiers.next_trigger(ratio, position.sold_percentage) else {
            return Ok(false);
        };

        let amount = position.sellable_amount(tier.sell_pct);
        info!(
            asset = %position.asset_id,
            symbol = %position.symbol,
            ratio,
            tier_multiplier = tier.multiplier,
            target_pct = tier.sell_pct,
            amount,
            "Profit tier hit, selling"
        );

        let options = self
            .trade_retry
            .options(format!("sell {} to {}%", position.symbol, tier.sell_pct));
        let receipt = self
            .retry
            .guard(options, || {
                self.trader
                    .sell(&position.asset_id, amount, self.slippage_bps)
            })
            .await?;

        let updated = self
            .store
            .record_exit(
                &position.asset_id,
                tier.sell_pct,
                self.tiers.max_cumulative_pct(),
                receipt.as_str(),
            )
            .await?;

        info!(
            asset = %updated.asset_id,
            symbol = %updated.symbol,
            sold_pct = updated.sold_percentage,
            status = %updated.status,
            receipt = %receipt,
            "Tier exit filled"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::store::PositionStatus;
    use crate::position::tiers::ProfitTier;
    use crate::rpc::EndpointPool;
    use crate::trading::BuyFill;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixedPrices {
        prices: Mutex<HashMap<String, f64>>,
        calls: AtomicUsize,
    }

    impl FixedPrices {
        fn set(&self, asset: &str, price: f64) {
            self.prices.lock().unwrap().insert(asset.to_string(), price);
        }
    }

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn price(&self, asset_id: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prices
                .lock()
                .unwrap()
                .get(asset_id)
                .copied()
                .ok_or_else(|| Error::PriceUnavailable(asset_id.to_string()))
        }
    }

    /// Cancels the run from inside the first price refresh
    struct CancellingPrices {
        shutdown: CancellationToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for CancellingPrices {
        async fn price(&self, _asset_id: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.shutdown.cancel();
            Ok(0.0002)
        }
    }

    #[derive(Default)]
    struct RecordingTrader {
        sells: Mutex<Vec<(String, f64)>>,
        fail_sells: AtomicBool,
    }

    impl RecordingTrader {
        fn sold_amounts(&self) -> Vec<f64> {
            self.sells.lock().unwrap().iter().map(|(_, a)| *a).collect()
        }
    }

    #[async_trait]
    impl TradeExecutor for RecordingTrader {
        async fn buy(&self, _asset_id: &str, _sol: f64, _slippage_bps: u32) -> Result<BuyFill> {
            Err(Error::Execution("buy not expected".into()))
        }

        async fn sell(&self, asset_id: &str, token_amount: f64, _slippage_bps: u32) -> Result<String> {
            if self.fail_sells.load(Ordering::SeqCst) {
                return Err(Error::Execution("route not found".into()));
            }
            let mut sells = self.sells.lock().unwrap();
            sells.push((asset_id.to_string(), token_amount));
            Ok(format!("sell-{}", sells.len()))
        }
    }

    struct Harness {
        monitor: PositionMonitor,
        store: PositionStore,
        prices: Arc<FixedPrices>,
        trader: Arc<RecordingTrader>,
    }

    fn harness(tiers: Vec<ProfitTier>) -> Harness {
        let mut config = Config::default();
        config.monitor.tiers = tiers;
        config.retry.default.max_retries = 0;

        let store = PositionStore::in_memory();
        let prices = Arc::new(FixedPrices::default());
        let trader = Arc::new(RecordingTrader::default());
        let retry = RetryPolicy::new(Arc::new(EndpointPool::new(vec![], vec![])));

        let monitor = PositionMonitor::new(
            &config,
            store.clone(),
            prices.clone(),
            trader.clone(),
            retry,
        )
        .unwrap();

        Harness {
            monitor,
            store,
            prices,
            trader,
        }
    }

    fn default_tiers() -> Vec<ProfitTier> {
        vec![
            ProfitTier::new(1.3, 15.0),
            ProfitTier::new(2.0, 50.0),
            ProfitTier::new(3.0, 65.0),
            ProfitTier::new(4.0, 80.0),
            ProfitTier::new(8.0, 85.0),
        ]
    }

    async fn open(store: &PositionStore, asset: &str, entry_price: f64) {
        store
            .insert(Position::new(asset, "Test", "TST", entry_price, 0.1, 1000.0, "buy"))
            .await
            .unwrap();
    }

    async fn sold(store: &PositionStore, asset: &str) -> f64 {
        store.get(asset).await.unwrap().sold_percentage
    }

    #[tokio::test]
    async fn test_empty_store_is_a_noop() {
        let h = harness(default_tiers());
        assert_eq!(h.monitor.tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn test_price_jump_fills_one_tier_per_tick() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;
        // Straight from 1.0x to 5.0x
        h.prices.set("mint1", 0.0005);

        let mut progress = Vec::new();
        for _ in 0..4 {
            let report = h.monitor.tick().await;
            assert_eq!(report.exits, 1);
            progress.push(sold(&h.store, "mint1").await);
        }
        assert_eq!(progress, vec![15.0, 50.0, 65.0, 80.0]);

        // 8x tier is not armed at 5x
        assert_eq!(h.monitor.tick().await.exits, 0);
        assert_eq!(sold(&h.store, "mint1").await, 80.0);

        h.prices.set("mint1", 0.0009);
        assert_eq!(h.monitor.tick().await.exits, 1);
        assert_eq!(sold(&h.store, "mint1").await, 85.0);

        let amounts = h.trader.sold_amounts();
        let expected = [150.0, 350.0, 150.0, 150.0, 50.0];
        assert_eq!(amounts.len(), expected.len());
        for (got, want) in amounts.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "sold {} expected {}", got, want);
        }

        let position = h.store.get("mint1").await.unwrap();
        assert_eq!(position.status, PositionStatus::FullySold);
        assert_eq!(position.exit_receipts.len(), 5);

        // Terminal positions are no longer swept
        let report = h.monitor.tick().await;
        assert_eq!(report.checked, 0);
        assert_eq!(h.trader.sold_amounts().len(), 5);
    }

    #[tokio::test]
    async fn test_two_tier_progression() {
        let h = harness(vec![ProfitTier::new(1.3, 15.0), ProfitTier::new(2.0, 50.0)]);
        open(&h.store, "mint1", 0.0001).await;

        h.prices.set("mint1", 0.00014);
        h.monitor.tick().await;
        assert_eq!(sold(&h.store, "mint1").await, 15.0);
        assert_eq!(
            h.store.get("mint1").await.unwrap().status,
            PositionStatus::PartiallySold(15.0)
        );

        h.prices.set("mint1", 0.0002);
        h.monitor.tick().await;
        assert_eq!(sold(&h.store, "mint1").await, 50.0);
        assert_eq!(
            h.store.get("mint1").await.unwrap().status,
            PositionStatus::FullySold
        );
    }

    #[tokio::test]
    async fn test_below_first_tier_holds() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;
        h.prices.set("mint1", 0.00011);

        let report = h.monitor.tick().await;
        assert_eq!(report.exits, 0);
        assert_eq!(sold(&h.store, "mint1").await, 0.0);

        let position = h.store.get("mint1").await.unwrap();
        assert!((position.current_price - 0.00011).abs() < 1e-12);
        assert_eq!(position.status, PositionStatus::Active);
    }

    #[tokio::test]
    async fn test_failed_sell_is_retried_next_tick() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;
        h.prices.set("mint1", 0.00025);

        h.trader.fail_sells.store(true, Ordering::SeqCst);
        let report = h.monitor.tick().await;
        assert_eq!(report.failed_exits, 1);
        assert_eq!(sold(&h.store, "mint1").await, 0.0);

        h.trader.fail_sells.store(false, Ordering::SeqCst);
        let report = h.monitor.tick().await;
        assert_eq!(report.exits, 1);
        assert_eq!(sold(&h.store, "mint1").await, 15.0);
    }

    #[tokio::test]
    async fn test_price_failure_keeps_stale_price() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;
        open(&h.store, "mint2", 0.0001).await;
        // Only mint2 has a price; mint1 refresh fails
        h.prices.set("mint2", 0.0002);

        let report = h.monitor.tick().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.stale_prices, 1);
        assert_eq!(report.exits, 1);

        let stale = h.store.get("mint1").await.unwrap();
        assert!((stale.current_price - 0.0001).abs() < 1e-12);
        assert_eq!(stale.sold_percentage, 0.0);
        assert_eq!(sold(&h.store, "mint2").await, 15.0);
    }

    #[tokio::test]
    async fn test_sold_percentage_never_decreases_on_dip() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;

        let mut last = 0.0;
        for price in [0.00035, 0.00035, 0.00035, 0.00014, 0.00009, 0.00035] {
            h.prices.set("mint1", price);
            h.monitor.tick().await;
            let now = sold(&h.store, "mint1").await;
            assert!(now >= last);
            assert!(now <= 85.0);
            last = now;
        }
        assert_eq!(last, 65.0);
    }

    #[tokio::test]
    async fn test_retention_prunes_fully_sold() {
        let mut config = Config::default();
        config.monitor.tiers = vec![ProfitTier::new(1.3, 100.0)];
        config.monitor.retention_secs = Some(0);

        let store = PositionStore::in_memory();
        let prices = Arc::new(FixedPrices::default());
        let monitor = PositionMonitor::new(
            &config,
            store.clone(),
            prices.clone(),
            Arc::new(RecordingTrader::default()),
            RetryPolicy::new(Arc::new(EndpointPool::new(vec![], vec![]))),
        )
        .unwrap();

        open(&store, "mint1", 0.0001).await;
        prices.set("mint1", 0.0002);

        let report = monitor.tick().await;
        assert_eq!(report.exits, 1);
        assert_eq!(report.pruned, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;
        h.prices.set("mint1", 0.0002);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        h.monitor.run(shutdown).await;

        assert_eq!(h.prices.calls.load(Ordering::SeqCst), 0);
        assert!(h.trader.sold_amounts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval_until_cancelled() {
        let h = harness(default_tiers());
        open(&h.store, "mint1", 0.0001).await;
        // Below every tier
        h.prices.set("mint1", 0.00011);

        let shutdown = CancellationToken::new();
        let tick = h.monitor.tick_interval;
        let stopper = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(tick * 2 + tick / 2).await;
                shutdown.cancel();
            })
        };

        h.monitor.run(shutdown).await;
        stopper.await.unwrap();

        // Ticks at 0, 1 and 2 intervals
        assert_eq!(h.prices.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_in_progress_completes_on_cancel() {
        let mut config = Config::default();
        config.monitor.tiers = default_tiers();
        config.retry.default.max_retries = 0;

        let shutdown = CancellationToken::new();
        let prices = Arc::new(CancellingPrices {
            shutdown: shutdown.clone(),
            calls: AtomicUsize::new(0),
        });
        let trader = Arc::new(RecordingTrader::default());
        let store = PositionStore::in_memory();
        let monitor = PositionMonitor::new(
            &config,
            store.clone(),
            prices.clone(),
            trader.clone(),
            RetryPolicy::new(Arc::new(EndpointPool::new(vec![], vec![]))),
        )
        .unwrap();

        open(&store, "mint1", 0.0001).await;
        open(&store, "mint2", 0.0001).await;
        monitor.run(shutdown).await;

        // Cancelled during the first refresh, yet the sweep covered both
        assert_eq!(prices.calls.load(Ordering::SeqCst), 2);
        assert_eq!(trader.sold_amounts().len(), 2);
        assert_eq!(sold(&store, "mint1").await, 15.0);
        assert_eq!(sold(&store, "mint2").await, 15.0);
    }
}
