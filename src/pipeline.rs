//! Entry pipeline: safety filter → buy → open position
//!
//! Shared by on-chain discovery and the synthetic generator. Every
//! failure here drops the event; nothing is retried at this level beyond
//! the buy's own retry budget.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, RetrySettings};
use crate::discovery::EventSink;
use crate::error::Error;
use crate::filter::{FilterReason, FilterResult, SafetyFilter};
use crate::position::{Position, PositionStore};
use crate::pump::CreationEvent;
use crate::rpc::RetryPolicy;
use crate::trading::TradeExecutor;

/// What happened to one event
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Opened(Position),
    /// A position in this asset is already open
    AlreadyHeld,
    Rejected(FilterReason),
    BuyFailed(String),
}

pub struct EntryPipeline {
    store: PositionStore,
    filter: Arc<dyn SafetyFilter>,
    trader: Arc<dyn TradeExecutor>,
    retry: RetryPolicy,
    trade_retry: RetrySettings,
    buy_amount_sol: f64,
    slippage_bps: u32,
}

impl EntryPipeline {
    pub fn new(
        config: &Config,
        store: PositionStore,
        filter: Arc<dyn SafetyFilter>,
        trader: Arc<dyn TradeExecutor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            filter,
            trader,
            retry,
            trade_retry: config.retry.trade().clone(),
            buy_amount_sol: config.trading.buy_amount_sol,
            slippage_bps: config.trading.slippage_bps,
        }
    }

    pub async fn handle(&self, event: CreationEvent) -> EntryOutcome {
        if self.store.contains(&event.asset_id).await {
            debug!(asset = %event.asset_id, "Already holding, event ignored");
            return EntryOutcome::AlreadyHeld;
        }

        if let FilterResult::Filtered(reason) = self.filter.check(&event) {
            info!(
                asset = %event.asset_id,
                name = %event.name,
                symbol = %event.symbol,
                reason = %reason,
                "Token rejected by safety filter"
            );
            return EntryOutcome::Rejected(reason);
        }

        info!(
            asset = %event.asset_id,
            name = %event.name,
            symbol = %event.symbol,
            sol = self.buy_amount_sol,
            "Buying new token"
        );

        let options = self.trade_retry.options(format!("buy {}", event.symbol));
        let fill = match self
            .retry
            .guard(options, || {
                self.trader
                    .buy(&event.asset_id, self.buy_amount_sol, self.slippage_bps)
            })
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                warn!(asset = %event.asset_id, error = %e, "Buy failed, event dropped");
                return EntryOutcome::BuyFailed(e.to_string());
            }
        };

        let position = Position::new(
            event.asset_id.clone(),
            event.name.clone(),
            event.symbol.clone(),
            fill.fill_price,
            self.buy_amount_sol,
            fill.token_amount,
            fill.receipt.clone(),
        );

        match self.store.insert(position.clone()).await {
            Ok(()) => EntryOutcome::Opened(position),
            Err(Error::DuplicatePosition(_)) => {
                warn!(
                    asset = %event.asset_id,
                    receipt = %fill.receipt,
                    "Position opened concurrently, fill not tracked"
                );
                EntryOutcome::AlreadyHeld
            }
            Err(e) => {
                warn!(asset = %event.asset_id, error = %e, "Failed to record position");
                EntryOutcome::BuyFailed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl EventSink for EntryPipeline {
    async fn on_event(&self, event: CreationEvent) {
        self.handle(event).await;
    }
}
