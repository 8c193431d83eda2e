//! Position store
//!
//! Single owner of every position record. Discovery appends, the monitor
//! updates prices and exit progress. Records are never removed except by
//! retention pruning of fully sold positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Exit progress of a position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "sold_pct")]
pub enum PositionStatus {
    Active,
    /// Cumulative percent sold so far
    PartiallySold(f64),
    FullySold,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Active => write!(f, "Active"),
            PositionStatus::PartiallySold(pct) => write!(f, "Sold {}%", pct),
            PositionStatus::FullySold => write!(f, "Fully Sold"),
        }
    }
}

/// A held token and its exit progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Token mint address
    pub asset_id: String,
    pub name: String,
    pub symbol: String,
    /// Fill price in SOL per token
    pub entry_price: f64,
    /// SOL spent on entry
    pub entry_sol_amount: f64,
    /// Quantity originally acquired; not reduced by exits
    pub token_amount: f64,
    /// Last refreshed price in SOL per token
    pub current_price: f64,
    /// Cumulative percent of `token_amount` sold
    pub sold_percentage: f64,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Buy transaction receipt
    pub entry_receipt: String,
    /// Sell transaction receipts, oldest first
    #[serde(default)]
    pub exit_receipts: Vec<String>,
}

impl Position {
    pub fn new(
        asset_id: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
        entry_price: f64,
        entry_sol_amount: f64,
        token_amount: f64,
        entry_receipt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            asset_id: asset_id.into(),
            name: name.into(),
            symbol: symbol.into(),
            entry_price,
            entry_sol_amount,
            token_amount,
            current_price: entry_price,
            sold_percentage: 0.0,
            status: PositionStatus::Active,
            created_at: now,
            last_updated_at: now,
            entry_receipt: entry_receipt.into(),
            exit_receipts: Vec::new(),
        }
    }

    /// Current price over entry price
    pub fn price_ratio(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.current_price / self.entry_price
    }

    /// Tokens to sell to bring the cumulative sold percent up to `target_pct`
    pub fn sellable_amount(&self, target_pct: f64) -> f64 {
        (self.token_amount * (target_pct - self.sold_percentage) / 100.0).max(0.0)
    }

    /// Tokens still held
    pub fn remaining_amount(&self) -> f64 {
        self.token_amount * (100.0 - self.sold_percentage) / 100.0
    }

    /// Unrealized P&L of the held remainder, in percent
    pub fn unrealized_pnl_pct(&self) -> f64 {
        (self.price_ratio() - 1.0) * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status == PositionStatus::FullySold
    }

    /// Apply a filled exit. Returns false if it would not raise the sold percent.
    fn apply_exit(&mut self, target_pct: f64, max_pct: f64, receipt: String) -> bool {
        if target_pct <= self.sold_percentage {
            return false;
        }

        self.sold_percentage = target_pct.min(max_pct);
        self.status = if self.sold_percentage >= max_pct {
            PositionStatus::FullySold
        } else {
            PositionStatus::PartiallySold(self.sold_percentage)
        };
        self.exit_receipts.push(receipt);
        self.last_updated_at = Utc::now();
        true
    }
}

/// Shared, ordered position collection
#[derive(Debug, Clone)]
pub struct PositionStore {
    positions: Arc<RwLock<Vec<Position>>>,
    persistence_path: Option<PathBuf>,
}

impl PositionStore {
    /// Create a store, optionally mirrored to a JSON snapshot
    pub fn new(persistence_path: Option<String>) -> Self {
        Self {
            positions: Arc::new(RwLock::new(Vec::new())),
            persistence_path: persistence_path.map(PathBuf::from),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Restore positions from the snapshot, if one exists
    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let loaded = Self::read_snapshot(path).await?;
        let mut positions = self.positions.write().await;
        *positions = loaded;
        info!("Loaded {} positions from {}", positions.len(), path.display());
        Ok(())
    }

    /// Write the snapshot, if persistence is enabled
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let data = {
            let positions = self.positions.read().await;
            serde_json::to_string_pretty(&*positions)
                .map_err(|e| Error::PositionPersistence(e.to_string()))?
        };

        tokio::fs::write(path, data)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        debug!("Saved positions to {}", path.display());
        Ok(())
    }

    /// Read a snapshot written by another process
    pub async fn read_snapshot(path: &Path) -> Result<Vec<Position>> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::PositionPersistence(format!("{}: {}", path.display(), e)))?;

        serde_json::from_str(&data).map_err(|e| Error::PositionPersistence(e.to_string()))
    }

    /// Add a newly opened position. One open position per asset.
    pub async fn insert(&self, position: Position) -> Result<()> {
        {
            let mut positions = self.positions.write().await;
            if positions.iter().any(|p| p.asset_id == position.asset_id) {
                return Err(Error::DuplicatePosition(position.asset_id));
            }

            info!(
                asset = %position.asset_id,
                symbol = %position.symbol,
                entry_price = position.entry_price,
                tokens = position.token_amount,
                "Position opened"
            );
            positions.push(position);
        }

        self.persist().await;
        Ok(())
    }

    pub async fn contains(&self, asset_id: &str) -> bool {
        self.positions
            .read()
            .await
            .iter()
            .any(|p| p.asset_id == asset_id)
    }

    pub async fn get(&self, asset_id: &str) -> Option<Position> {
        self.positions
            .read()
            .await
            .iter()
            .find(|p| p.asset_id == asset_id)
            .cloned()
    }

    /// Copy of every position, in insertion order
    pub async fn all(&self) -> Vec<Position> {
        self.positions.read().await.clone()
    }

    /// Copy of every position not yet fully sold
    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .await
            .iter()
            .filter(|p| !p.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }

    async fn update<F>(&self, asset_id: &str, f: F) -> Result<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut positions = self.positions.write().await;
        let position = positions
            .iter_mut()
            .find(|p| p.asset_id == asset_id)
            .ok_or_else(|| Error::PositionNotFound(asset_id.to_string()))?;

        f(position);
        Ok(position.clone())
    }

    /// Record a refreshed price
    pub async fn update_price(&self, asset_id: &str, price: f64) -> Result<()> {
        self.update(asset_id, |p| {
            p.current_price = price;
            p.last_updated_at = Utc::now();
        })
        .await?;
        Ok(())
    }

    /// Record a filled tier exit. The sold percent never decreases.
    pub async fn record_exit(
        &self,
        asset_id: &str,
        target_pct: f64,
        max_pct: f64,
        receipt: impl Into<String>,
    ) -> Result<Position> {
        let receipt = receipt.into();
        let mut applied = false;
        let position = self
            .update(asset_id, |p| applied = p.apply_exit(target_pct, max_pct, receipt))
            .await?;

        if applied {
            self.persist().await;
        } else {
            warn!(
                asset = %asset_id,
                target_pct,
                sold_pct = position.sold_percentage,
                "Exit would not raise sold percent, ignored"
            );
        }

        Ok(position)
    }

    /// Drop fully sold positions idle for longer than `retention`
    pub async fn prune_terminal(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let mut positions = self.positions.write().await;
        let before = positions.len();
        positions.retain(|p| !(p.is_terminal() && p.last_updated_at <= cutoff));
        let pruned = before - positions.len();

        if pruned > 0 {
            info!("Pruned {} fully sold positions", pruned);
        }
        pruned
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            warn!("Failed to persist positions: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn position(asset: &str) -> Position {
        Position::new(asset, "Test Token", "TEST", 0.0001, 0.1, 1000.0, "buy-sig")
    }

    #[test]
    fn test_position_math() {
        let mut p = position("mint1");
        p.current_price = 0.0002;

        assert!((p.price_ratio() - 2.0).abs() < 1e-9);
        assert!((p.unrealized_pnl_pct() - 100.0).abs() < 1e-6);
        assert!((p.sellable_amount(15.0) - 150.0).abs() < 1e-9);

        p.sold_percentage = 15.0;
        assert!((p.sellable_amount(50.0) - 350.0).abs() < 1e-9);
        assert!((p.remaining_amount() - 850.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_asset() {
        let store = PositionStore::in_memory();
        store.insert(position("mint1")).await.unwrap();

        let err = store.insert(position("mint1")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicatePosition(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_exit_is_monotonic() {
        let store = PositionStore::in_memory();
        store.insert(position("mint1")).await.unwrap();

        let p = store.record_exit("mint1", 50.0, 85.0, "sell-1").await.unwrap();
        assert_eq!(p.sold_percentage, 50.0);
        assert_eq!(p.status, PositionStatus::PartiallySold(50.0));

        let p = store.record_exit("mint1", 15.0, 85.0, "sell-2").await.unwrap();
        assert_eq!(p.sold_percentage, 50.0);
        assert_eq!(p.exit_receipts, vec!["sell-1"]);

        let p = store.record_exit("mint1", 85.0, 85.0, "sell-3").await.unwrap();
        assert_eq!(p.status, PositionStatus::FullySold);
        assert!(store.open_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_asset() {
        let store = PositionStore::in_memory();
        assert!(matches!(
            store.update_price("missing", 1.0).await,
            Err(Error::PositionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_terminal_keeps_recent_and_open() {
        let store = PositionStore::in_memory();
        store.insert(position("open")).await.unwrap();
        store.insert(position("done")).await.unwrap();
        store.record_exit("done", 85.0, 85.0, "sell").await.unwrap();

        assert_eq!(store.prune_terminal(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.prune_terminal(Duration::ZERO).await, 1);

        let remaining = store.all().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].asset_id, "open");
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        let path_str = path.to_string_lossy().to_string();

        let store = PositionStore::new(Some(path_str.clone()));
        store.insert(position("mint1")).await.unwrap();
        store.record_exit("mint1", 15.0, 85.0, "sell-1").await.unwrap();

        let restored = PositionStore::new(Some(path_str));
        restored.load().await.unwrap();
        let p = restored.get("mint1").await.unwrap();
        assert_eq!(p.sold_percentage, 15.0);
        assert_eq!(p.status, PositionStatus::PartiallySold(15.0));

        let snapshot = assert_ok!(PositionStore::read_snapshot(&path).await);
        assert_eq!(snapshot.len(), 1);
        assert_err!(PositionStore::read_snapshot(&dir.path().join("missing.json")).await);
    }
}
