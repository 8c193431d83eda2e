//! Profit tier table
//!
//! Ordered `(multiplier, cumulative sell %)` rules for partial exits.
//! Both columns strictly increase, so a tier whose percentage has been
//! reached can never match again.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One partial-exit rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitTier {
    /// Price ratio (current / entry) that arms the tier
    pub multiplier: f64,
    /// Cumulative percent of the original quantity sold once the tier fills
    pub sell_pct: f64,
}

impl ProfitTier {
    pub fn new(multiplier: f64, sell_pct: f64) -> Self {
        Self {
            multiplier,
            sell_pct,
        }
    }
}

/// Validated, read-only tier table
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitTiers {
    tiers: Vec<ProfitTier>,
}

impl ProfitTiers {
    pub fn new(tiers: Vec<ProfitTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::InvalidTiers("table is empty".to_string()));
        }

        for tier in &tiers {
            if !tier.multiplier.is_finite() || tier.multiplier <= 0.0 {
                return Err(Error::InvalidTiers(format!(
                    "multiplier must be positive, got {}",
                    tier.multiplier
                )));
            }
            if tier.sell_pct.is_nan() || tier.sell_pct <= 0.0 || tier.sell_pct > 100.0 {
                return Err(Error::InvalidTiers(format!(
                    "sell percent must be in (0, 100], got {}",
                    tier.sell_pct
                )));
            }
        }

        for pair in tiers.windows(2) {
            if pair[1].multiplier <= pair[0].multiplier || pair[1].sell_pct <= pair[0].sell_pct {
                return Err(Error::InvalidTiers(format!(
                    "tiers must strictly increase: ({}x, {}%) then ({}x, {}%)",
                    pair[0].multiplier, pair[0].sell_pct, pair[1].multiplier, pair[1].sell_pct
                )));
            }
        }

        Ok(Self { tiers })
    }

    /// Highest cumulative percent in the table
    pub fn max_cumulative_pct(&self) -> f64 {
        self.tiers.last().map(|t| t.sell_pct).unwrap_or(0.0)
    }

    /// Lowest tier that is armed at `ratio` and not yet filled at `sold_pct`
    pub fn next_trigger(&self, ratio: f64, sold_pct: f64) -> Option<&ProfitTier> {
        self.tiers
            .iter()
            .find(|t| t.multiplier <= ratio && t.sell_pct > sold_pct)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfitTier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl std::fmt::Display for ProfitTiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .tiers
            .iter()
            .map(|t| format!("{}x:{}%", t.multiplier, t.sell_pct))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
