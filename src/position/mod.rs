//! Position tracking and tiered exits

pub mod monitor;
pub mod store;
pub mod tiers;

pub use monitor::{PositionMonitor, TickReport};
pub use store::{Position, PositionStatus, PositionStore};
pub use tiers::{ProfitTier, ProfitTiers};
