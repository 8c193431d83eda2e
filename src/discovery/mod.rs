//! Discovery of newly created tokens
//!
//! - `scanner`: one polling cycle against the chain
//! - `supervisor`: repeats cycles and restarts them with backoff
//! - `dedup`: bounded cache of already-processed signatures
//! - `synthetic`: generated events for simulation mode
//!
//! Both the scanner and the synthetic generator hand events to an
//! [`EventSink`], normally the entry pipeline.

pub mod dedup;
pub mod scanner;
pub mod supervisor;
pub mod synthetic;

use async_trait::async_trait;

use crate::pump::CreationEvent;

pub use dedup::RecentSignatures;
pub use scanner::{CycleReport, Scanner};
pub use supervisor::DiscoverySupervisor;
pub use synthetic::SyntheticDiscovery;

/// Consumer of discovered creation events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: CreationEvent);
}
