//! Tier sniper library
//!
//! Resilient pump.fun launch discovery over rate-limited RPC, with
//! tiered take-profit exits on every acquired position.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod position;
pub mod pump;
pub mod rpc;
pub mod trading;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
