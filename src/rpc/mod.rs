//! RPC resilience layer
//!
//! - `pool`: rotating endpoint lists with a failed set per kind
//! - `retry`: classify-and-backoff wrapper for every network call
//! - `client`: chain access seam and its Solana JSON-RPC implementation

pub mod client;
pub mod pool;
pub mod retry;

pub use client::{ChainSource, SignatureInfo, SolanaRpc, TransactionDetail, TransactionSender};
pub use pool::{EndpointKind, EndpointPool};
pub use retry::{RetryOptions, RetryPolicy};
