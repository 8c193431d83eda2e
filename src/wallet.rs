//! Trading wallet
//!
//! Keypair sources, in order: `WALLET_PRIVATE_KEY` (base58 secret key),
//! then a JSON byte-array keypair file at `KEYPAIR_PATH` or `WALLET_PATH`.
//! Balances are read through the endpoint pool.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::rpc::{EndpointKind, RetryOptions, RetryPolicy, SolanaRpc};
use crate::trading::LAMPORTS_PER_SOL;

/// Load the trading keypair from the environment
pub fn load_keypair() -> Result<Keypair> {
    if let Ok(private_key) = std::env::var("WALLET_PRIVATE_KEY") {
        return keypair_from_base58(private_key.trim());
    }

    let path = std::env::var("KEYPAIR_PATH")
        .or_else(|_| std::env::var("WALLET_PATH"))
        .map_err(|_| {
            Error::InvalidKeypair(
                "No wallet configured. Set WALLET_PRIVATE_KEY or KEYPAIR_PATH".to_string(),
            )
        })?;

    keypair_from_file(Path::new(&path))
}

/// Parse a base58-encoded 64-byte secret key
pub fn keypair_from_base58(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidKeypair(format!("Invalid base58 private key: {}", e)))?;

    Keypair::from_bytes(&bytes)
        .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes: {}", e)))
}

/// Read a JSON byte-array keypair file, refusing group/world-readable files
pub fn keypair_from_file(path: &Path) -> Result<Keypair> {
    debug!("Loading keypair from: {:?}", path);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::InvalidKeypair(format!(
                    "Keypair {} has insecure permissions {:o}. Run 'chmod 600 {}'",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }
    }

    let data = std::fs::read(path).map_err(|e| {
        Error::InvalidKeypair(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let bytes: Vec<u8> = serde_json::from_slice(&data).map_err(|e| {
        Error::InvalidKeypair(format!("Failed to parse keypair JSON {}: {}", path.display(), e))
    })?;

    Keypair::from_bytes(&bytes)
        .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes: {}", e)))
}

/// SOL balance of `owner`
pub async fn sol_balance(
    rpc: &SolanaRpc,
    retry: &RetryPolicy,
    options: RetryOptions,
    owner: &Pubkey,
) -> Result<f64> {
    let lamports = retry
        .guard_rotating(EndpointKind::Http, options, |endpoint| async move {
            rpc.balance(&endpoint, owner).await
        })
        .await?;

    Ok(lamports_to_sol(lamports))
}

/// Token balance of `owner` for `mint`, zero when it holds no account
pub async fn token_balance(
    rpc: &SolanaRpc,
    retry: &RetryPolicy,
    options: RetryOptions,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<f64> {
    retry
        .guard_rotating(EndpointKind::Http, options, |endpoint| async move {
            rpc.token_balance(&endpoint, owner, mint).await
        })
        .await
}

fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}
