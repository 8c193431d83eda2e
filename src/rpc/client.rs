//! Chain access
//!
//! [`ChainSource`] is the seam between the discovery loop and the chain.
//! Every method takes the endpoint to call so that endpoint selection
//! stays with the pool and retry policy. [`SolanaRpc`] is the JSON-RPC
//! implementation; tests substitute scripted sources.

use async_trait::async_trait;
use solana_account_decoder::{UiAccountData, UiAccountEncoding, UiDataSliceConfig};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionConfig,
};
use solana_client::rpc_request::{RpcRequest, TokenAccountsFilter};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiLoadedAddresses, UiMessage,
    UiTransactionEncoding,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

/// Longer than a blockhash stays valid
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(90);
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One entry from a signature listing
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
}

/// The parts of a confirmed transaction the scanner reads
#[derive(Debug, Clone, Default)]
pub struct TransactionDetail {
    pub signature: String,
    pub slot: u64,
    /// Static keys followed by any lookup-table keys
    pub account_keys: Vec<String>,
    pub logs: Vec<String>,
}

/// Read access to the chain, one call per endpoint
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current slot at confirmed commitment
    async fn tip_slot(&self, endpoint: &str) -> Result<u64>;

    /// Most recent signatures touching `address`, newest first
    async fn recent_signatures(
        &self,
        endpoint: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Addresses of all accounts owned by `program_id`.
    ///
    /// Expensive; many providers disable it.
    async fn program_accounts(&self, endpoint: &str, program_id: &str) -> Result<Vec<String>>;

    /// Confirmed transaction by signature, `None` if the node has not seen it
    async fn transaction(
        &self,
        endpoint: &str,
        signature: &str,
    ) -> Result<Option<TransactionDetail>>;
}

/// Solana JSON-RPC chain source with one client per endpoint
pub struct SolanaRpc {
    timeout: Duration,
    commitment: CommitmentConfig,
    clients: Mutex<HashMap<String, Arc<RpcClient>>>,
}

impl SolanaRpc {
    pub fn new(timeout: Duration, commitment: CommitmentConfig) -> Self {
        Self {
            timeout,
            commitment,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Cached client for `endpoint`
    pub fn client(&self, endpoint: &str) -> Arc<RpcClient> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(RpcClient::new_with_timeout_and_commitment(
                    endpoint.to_string(),
                    self.timeout,
                    self.commitment,
                ))
            })
            .clone()
    }

    /// Balance of `owner` in lamports
    pub async fn balance(&self, endpoint: &str, owner: &Pubkey) -> Result<u64> {
        Ok(self.client(endpoint).get_balance(owner).await?)
    }

    /// Amount of `mint` held by `owner`, summed over its token accounts
    pub async fn token_balance(&self, endpoint: &str, owner: &Pubkey, mint: &Pubkey) -> Result<f64> {
        let accounts = self
            .client(endpoint)
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(*mint))
            .await?;

        Ok(accounts
            .iter()
            .filter_map(|keyed| match &keyed.account.data {
                UiAccountData::Json(parsed) => parsed_ui_amount(&parsed.parsed),
                _ => None,
            })
            .sum())
    }
}

/// `info.tokenAmount` of a jsonParsed token account
fn parsed_ui_amount(parsed: &serde_json::Value) -> Option<f64> {
    let amount = parsed.pointer("/info/tokenAmount")?;
    amount
        .get("uiAmountString")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .or_else(|| amount.get("uiAmount").and_then(|v| v.as_f64()))
}

/// Transaction submission in two phases.
///
/// Once `send_transaction` succeeds the transaction may land, whatever
/// `confirm_transaction` later reports.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Submit a signed transaction, returning its signature
    async fn send_transaction(
        &self,
        endpoint: &str,
        transaction: &VersionedTransaction,
    ) -> Result<String>;

    /// Wait until `signature` reaches the configured commitment
    async fn confirm_transaction(&self, endpoint: &str, signature: &str) -> Result<()>;
}

#[async_trait]
impl TransactionSender for SolanaRpc {
    async fn send_transaction(
        &self,
        endpoint: &str,
        transaction: &VersionedTransaction,
    ) -> Result<String> {
        let signature = self.client(endpoint).send_transaction(transaction).await?;
        Ok(signature.to_string())
    }

    async fn confirm_transaction(&self, endpoint: &str, signature: &str) -> Result<()> {
        let parsed = Signature::from_str(signature)
            .map_err(|e| Error::InvalidRequest(format!("Invalid signature {}: {}", signature, e)))?;
        let client = self.client(endpoint);
        let deadline = Instant::now() + CONFIRM_TIMEOUT;

        loop {
            let status = client
                .get_signature_status_with_commitment(&parsed, self.commitment)
                .await?;

            match status {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) => {
                    return Err(Error::Execution(format!(
                        "transaction {} failed: {}",
                        signature, e
                    )))
                }
                None if Instant::now() >= deadline => {
                    return Err(Error::Execution(format!(
                        "transaction {} not confirmed within {}s",
                        signature,
                        CONFIRM_TIMEOUT.as_secs()
                    )))
                }
                None => tokio::time::sleep(CONFIRM_POLL_INTERVAL).await,
            }
        }
    }
}

fn parse_pubkey(address: &str) -> Result<Pubkey> {
    Pubkey::from_str(address)
        .map_err(|e| Error::InvalidRequest(format!("Invalid address {}: {}", address, e)))
}

#[async_trait]
impl ChainSource for SolanaRpc {
    async fn tip_slot(&self, endpoint: &str) -> Result<u64> {
        Ok(self.client(endpoint).get_slot().await?)
    }

    async fn recent_signatures(
        &self,
        endpoint: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let address = parse_pubkey(address)?;
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };

        let statuses = self
            .client(endpoint)
            .get_signatures_for_address_with_config(&address, config)
            .await?;

        Ok(statuses
            .into_iter()
            .map(|s| SignatureInfo {
                signature: s.signature,
                slot: s.slot,
            })
            .collect())
    }

    async fn program_accounts(&self, endpoint: &str, program_id: &str) -> Result<Vec<String>> {
        let program_id = parse_pubkey(program_id)?;
        // Only addresses are needed, skip account data
        let config = RpcProgramAccountsConfig {
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                data_slice: Some(UiDataSliceConfig {
                    offset: 0,
                    length: 0,
                }),
                commitment: Some(self.commitment),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };

        let accounts = self
            .client(endpoint)
            .get_program_accounts_with_config(&program_id, config)
            .await?;

        debug!(
            endpoint = %endpoint,
            count = accounts.len(),
            "Program accounts fetched"
        );

        Ok(accounts.into_iter().map(|(key, _)| key.to_string()).collect())
    }

    async fn transaction(
        &self,
        endpoint: &str,
        signature: &str,
    ) -> Result<Option<TransactionDetail>> {
        let parsed = Signature::from_str(signature)
            .map_err(|e| Error::InvalidRequest(format!("Invalid signature {}: {}", signature, e)))?;

        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        // `send` keeps a null result as `None` instead of a decode error
        let response: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .client(endpoint)
            .send(
                RpcRequest::GetTransaction,
                serde_json::json!([parsed.to_string(), config]),
            )
            .await?;

        Ok(response.map(|tx| to_detail(signature, tx)))
    }
}

fn to_detail(signature: &str, tx: EncodedConfirmedTransactionWithStatusMeta) -> TransactionDetail {
    let mut account_keys = match &tx.transaction.transaction {
        EncodedTransaction::Json(ui) => match &ui.message {
            UiMessage::Raw(raw) => raw.account_keys.clone(),
            UiMessage::Parsed(parsed) => parsed
                .account_keys
                .iter()
                .map(|k| k.pubkey.clone())
                .collect(),
        },
        other => other
            .decode()
            .map(|vt| {
                vt.message
                    .static_account_keys()
                    .iter()
                    .map(|k| k.to_string())
                    .collect()
            })
            .unwrap_or_default(),
    };

    let mut logs = Vec::new();
    if let Some(meta) = tx.transaction.meta {
        logs = Option::<Vec<String>>::from(meta.log_messages).unwrap_or_default();
        if let Some(loaded) = Option::<UiLoadedAddresses>::from(meta.loaded_addresses) {
            account_keys.extend(loaded.writable);
            account_keys.extend(loaded.readonly);
        }
    }

    TransactionDetail {
        signature: signature.to_string(),
        slot: tx.slot,
        account_keys,
        logs,
    }
}
