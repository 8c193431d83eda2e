//! Jupiter aggregator trade execution
//!
//! quote → swap → sign → send → confirm. The swap endpoint returns a
//! base64 bincode `VersionedTransaction` with the wallet as fee payer; it
//! is re-signed locally and submitted through the endpoint pool. Once a
//! send has gone out, no failure is retryable.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BuyFill, TradeExecutor, LAMPORTS_PER_SOL, WSOL_MINT};
use crate::config::TradingConfig;
use crate::error::{Error, Result};
use crate::rpc::{EndpointKind, EndpointPool, TransactionSender};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: Option<u64>,
}

/// Trade executor backed by the Jupiter swap API
pub struct JupiterTrader {
    http: Client,
    rpc: Arc<dyn TransactionSender>,
    pool: Arc<EndpointPool>,
    keypair: Arc<Keypair>,
    quote_url: String,
    swap_url: String,
    token_decimals: u8,
}

impl JupiterTrader {
    pub fn new(
        config: &TradingConfig,
        timeout: Duration,
        rpc: Arc<dyn TransactionSender>,
        pool: Arc<EndpointPool>,
        keypair: Arc<Keypair>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rpc,
            pool,
            keypair,
            quote_url: config.quote_url.clone(),
            swap_url: config.swap_url.clone(),
            token_decimals: config.token_decimals,
        })
    }

    /// Fetch a quote, returned untouched for the swap request
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u32,
    ) -> Result<(Value, u64)> {
        let response = self
            .http
            .get(&self.quote_url)
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("swapMode", "ExactIn".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match Error::from_http_status(status.as_u16(), body) {
                Error::InvalidRequest(msg) | Error::NotFound(msg) | Error::Rpc(msg) => {
                    Error::Quote(msg)
                }
                retryable => retryable,
            });
        }

        let quote: Value = response.json().await?;
        let out_amount = parse_out_amount(&quote)?;
        Ok((quote, out_amount))
    }

    /// Build, sign and submit the swap for a quote
    async fn swap(&self, quote: Value) -> Result<String> {
        let response = self
            .http
            .post(&self.swap_url)
            .json(&json!({
                "userPublicKey": self.keypair.pubkey().to_string(),
                "quoteResponse": quote,
                "wrapAndUnwrapSol": true,
                "dynamicComputeUnitLimit": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), body));
        }

        let swap: SwapResponse = response.json().await?;
        debug!(
            last_valid_block_height = ?swap.last_valid_block_height,
            "Swap transaction received"
        );

        let transaction = sign_swap_transaction(&swap.swap_transaction, &self.keypair)?;
        let endpoint = self.pool.next_endpoint(EndpointKind::Http)?;

        submit(self.rpc.as_ref(), &endpoint, &transaction).await
    }
}

/// Send, then confirm. Only a throttled send stays retryable; any failure
/// after the send went out is final.
async fn submit(
    sender: &dyn TransactionSender,
    endpoint: &str,
    transaction: &VersionedTransaction,
) -> Result<String> {
    let signature = sender
        .send_transaction(endpoint, transaction)
        .await
        .map_err(|e| match e {
            Error::RateLimited(_) => e,
            other => Error::Execution(format!("send failed: {}", other)),
        })?;

    if let Err(e) = sender.confirm_transaction(endpoint, &signature).await {
        warn!(signature = %signature, error = %e, "Transaction sent but not confirmed");
        return Err(match e {
            Error::Execution(_) => e,
            other => Error::Execution(format!(
                "transaction {} sent, confirmation failed: {}",
                signature, other
            )),
        });
    }

    Ok(signature)
}

#[async_trait]
impl TradeExecutor for JupiterTrader {
    async fn buy(&self, asset_id: &str, sol_amount: f64, slippage_bps: u32) -> Result<BuyFill> {
        let lamports = (sol_amount * LAMPORTS_PER_SOL as f64) as u64;
        if lamports == 0 {
            return Err(Error::Execution(format!("buy amount {} SOL too small", sol_amount)));
        }

        let (quote, out_raw) = self.quote(WSOL_MINT, asset_id, lamports, slippage_bps).await?;
        let token_amount = from_raw(out_raw, self.token_decimals);
        if token_amount <= 0.0 {
            return Err(Error::Quote(format!("zero output for {}", asset_id)));
        }

        let fill_price = sol_amount / token_amount;
        info!(
            asset = %asset_id,
            sol = sol_amount,
            tokens = token_amount,
            price = fill_price,
            "Buy quote received"
        );

        let receipt = self.swap(quote).await?;
        info!(asset = %asset_id, signature = %receipt, "Buy confirmed");

        Ok(BuyFill {
            fill_price,
            token_amount,
            receipt,
        })
    }

    async fn sell(&self, asset_id: &str, token_amount: f64, slippage_bps: u32) -> Result<String> {
        let raw = to_raw(token_amount, self.token_decimals);
        if raw == 0 {
            return Err(Error::Execution(format!(
                "sell amount {} rounds to zero",
                token_amount
            )));
        }

        let (quote, out_lamports) = self.quote(asset_id, WSOL_MINT, raw, slippage_bps).await?;
        info!(
            asset = %asset_id,
            tokens = token_amount,
            sol = out_lamports as f64 / LAMPORTS_PER_SOL as f64,
            "Sell quote received"
        );

        let receipt = self.swap(quote).await?;
        info!(asset = %asset_id, signature = %receipt, "Sell confirmed");
        Ok(receipt)
    }
}

fn parse_out_amount(quote: &Value) -> Result<u64> {
    quote
        .get("outAmount")
        .and_then(|v| match v {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        })
        .ok_or_else(|| Error::Quote("quote response missing outAmount".to_string()))
}

/// Decode a base64 swap transaction and sign it with the wallet
fn sign_swap_transaction(encoded: &str, keypair: &Keypair) -> Result<VersionedTransaction> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Deserialization(format!("swap transaction base64: {}", e)))?;

    let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| Error::Deserialization(format!("swap transaction: {}", e)))?;

    VersionedTransaction::try_new(unsigned.message, &[keypair])
        .map_err(|e| Error::Execution(format!("failed to sign swap: {}", e)))
}

fn to_raw(amount: f64, decimals: u8) -> u64 {
    (amount * 10f64.powi(decimals as i32)).floor() as u64
}

fn from_raw(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RetryOptions, RetryPolicy};
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::signature::Signature;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unit_conversion() {
        assert_eq!(to_raw(1.5, 6), 1_500_000);
        assert_eq!(to_raw(0.0000001, 6), 0);
        assert!((from_raw(2_500_000, 6) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_out_amount() {
        assert_eq!(parse_out_amount(&json!({"outAmount": "12345"})).unwrap(), 12345);
        assert_eq!(parse_out_amount(&json!({"outAmount": 7})).unwrap(), 7);
        assert!(matches!(
            parse_out_amount(&json!({"inAmount": "1"})),
            Err(Error::Quote(_))
        ));
    }

    #[test]
    fn test_sign_swap_transaction() {
        let keypair = Keypair::new();
        let message = Message::new(&[], Some(&keypair.pubkey()));
        let unsigned = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        };
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(bincode::serialize(&unsigned).unwrap());

        let signed = sign_swap_transaction(&encoded, &keypair).unwrap();
        assert_eq!(signed.signatures.len(), 1);
        assert_ne!(signed.signatures[0], Signature::default());
        assert!(signed.verify_with_results().iter().all(|ok| *ok));
    }

    /// Sender whose confirm phase is throttled
    struct ThrottledConfirm {
        sends: AtomicUsize,
        throttle_send: bool,
    }

    #[async_trait]
    impl TransactionSender for ThrottledConfirm {
        async fn send_transaction(
            &self,
            _endpoint: &str,
            _transaction: &VersionedTransaction,
        ) -> Result<String> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if self.throttle_send {
                return Err(Error::RateLimited("HTTP 429 Too Many Requests".into()));
            }
            Ok(format!("sig-{}", n))
        }

        async fn confirm_transaction(&self, _endpoint: &str, _signature: &str) -> Result<()> {
            Err(Error::RateLimited("HTTP 429 Too Many Requests".into()))
        }
    }

    fn unsigned_transaction() -> VersionedTransaction {
        let keypair = Keypair::new();
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(Message::new(&[], Some(&keypair.pubkey()))),
        }
    }

    fn retry_twice() -> (RetryPolicy, RetryOptions) {
        let retry = RetryPolicy::new(Arc::new(EndpointPool::new(vec![], vec![])));
        let options = RetryOptions::new("buy")
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(10));
        (retry, options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_confirm_is_sent_once() {
        let sender = ThrottledConfirm {
            sends: AtomicUsize::new(0),
            throttle_send: false,
        };
        let transaction = unsigned_transaction();
        let (retry, options) = retry_twice();

        let err = retry
            .guard(options, || submit(&sender, "http://a", &transaction))
            .await
            .unwrap_err();

        assert_eq!(sender.sends.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Execution(ref msg) if msg.contains("sig-0")));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_send_is_retried() {
        let sender = ThrottledConfirm {
            sends: AtomicUsize::new(0),
            throttle_send: true,
        };
        let transaction = unsigned_transaction();
        let (retry, options) = retry_twice();

        let err = retry
            .guard(options, || submit(&sender, "http://a", &transaction))
            .await
            .unwrap_err();

        assert_eq!(sender.sends.load(Ordering::SeqCst), 3);
        assert!(matches!(err, Error::RetryExhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_sign_rejects_garbage() {
        let keypair = Keypair::new();
        assert!(sign_swap_transaction("!!!", &keypair).is_err());
        assert!(sign_swap_transaction("AAAA", &keypair).is_err());
    }
}
