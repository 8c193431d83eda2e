//! One discovery polling cycle
//!
//! tip slot → recent signatures (or the account-scan fallback) →
//! filter by slot and dedup → fetch → creation predicate → extract →
//! hand to the sink. The scanner owns the cycle state that survives
//! restarts: the last tip, the dedup cache, the account cooldowns and the
//! transactions still waiting to be served by a lagging node.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dedup::RecentSignatures;
use super::EventSink;
use crate::config::{Config, RetrySettings};
use crate::error::Result;
use crate::pump::{extract_creation_event, is_creation_transaction, CreationEvent};
use crate::rpc::{ChainSource, EndpointKind, RetryPolicy, SignatureInfo};

/// Fetches per signature before a transaction the node never returns is dropped
const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Cap on signatures carried over to the next cycle
const MAX_PENDING: usize = 100;

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Tip slot fetched at the start of the cycle
    pub tip: u64,
    /// First cycle: tip recorded, nothing scanned
    pub baseline: bool,
    /// Signature listing failed and accounts were scanned instead
    pub fallback: bool,
    /// Signatures returned by the listing
    pub listed: usize,
    /// At or below the previous tip
    pub stale: usize,
    /// Already in the dedup cache
    pub duplicates: usize,
    /// Transactions fetched
    pub fetched: usize,
    /// Transaction fetches that failed and were skipped
    pub failed: usize,
    /// Fetches the node answered with no transaction
    pub unavailable: usize,
    /// Signatures carried over to be fetched again next cycle
    pub pending: usize,
    /// Creation events handed to the sink
    pub events: usize,
}

/// Outcome of fetching one signature
enum Inspection {
    Event(CreationEvent),
    /// Not a creation, or a creation whose mint is unreadable
    Ignored,
    /// The node has not seen the transaction yet
    Unavailable,
}

/// A signature whose transaction was not available yet
struct PendingFetch {
    info: SignatureInfo,
    attempts: u32,
}

pub struct Scanner {
    chain: Arc<dyn ChainSource>,
    retry: RetryPolicy,
    sink: Arc<dyn EventSink>,
    program_id: String,
    markers: Vec<String>,
    signature_limit: usize,
    account_batch_size: usize,
    account_cooldown: Duration,
    inter_call_delay: Duration,
    tip_retry: RetrySettings,
    discovery_retry: RetrySettings,
    transaction_retry: RetrySettings,
    last_tip: Option<u64>,
    seen: RecentSignatures,
    last_checked: HashMap<String, Instant>,
    pending: VecDeque<PendingFetch>,
}

impl Scanner {
    pub fn new(
        config: &Config,
        chain: Arc<dyn ChainSource>,
        retry: RetryPolicy,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let discovery = &config.discovery;
        Self {
            chain,
            retry,
            sink,
            program_id: discovery.program_id.clone(),
            markers: discovery.create_log_markers.clone(),
            signature_limit: discovery.signature_limit,
            account_batch_size: discovery.account_batch_size,
            account_cooldown: discovery.account_cooldown(),
            inter_call_delay: discovery.inter_call_delay(),
            tip_retry: config.retry.tip().clone(),
            discovery_retry: config.retry.discovery().clone(),
            transaction_retry: config.retry.transaction().clone(),
            last_tip: None,
            seen: RecentSignatures::new(discovery.dedup_capacity),
            last_checked: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Tip slot of the last completed cycle
    pub fn last_tip(&self) -> Option<u64> {
        self.last_tip
    }

    /// Run one cycle.
    ///
    /// Errors are cycle-fatal: the tip fetch, or the listing and its
    /// fallback both failing. The tip is only advanced when the cycle
    /// completes, so a failed cycle's window is rescanned.
    pub async fn cycle(&mut self) -> Result<CycleReport> {
        let tip = self.fetch_tip().await?;
        let mut report = CycleReport {
            tip,
            ..CycleReport::default()
        };

        let Some(previous) = self.last_tip else {
            info!(slot = tip, "Discovery baseline recorded");
            self.last_tip = Some(tip);
            report.baseline = true;
            return Ok(report);
        };

        let mut signatures = match self.list_signatures().await {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(error = %e, "Signature listing failed, scanning program accounts");
                report.fallback = true;
                self.scan_accounts().await?
            }
        };
        report.listed = signatures.len();

        // Older than anything listed this cycle, so fetched first
        let carried: Vec<PendingFetch> = self.pending.drain(..).collect();
        for fetch in carried {
            self.process(fetch.info, fetch.attempts, &mut report).await;
        }

        // Listings are newest first
        signatures.reverse();
        signatures.sort_by_key(|s| s.slot);

        for info in signatures {
            if info.slot <= previous {
                report.stale += 1;
                continue;
            }
            if !self.seen.insert(&info.signature) {
                report.duplicates += 1;
                continue;
            }
            self.process(info, 0, &mut report).await;
        }

        report.pending = self.pending.len();
        self.last_tip = Some(previous.max(tip));
        Ok(report)
    }

    /// Fetch one signature and hand any creation event to the sink.
    /// `attempts` counts earlier fetches that found nothing.
    async fn process(&mut self, info: SignatureInfo, attempts: u32, report: &mut CycleReport) {
        report.fetched += 1;
        match self.inspect(&info).await {
            Ok(Inspection::Event(event)) => {
                info!(
                    asset = %event.asset_id,
                    name = %event.name,
                    symbol = %event.symbol,
                    signature = %event.source_signature,
                    slot = event.slot,
                    "Creation event discovered"
                );
                report.events += 1;
                self.sink.on_event(event).await;
            }
            Ok(Inspection::Ignored) => {}
            Ok(Inspection::Unavailable) => {
                report.unavailable += 1;
                let attempts = attempts + 1;
                if attempts >= MAX_FETCH_ATTEMPTS {
                    info!(
                        signature = %info.signature,
                        slot = info.slot,
                        attempts,
                        "Transaction never became available, dropped"
                    );
                    return;
                }

                info!(
                    signature = %info.signature,
                    slot = info.slot,
                    "Transaction not available yet, fetching again next cycle"
                );
                if self.pending.len() >= MAX_PENDING {
                    if let Some(evicted) = self.pending.pop_front() {
                        info!(signature = %evicted.info.signature, "Pending fetch evicted");
                    }
                }
                self.pending.push_back(PendingFetch { info, attempts });
            }
            Err(e) => {
                debug!(signature = %info.signature, error = %e, "Transaction skipped");
                report.failed += 1;
            }
        }
    }

    async fn fetch_tip(&self) -> Result<u64> {
        let chain = &self.chain;
        self.retry
            .guard_rotating(
                EndpointKind::Http,
                self.tip_retry.options("getSlot"),
                |endpoint| async move { chain.tip_slot(&endpoint).await },
            )
            .await
    }

    async fn list_signatures(&self) -> Result<Vec<SignatureInfo>> {
        let chain = &self.chain;
        let program_id = self.program_id.as_str();
        let limit = self.signature_limit;
        self.retry
            .guard_rotating(
                EndpointKind::Http,
                self.discovery_retry.options("getSignaturesForAddress"),
                |endpoint| async move {
                    chain.recent_signatures(&endpoint, program_id, limit).await
                },
            )
            .await
    }

    /// Fallback: enumerate program accounts, then list signatures for a
    /// small batch of accounts not checked within the cooldown window
    async fn scan_accounts(&mut self) -> Result<Vec<SignatureInfo>> {
        let chain = &self.chain;
        let program_id = self.program_id.as_str();
        let limit = self.signature_limit;

        let accounts = self
            .retry
            .guard_rotating(
                EndpointKind::Http,
                self.discovery_retry.options("getProgramAccounts"),
                |endpoint| async move { chain.program_accounts(&endpoint, program_id).await },
            )
            .await?;

        let now = Instant::now();
        let cooldown = self.account_cooldown;
        self.last_checked
            .retain(|_, checked_at| now.duration_since(*checked_at) < cooldown);

        let batch: Vec<String> = accounts
            .into_iter()
            .filter(|account| !self.last_checked.contains_key(account))
            .take(self.account_batch_size)
            .collect();

        debug!(batch = batch.len(), "Scanning program accounts");

        let mut found = Vec::new();
        for (i, account) in batch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inter_call_delay).await;
            }
            self.last_checked.insert(account.clone(), Instant::now());

            let address = account.as_str();
            let result = self
                .retry
                .guard_rotating(
                    EndpointKind::Http,
                    self.discovery_retry
                        .options(format!("getSignaturesForAddress {}", address)),
                    |endpoint| async move {
                        chain.recent_signatures(&endpoint, address, limit).await
                    },
                )
                .await;

            match result {
                Ok(signatures) => found.extend(signatures),
                Err(e) => debug!(account = %address, error = %e, "Account skipped"),
            }
        }

        let mut unique = HashSet::new();
        found.retain(|s| unique.insert(s.signature.clone()));
        found.sort_by(|a, b| b.slot.cmp(&a.slot));
        Ok(found)
    }

    /// Fetch a transaction and extract its creation event, if it is one
    async fn inspect(&self, info: &SignatureInfo) -> Result<Inspection> {
        let chain = &self.chain;
        let signature = info.signature.as_str();

        let detail = self
            .retry
            .guard_rotating(
                EndpointKind::Http,
                self.transaction_retry.options("getTransaction"),
                |endpoint| async move { chain.transaction(&endpoint, signature).await },
            )
            .await?;

        let Some(detail) = detail else {
            return Ok(Inspection::Unavailable);
        };

        if !is_creation_transaction(&detail, &self.program_id, &self.markers) {
            return Ok(Inspection::Ignored);
        }

        match extract_creation_event(&detail) {
            Some(event) => Ok(Inspection::Event(event)),
            None => {
                info!(signature = %signature, "Creation event dropped, mint unreadable");
                Ok(Inspection::Ignored)
            }
        }
    }
}
