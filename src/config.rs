//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::commitment_config::CommitmentConfig;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::position::tiers::{ProfitTier, ProfitTiers};
use crate::pump::program::PUMP_PROGRAM_ID_STR;
use crate::rpc::retry::RetryOptions;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Paid endpoint tried first; prepended to `http_endpoints`
    #[serde(default)]
    pub premium_endpoint: Option<String>,
    #[serde(default = "default_http_endpoints")]
    pub http_endpoints: Vec<String>,
    #[serde(default = "default_ws_endpoints")]
    pub ws_endpoints: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `processed`, `confirmed` or `finalized`
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

impl RpcConfig {
    /// HTTP endpoints in selection order, premium first, duplicates removed
    pub fn http_endpoint_list(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .premium_endpoint
            .iter()
            .chain(self.http_endpoints.iter());

        for url in candidates {
            let url = url.trim();
            if !url.is_empty() && !out.iter().any(|u| u == url) {
                out.push(url.to_string());
            }
        }
        out
    }

    /// Streaming endpoints, derived from the HTTP list when none are configured
    pub fn ws_endpoint_list(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .ws_endpoints
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        if !configured.is_empty() {
            return configured;
        }

        self.http_endpoint_list()
            .iter()
            .map(|u| {
                if let Some(rest) = u.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = u.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    u.clone()
                }
            })
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn commitment(&self) -> Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.commitment)
            .map_err(|_| anyhow::anyhow!("Invalid commitment: {}", self.commitment))
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            premium_endpoint: None,
            http_endpoints: default_http_endpoints(),
            ws_endpoints: default_ws_endpoints(),
            timeout_ms: default_timeout_ms(),
            commitment: default_commitment(),
        }
    }
}

/// Retry budget for one class of call
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetrySettings {
    /// Build per-call retry options with a description for logging
    pub fn options(&self, description: impl Into<String>) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_factor: self.backoff_factor,
            description: description.into(),
            failure_endpoint: None,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Retry budgets per call class. Each call site gets its own budget.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub default: RetrySettings,
    /// Tip-marker (slot) fetch
    #[serde(default)]
    pub tip: Option<RetrySettings>,
    /// Signature listing and account enumeration
    #[serde(default)]
    pub discovery: Option<RetrySettings>,
    /// Full transaction fetch
    #[serde(default)]
    pub transaction: Option<RetrySettings>,
    /// Price refresh
    #[serde(default)]
    pub price: Option<RetrySettings>,
    /// Buy and sell execution
    #[serde(default)]
    pub trade: Option<RetrySettings>,
}

impl RetryConfig {
    pub fn tip(&self) -> &RetrySettings {
        self.tip.as_ref().unwrap_or(&self.default)
    }

    pub fn discovery(&self) -> &RetrySettings {
        self.discovery.as_ref().unwrap_or(&self.default)
    }

    pub fn transaction(&self) -> &RetrySettings {
        self.transaction.as_ref().unwrap_or(&self.default)
    }

    pub fn price(&self) -> &RetrySettings {
        self.price.as_ref().unwrap_or(&self.default)
    }

    pub fn trade(&self) -> &RetrySettings {
        self.trade.as_ref().unwrap_or(&self.default)
    }

    fn all(&self) -> Vec<(&'static str, &RetrySettings)> {
        vec![
            ("default", &self.default),
            ("tip", self.tip()),
            ("discovery", self.discovery()),
            ("transaction", self.transaction()),
            ("price", self.price()),
            ("trade", self.trade()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Program whose creation events are watched
    #[serde(default = "default_program_id")]
    pub program_id: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Signatures requested per cycle
    #[serde(default = "default_signature_limit")]
    pub signature_limit: usize,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// An account is not re-checked in fallback mode within this window
    #[serde(default = "default_account_cooldown_secs")]
    pub account_cooldown_secs: u64,
    /// Accounts re-checked per fallback cycle
    #[serde(default = "default_account_batch_size")]
    pub account_batch_size: usize,
    /// Pause between per-account calls in fallback mode
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    #[serde(default = "default_restart_initial_delay_ms")]
    pub restart_initial_delay_ms: u64,
    #[serde(default = "default_restart_max_delay_secs")]
    pub restart_max_delay_secs: u64,
    /// Log substrings that mark a creation instruction
    #[serde(default = "default_create_log_markers")]
    pub create_log_markers: Vec<String>,
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn account_cooldown(&self) -> Duration {
        Duration::from_secs(self.account_cooldown_secs)
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
            poll_interval_secs: default_poll_interval_secs(),
            signature_limit: default_signature_limit(),
            dedup_capacity: default_dedup_capacity(),
            account_cooldown_secs: default_account_cooldown_secs(),
            account_batch_size: default_account_batch_size(),
            inter_call_delay_ms: default_inter_call_delay_ms(),
            restart_initial_delay_ms: default_restart_initial_delay_ms(),
            restart_max_delay_secs: default_restart_max_delay_secs(),
            create_log_markers: default_create_log_markers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Ordered (multiplier, cumulative sell %) pairs
    #[serde(default = "default_tiers")]
    pub tiers: Vec<ProfitTier>,
    /// Prune fully sold positions older than this
    #[serde(default)]
    pub retention_secs: Option<u64>,
    /// JSON snapshot of the position store
    #[serde(default)]
    pub persistence_path: Option<String>,
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn profit_tiers(&self) -> crate::error::Result<ProfitTiers> {
        ProfitTiers::new(self.tiers.clone())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            tiers: default_tiers(),
            retention_secs: None,
            persistence_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_buy_amount_sol")]
    pub buy_amount_sol: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
    #[serde(default = "default_swap_url")]
    pub swap_url: String,
    #[serde(default = "default_price_url")]
    pub price_url: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_amount_sol: default_buy_amount_sol(),
            slippage_bps: default_slippage_bps(),
            quote_url: default_quote_url(),
            swap_url: default_swap_url(),
            price_url: default_price_url(),
            token_decimals: default_token_decimals(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "default_max_symbol_len")]
    pub max_symbol_len: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_patterns: vec![],
            max_symbol_len: default_max_symbol_len(),
        }
    }
}

/// Synthetic discovery and prices, for exercising the exit logic offline
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_event_interval_secs")]
    pub event_interval_secs: u64,
    #[serde(default = "default_initial_price")]
    pub initial_price: f64,
    /// Mean per-tick log return
    #[serde(default = "default_drift")]
    pub drift: f64,
    /// Per-tick log return standard deviation
    #[serde(default = "default_volatility")]
    pub volatility: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            event_interval_secs: default_event_interval_secs(),
            initial_price: default_initial_price(),
            drift: default_drift(),
            volatility: default_volatility(),
        }
    }
}

// Default value functions
fn default_http_endpoints() -> Vec<String> {
    match std::env::var("RPC_ENDPOINTS") {
        Ok(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => vec!["https://api.mainnet-beta.solana.com".into()],
    }
}

fn default_ws_endpoints() -> Vec<String> {
    vec![]
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_commitment() -> String {
    "confirmed".into()
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_program_id() -> String {
    PUMP_PROGRAM_ID_STR.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_signature_limit() -> usize {
    25
}

fn default_dedup_capacity() -> usize {
    100
}

fn default_account_cooldown_secs() -> u64 {
    60
}

fn default_account_batch_size() -> usize {
    5
}

fn default_inter_call_delay_ms() -> u64 {
    250
}

fn default_restart_initial_delay_ms() -> u64 {
    1000
}

fn default_restart_max_delay_secs() -> u64 {
    60
}

fn default_create_log_markers() -> Vec<String> {
    vec!["Instruction: Create".into()]
}

fn default_tick_secs() -> u64 {
    5
}

fn default_tiers() -> Vec<ProfitTier> {
    vec![
        ProfitTier::new(1.3, 15.0),
        ProfitTier::new(2.0, 50.0),
        ProfitTier::new(3.0, 65.0),
        ProfitTier::new(4.0, 80.0),
        ProfitTier::new(8.0, 85.0),
    ]
}

fn default_buy_amount_sol() -> f64 {
    0.1
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_quote_url() -> String {
    "https://quote-api.jup.ag/v6/quote".into()
}

fn default_swap_url() -> String {
    "https://quote-api.jup.ag/v6/swap".into()
}

fn default_price_url() -> String {
    "https://api.jup.ag/price/v2".into()
}

fn default_token_decimals() -> u8 {
    6
}

fn default_max_symbol_len() -> usize {
    10
}

fn default_event_interval_secs() -> u64 {
    30
}

fn default_initial_price() -> f64 {
    0.0001
}

fn default_drift() -> f64 {
    0.02
}

fn default_volatility() -> f64 {
    0.08
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rpc.http_endpoint_list().is_empty() {
            anyhow::bail!("At least one HTTP RPC endpoint is required");
        }

        self.rpc.commitment()?;

        // Validate trading amounts
        if self.trading.buy_amount_sol <= 0.0 {
            anyhow::bail!("buy_amount_sol must be positive");
        }

        if self.trading.slippage_bps > 10000 {
            anyhow::bail!("slippage_bps cannot exceed 10000 (100%)");
        }

        for (class, settings) in self.retry.all() {
            if settings.backoff_factor < 1.0 {
                anyhow::bail!("retry.{}.backoff_factor must be >= 1.0", class);
            }
        }

        if self.discovery.poll_interval_secs == 0 || self.monitor.tick_secs == 0 {
            anyhow::bail!("poll_interval_secs and tick_secs must be positive");
        }

        if self.discovery.dedup_capacity == 0 {
            anyhow::bail!("dedup_capacity must be positive");
        }

        self.discovery
            .program_id
            .parse::<solana_sdk::pubkey::Pubkey>()
            .with_context(|| format!("Invalid program_id: {}", self.discovery.program_id))?;

        self.monitor
            .profit_tiers()
            .context("Invalid monitor.tiers")?;

        // Validate filter patterns (compile regex to check)
        for pattern in &self.filters.blocked_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid blocked_pattern regex: {}", pattern))?;
        }

        if self.simulation.enabled && self.simulation.initial_price <= 0.0 {
            anyhow::bail!("simulation.initial_price must be positive");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let http: Vec<String> = self
            .rpc
            .http_endpoint_list()
            .iter()
            .map(|u| mask_url(u))
            .collect();
        let ws: Vec<String> = self
            .rpc
            .ws_endpoint_list()
            .iter()
            .map(|u| mask_url(u))
            .collect();
        let tiers: Vec<String> = self
            .monitor
            .tiers
            .iter()
            .map(|t| format!("{}x->{}%", t.multiplier, t.sell_pct))
            .collect();

        format!(
            r#"Configuration:
  RPC:
    http: {:?}
    ws: {:?}
    timeout: {}ms
    commitment: {}
  Retry (default):
    max_retries: {}
    initial_delay: {}ms
    backoff_factor: {}
  Discovery:
    program_id: {}
    poll_interval: {}s
    signature_limit: {}
    dedup_capacity: {}
  Monitor:
    tick: {}s
    tiers: [{}]
  Trading:
    buy_amount: {} SOL
    slippage: {}bps
  Filters:
    enabled: {}
    max_symbol_len: {}
  Simulation:
    enabled: {}
"#,
            http,
            ws,
            self.rpc.timeout_ms,
            self.rpc.commitment,
            self.retry.default.max_retries,
            self.retry.default.initial_delay_ms,
            self.retry.default.backoff_factor,
            self.discovery.program_id,
            self.discovery.poll_interval_secs,
            self.discovery.signature_limit,
            self.discovery.dedup_capacity,
            self.monitor.tick_secs,
            tiers.join(", "),
            self.trading.buy_amount_sol,
            self.trading.slippage_bps,
            self.filters.enabled,
            self.filters.max_symbol_len,
            self.simulation.enabled,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
pub fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            retry: RetryConfig::default(),
            discovery: DiscoveryConfig::default(),
            monitor: MonitorConfig::default(),
            trading: TradingConfig::default(),
            filters: FilterConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.filters.enabled);
        assert_eq!(config.retry.default.max_retries, 5);
        assert_eq!(config.retry.default.initial_delay_ms, 500);
        assert_eq!(config.discovery.poll_interval_secs, 10);
        assert_eq!(config.discovery.dedup_capacity, 100);
        assert_eq!(config.monitor.tick_secs, 5);
        assert_eq!(config.monitor.tiers.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_premium_endpoint_first() {
        let rpc = RpcConfig {
            premium_endpoint: Some("https://premium.example.com?api-key=x".into()),
            http_endpoints: vec![
                "https://a.example.com".into(),
                "https://premium.example.com?api-key=x".into(),
            ],
            ws_endpoints: vec![],
            timeout_ms: 1000,
            commitment: "processed".into(),
        };

        let list = rpc.http_endpoint_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], "https://premium.example.com?api-key=x");

        let ws = rpc.ws_endpoint_list();
        assert_eq!(ws[1], "wss://a.example.com");
    }

    #[test]
    fn test_per_class_retry_fallback() {
        let mut retry = RetryConfig::default();
        retry.price = Some(RetrySettings {
            max_retries: 1,
            initial_delay_ms: 100,
            backoff_factor: 1.5,
        });

        assert_eq!(retry.price().max_retries, 1);
        assert_eq!(retry.trade().max_retries, 5);

        let opts = retry.price().options("getPrice");
        assert_eq!(opts.initial_delay, Duration::from_millis(100));
        assert_eq!(opts.description, "getPrice");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.rpc.http_endpoints = vec![" ".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.tiers = vec![ProfitTier::new(2.0, 50.0), ProfitTier::new(1.5, 60.0)];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.default.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rpc.commitment = "eventually".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.filters.blocked_patterns = vec!["(unclosed".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[rpc]
http_endpoints = ["https://one.example.com", "https://two.example.com"]

[retry.price]
max_retries = 2

[monitor]
tick_secs = 3
tiers = [{{ multiplier = 1.3, sell_pct = 15.0 }}, {{ multiplier = 2.0, sell_pct = 50.0 }}]
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.rpc.http_endpoints.len(), 2);
        assert_eq!(config.retry.price().max_retries, 2);
        assert_eq!(config.retry.price().initial_delay_ms, 500);
        assert_eq!(config.monitor.tick_secs, 3);
        assert_eq!(config.monitor.profit_tiers().unwrap().max_cumulative_pct(), 50.0);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }
}
