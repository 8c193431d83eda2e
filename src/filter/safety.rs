//! Name and symbol screening
//!
//! A stateless predicate over a creation event. Rejects names or symbols
//! carrying common scam keywords, matching a configured block pattern, or
//! with an implausibly long symbol.

use regex::Regex;
use tracing::debug;

use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::pump::CreationEvent;

/// Keywords that reject a token when found in its name or symbol
const SCAM_KEYWORDS: &[&str] = &[
    "scam",
    "rug",
    "fake",
    "honeypot",
    "honey pot",
    "ponzi",
    "presale",
    "pre-sale",
    "ico",
    "guaranteed",
    "100x",
    "1000x",
];

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum FilterReason {
    /// Name or symbol contains a scam keyword
    Keyword(String),
    /// Name or symbol matches a configured block pattern
    BlockedPattern(String),
    /// Symbol longer than the configured maximum
    SymbolTooLong(usize),
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::Keyword(keyword) => write!(f, "contains keyword '{}'", keyword),
            FilterReason::BlockedPattern(pattern) => {
                write!(f, "matches blocked pattern: {}", pattern)
            }
            FilterReason::SymbolTooLong(len) => write!(f, "symbol length {} too long", len),
        }
    }
}

/// Filter verdict
#[derive(Debug, Clone, PartialEq)]
pub enum FilterResult {
    Pass,
    Filtered(FilterReason),
}

impl FilterResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, FilterResult::Filtered(_))
    }
}

/// Side-effect-free safety predicate
pub trait SafetyFilter: Send + Sync {
    fn check(&self, event: &CreationEvent) -> FilterResult;

    fn is_safe(&self, event: &CreationEvent) -> bool {
        self.check(event).is_pass()
    }
}

/// Keyword, pattern and symbol-length filter
pub struct KeywordSafetyFilter {
    enabled: bool,
    blocked_patterns: Vec<Regex>,
    max_symbol_len: usize,
}

impl KeywordSafetyFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let blocked_patterns = config
            .blocked_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidRegex(e.to_string()))?;

        Ok(Self {
            enabled: config.enabled,
            blocked_patterns,
            max_symbol_len: config.max_symbol_len,
        })
    }
}

impl SafetyFilter for KeywordSafetyFilter {
    fn check(&self, event: &CreationEvent) -> FilterResult {
        if !self.enabled {
            return FilterResult::Pass;
        }

        let name = event.name.to_lowercase();
        let symbol = event.symbol.to_lowercase();

        if let Some(keyword) = SCAM_KEYWORDS
            .iter()
            .find(|k| name.contains(*k) || symbol.contains(*k))
        {
            debug!(
                asset = %event.asset_id,
                "Token {} ({}) contains keyword {}",
                event.name, event.symbol, keyword
            );
            return FilterResult::Filtered(FilterReason::Keyword(keyword.to_string()));
        }

        for pattern in &self.blocked_patterns {
            if pattern.is_match(&event.name) || pattern.is_match(&event.symbol) {
                debug!(
                    asset = %event.asset_id,
                    "Token {} ({}) blocked by pattern: {}",
                    event.name, event.symbol, pattern
                );
                return FilterResult::Filtered(FilterReason::BlockedPattern(pattern.to_string()));
            }
        }

        let symbol_len = event.symbol.chars().count();
        if symbol_len > self.max_symbol_len {
            return FilterResult::Filtered(FilterReason::SymbolTooLong(symbol_len));
        }

        FilterResult::Pass
    }
}
