//! Endpoint pool
//!
//! Hands out RPC endpoints round-robin per kind, skipping endpoints that
//! recently failed. The pool never deadlocks: when every endpoint of a
//! kind is flagged, the flags for that kind are cleared and selection
//! starts over.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Endpoint transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Http,
    Stream,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Http => write!(f, "http"),
            EndpointKind::Stream => write!(f, "stream"),
        }
    }
}

#[derive(Debug, Default)]
struct KindState {
    endpoints: Vec<String>,
    cursor: usize,
    /// Failed endpoints, oldest failure first
    failed: Vec<String>,
    /// Set when a failure burst covered the whole list
    reset_pending: bool,
}

impl KindState {
    fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    fn all_failed(&self) -> bool {
        self.endpoints.iter().all(|e| self.failed.contains(e))
    }
}

/// Rotating endpoint pool shared by every network caller
#[derive(Debug)]
pub struct EndpointPool {
    kinds: Mutex<HashMap<EndpointKind, KindState>>,
}

impl EndpointPool {
    /// Create a pool from HTTP and streaming endpoint lists
    pub fn new(http: Vec<String>, stream: Vec<String>) -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(EndpointKind::Http, KindState::new(http));
        kinds.insert(EndpointKind::Stream, KindState::new(stream));

        Self {
            kinds: Mutex::new(kinds),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EndpointKind, KindState>> {
        self.kinds.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next usable endpoint of `kind`, advancing that kind's cursor
    pub fn next_endpoint(&self, kind: EndpointKind) -> Result<String> {
        let mut kinds = self.lock();
        let state = kinds
            .get_mut(&kind)
            .ok_or_else(|| Error::NoEndpoints(kind.to_string()))?;

        if state.endpoints.is_empty() {
            return Err(Error::NoEndpoints(kind.to_string()));
        }

        if state.reset_pending || state.all_failed() {
            warn!(
                kind = %kind,
                failed = state.failed.len(),
                "All endpoints flagged, resetting failed set"
            );
            state.failed.clear();
            state.reset_pending = false;
        }

        let len = state.endpoints.len();
        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            let candidate = &state.endpoints[idx];
            if !state.failed.contains(candidate) {
                state.cursor = (idx + 1) % len;
                return Ok(candidate.clone());
            }
        }

        // Unreachable after the reset above
        Err(Error::NoEndpoints(kind.to_string()))
    }

    /// Flag an endpoint as failed.
    ///
    /// If that would leave no usable endpoint of its kind, only the most
    /// recent failure is kept and the next selection starts from a clean set.
    pub fn mark_failed(&self, url: &str) {
        let mut kinds = self.lock();

        let Some((kind, state)) = kinds
            .iter_mut()
            .find(|(_, s)| s.endpoints.iter().any(|e| e == url))
        else {
            debug!(endpoint = %url, "mark_failed for unknown endpoint ignored");
            return;
        };

        state.failed.retain(|e| e != url);
        state.failed.push(url.to_string());

        if state.failed.len() >= state.endpoints.len() {
            state.failed = vec![url.to_string()];
            state.reset_pending = true;
        }

        warn!(
            kind = %kind,
            endpoint = %url,
            failed = state.failed.len(),
            total = state.endpoints.len(),
            "Endpoint marked failed"
        );
    }

    /// Is this endpoint currently flagged?
    pub fn is_failed(&self, url: &str) -> bool {
        self.lock().values().any(|s| s.failed.iter().any(|e| e == url))
    }

    /// Number of flagged endpoints of `kind`
    pub fn failed_count(&self, kind: EndpointKind) -> usize {
        self.lock().get(&kind).map(|s| s.failed.len()).unwrap_or(0)
    }

    /// All endpoints of `kind` in configured order
    pub fn endpoints(&self, kind: EndpointKind) -> Vec<String> {
        self.lock()
            .get(&kind)
            .map(|s| s.endpoints.clone())
            .unwrap_or_default()
    }
}
