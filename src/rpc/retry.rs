//! Retry policy for network calls
//!
//! Every network call goes through [`RetryPolicy`]. Transient failures
//! (rate limiting, gateway errors, timeouts, disabled methods) are retried
//! with exponential backoff up to a per-call budget; anything else is
//! returned to the caller on the first attempt.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::pool::{EndpointKind, EndpointPool};
use crate::error::{Error, Result};

/// Upper bound on a single backoff sleep
const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(600);

/// Per-call retry options
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    /// Operation name for logs and the exhausted error
    pub description: String,
    /// Endpoint to flag in the pool when a retryable failure occurs
    pub failure_endpoint: Option<String>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            description: "rpc call".to_string(),
            failure_endpoint: None,
        }
    }
}

impl RetryOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_failure_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.failure_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(self.backoff_factor)
            .with_randomization_factor(0.0)
            .with_max_interval(MAX_BACKOFF_DELAY)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delays slept before each retry, in order
    pub fn delay_schedule(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (0..self.max_retries)
            .map(|_| backoff.next_backoff().unwrap_or(MAX_BACKOFF_DELAY))
            .collect()
    }
}

/// Wraps network calls with classification, backoff and endpoint feedback
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pool: Arc<EndpointPool>,
}

impl RetryPolicy {
    pub fn new(pool: Arc<EndpointPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Run `operation` under the retry budget in `options`.
    ///
    /// On a retryable failure the configured failure endpoint (if any) is
    /// reported to the pool before sleeping.
    pub async fn guard<T, F, Fut>(&self, options: RetryOptions, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(options, None, |_| operation()).await
    }

    /// Like [`guard`](Self::guard), but each attempt runs against the next
    /// endpoint of `kind`, and that endpoint is the one flagged on failure.
    pub async fn guard_rotating<T, F, Fut>(
        &self,
        kind: EndpointKind,
        options: RetryOptions,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(options, Some(kind), |endpoint| {
            operation(endpoint.unwrap_or_default())
        })
        .await
    }

    async fn run<T, F, Fut>(
        &self,
        options: RetryOptions,
        rotate: Option<EndpointKind>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = options.backoff();
        let mut retries_left = options.max_retries;
        let mut attempts: u32 = 0;

        loop {
            let endpoint = match rotate {
                Some(kind) => Some(self.pool.next_endpoint(kind)?),
                None => options.failure_endpoint.clone(),
            };
            attempts += 1;

            let err = match operation(endpoint.clone()).await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(
                            operation = %options.description,
                            attempts,
                            "Recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                debug!(
                    operation = %options.description,
                    error = %err,
                    "Non-retryable failure"
                );
                return Err(err);
            }

            if retries_left == 0 {
                error!(
                    operation = %options.description,
                    attempts,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(Error::RetryExhausted {
                    operation: options.description.clone(),
                    attempts,
                    source: Box::new(err),
                });
            }

            if let Some(url) = endpoint.as_deref() {
                self.pool.mark_failed(url);
            }

            let delay = backoff.next_backoff().unwrap_or(MAX_BACKOFF_DELAY);
            warn!(
                operation = %options.description,
                attempt = attempts,
                retries_left,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, backing off"
            );

            tokio::time::sleep(delay).await;
            retries_left -= 1;
        }
    }
}
