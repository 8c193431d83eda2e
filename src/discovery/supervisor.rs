//! Supervises the discovery scanner
//!
//! Successful cycles are spaced by the poll interval. A failed cycle is
//! restarted from the tip fetch after an exponential backoff, capped at
//! `restart_max_delay_secs` and reset by the next successful cycle. The
//! scanner, with its dedup cache and last tip, is kept across restarts.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::scanner::Scanner;
use crate::config::Config;

pub struct DiscoverySupervisor {
    scanner: Scanner,
    poll_interval: Duration,
    restart_initial_delay: Duration,
    restart_max_delay: Duration,
}

impl DiscoverySupervisor {
    pub fn new(config: &Config, scanner: Scanner) -> Self {
        Self {
            scanner,
            poll_interval: config.discovery.poll_interval(),
            restart_initial_delay: Duration::from_millis(
                config.discovery.restart_initial_delay_ms,
            ),
            restart_max_delay: Duration::from_secs(config.discovery.restart_max_delay_secs),
        }
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    fn restart_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.restart_initial_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.restart_max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run cycles until `shutdown` is cancelled. A cycle in progress
    /// always completes.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "Discovery started"
        );

        let mut backoff = self.restart_backoff();
        let mut consecutive_failures: u32 = 0;

        while !shutdown.is_cancelled() {
            let delay = match self.scanner.cycle().await {
                Ok(report) => {
                    if consecutive_failures > 0 {
                        info!(
                            failures = consecutive_failures,
                            "Discovery recovered"
                        );
                        consecutive_failures = 0;
                        backoff.reset();
                    }
                    debug!(
                        tip = report.tip,
                        listed = report.listed,
                        fetched = report.fetched,
                        events = report.events,
                        unavailable = report.unavailable,
                        pending = report.pending,
                        fallback = report.fallback,
                        "Discovery cycle complete"
                    );
                    self.poll_interval
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.restart_max_delay);
                    error!(
                        error = %e,
                        failures = consecutive_failures,
                        restart_in_ms = delay.as_millis() as u64,
                        "Discovery cycle failed, restarting"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Discovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::EventSink;
    use crate::error::{Error, Result};
    use crate::pump::CreationEvent;
    use crate::rpc::{
        ChainSource, EndpointPool, RetryPolicy, SignatureInfo, TransactionDetail,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Tip fetches follow a script of outcomes, failing once it runs out
    #[derive(Default)]
    struct ScriptedTip {
        outcomes: Mutex<VecDeque<bool>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTip {
        fn with_script(outcomes: &[bool]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn gaps(&self) -> Vec<u64> {
            let calls = self.calls.lock().unwrap();
            calls
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl ChainSource for ScriptedTip {
        async fn tip_slot(&self, _endpoint: &str) -> Result<u64> {
            self.calls.lock().unwrap().push(Instant::now());
            match self.outcomes.lock().unwrap().pop_front() {
                Some(true) => Ok(100),
                _ => Err(Error::Rpc("node unhealthy".into())),
            }
        }

        async fn recent_signatures(
            &self,
            _endpoint: &str,
            _address: &str,
            _limit: usize,
        ) -> Result<Vec<SignatureInfo>> {
            Ok(vec![])
        }

        async fn program_accounts(&self, _endpoint: &str, _program_id: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn transaction(
            &self,
            _endpoint: &str,
            _signature: &str,
        ) -> Result<Option<TransactionDetail>> {
            Ok(None)
        }
    }

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn on_event(&self, _event: CreationEvent) {}
    }

    fn supervisor(chain: Arc<ScriptedTip>) -> DiscoverySupervisor {
        let mut config = Config::default();
        config.retry.default.max_retries = 0;
        config.discovery.poll_interval_secs = 10;
        config.discovery.restart_initial_delay_ms = 1000;
        config.discovery.restart_max_delay_secs = 60;

        let pool = Arc::new(EndpointPool::new(vec!["http://a".into()], vec![]));
        let scanner = Scanner::new(
            &config,
            chain,
            RetryPolicy::new(pool),
            Arc::new(NullSink),
        );
        DiscoverySupervisor::new(&config, scanner)
    }

    fn cancel_after(secs: u64) -> CancellationToken {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            canceller.cancel();
        });
        token
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_backoff_grows_and_caps() {
        let chain = Arc::new(ScriptedTip::default());
        let mut supervisor = supervisor(chain.clone());

        supervisor.run(cancel_after(250)).await;

        let gaps = chain.gaps();
        assert_eq!(&gaps[..9], &[1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let chain = Arc::new(ScriptedTip::with_script(&[false, false, false, true]));
        let mut supervisor = supervisor(chain.clone());

        supervisor.run(cancel_after(21)).await;

        // fail, fail, fail, baseline, then failing again from a fresh backoff
        assert_eq!(chain.gaps(), vec![1, 2, 4, 10, 1, 2]);
        assert_eq!(supervisor.scanner().last_tip(), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let chain = Arc::new(ScriptedTip::default());
        let mut supervisor = supervisor(chain.clone());
        let token = CancellationToken::new();
        token.cancel();

        supervisor.run(token).await;
        assert!(chain.calls.lock().unwrap().is_empty());
    }
}
