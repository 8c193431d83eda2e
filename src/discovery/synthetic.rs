//! Synthetic creation events for simulation mode

use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::EventSink;
use crate::config::SimulationConfig;
use crate::pump::CreationEvent;

/// Emits a fresh token every `event_interval_secs`
pub struct SyntheticDiscovery {
    sink: Arc<dyn EventSink>,
    interval: Duration,
    emitted: u64,
}

impl SyntheticDiscovery {
    pub fn new(config: &SimulationConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            interval: Duration::from_secs(config.event_interval_secs.max(1)),
            emitted: 0,
        }
    }

    pub fn next_event(&mut self) -> CreationEvent {
        self.emitted += 1;
        let n = self.emitted;
        CreationEvent {
            asset_id: Keypair::new().pubkey().to_string(),
            name: format!("Synthetic {}", n),
            symbol: format!("SYN{}", n),
            source_signature: format!("sim-{}", uuid::Uuid::new_v4()),
            slot: n,
        }
    }

    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "[SIM] Synthetic discovery started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let event = self.next_event();
            info!(
                asset = %event.asset_id,
                name = %event.name,
                symbol = %event.symbol,
                "[SIM] Creation event"
            );
            self.sink.on_event(event).await;
        }

        info!("[SIM] Synthetic discovery stopped");
    }
}
