pub mod burst;
pub mod dedup;
pub mod gate;

pub use burst::{BurstAggregator, EnqueueOutcome, join_batch};
pub use dedup::{DedupCache, DeduplicationCache};
pub use gate::{CustomerGate, GatePermit};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::functions::pipeline::InboundItem;

/// Process-wide coordination state: dedup cache, burst buffers and the
/// per-customer gate. Created once at startup, swept by one loop, dropped at
/// shutdown. All access goes through the component contracts; nothing else
/// reaches into the maps.
pub struct Coordinator {
    pub dedup: Arc<DeduplicationCache>,
    pub burst: BurstAggregator<InboundItem>,
    pub gate: Arc<CustomerGate>,
    sweep_interval: Duration,
}

impl Coordinator {
    pub fn new(
        dedup_ttl: Duration,
        burst_window: Duration,
        gate_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            dedup: Arc::new(DeduplicationCache::new(dedup_ttl)),
            burst: BurstAggregator::new(burst_window),
            gate: Arc::new(CustomerGate::new(gate_timeout)),
            sweep_interval,
        }
    }

    /// Periodic cleanup loop. Keeps the in-memory maps bounded; runs until
    /// the shutdown signal flips.
    pub async fn run_sweeper(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.sweep_interval) => {
                    let expired = self.dedup.sweep(Instant::now());
                    let stale_locks = self.gate.sweep();
                    if expired > 0 || stale_locks > 0 {
                        tracing::debug!(expired, stale_locks, "coordination sweep");
                    }
                }
            }
        }
    }
}
