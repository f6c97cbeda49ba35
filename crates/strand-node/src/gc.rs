//! TTL-based garbage collection
//!
//! A committed object stays retrievable for its configured lifetime; after
//! that the collector removes fragments, the pinned checksum, all gossip
//! evidence, and the metadata record in one pass per object. Failures are
//! per-object and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::protocol::DispersalProtocol;

/// Periodic eviction task; ticks every `ttl / 2`
pub struct GarbageCollector {
    protocol: Arc<DispersalProtocol>,
    ttl: Duration,
}

impl GarbageCollector {
    pub fn new(protocol: Arc<DispersalProtocol>, ttl: Duration) -> Self {
        Self { protocol, ttl }
    }

    /// Run forever; the node aborts this task on shutdown
    pub async fn run(self) {
        let period = (self.ttl / 2).max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a freshly restarted
        // node does not sweep before serving.
        interval.tick().await;

        loop {
            interval.tick().await;
            match self.protocol.sweep_expired(self.ttl) {
                Ok(0) => {}
                Ok(evicted) => tracing::info!("garbage collector evicted {} objects", evicted),
                Err(e) => tracing::warn!("garbage collection sweep failed: {}", e),
            }
        }
    }
}
