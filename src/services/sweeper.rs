use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::services::store::JobStore;
use crate::telemetry;

/// Periodically evict finished jobs older than `ttl`.
pub fn spawn_sweeper(store: Arc<JobStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.evict_expired(ttl, Utc::now());
            if evicted > 0 {
                telemetry::record_evicted(evicted);
                tracing::info!(evicted, remaining = store.len(), "Evicted expired jobs");
            }
        }
    })
}
