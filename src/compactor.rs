use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::WalStore;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact when more than `threshold` events were appended since the last
/// compaction. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends <= threshold {
        debug!("compactor idle: {appends} appends since last compaction");
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the event log short.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}
