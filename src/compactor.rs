use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::observability;
use crate::store::InMemoryStore;

/// Background task that compacts the store journal once enough writes
/// have piled up since the last compaction.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns whether a compaction ran and succeeded.
pub async fn compact_if_due(store: &InMemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends == 0 || appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
            info!(appends, "journal compacted");
            true
        }
        Err(e) => {
            tracing::warn!("journal compaction failed: {e}");
            false
        }
    }
}
