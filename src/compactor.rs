use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::LedgerStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends have piled up.
pub async fn run_compactor(store: Arc<LedgerStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns the number of records written, or None when nothing was done.
pub async fn compact_if_needed(store: &LedgerStore, threshold: u64) -> Option<usize> {
    let pending = store.appends_since_compact().await;
    if pending < threshold.max(1) {
        return None;
    }
    match store.compact().await {
        Ok(records) => {
            info!("compacted WAL: {pending} appends folded into {records} records");
            Some(records)
        }
        Err(e) => {
            tracing::warn!("compaction failed: {e}");
            None
        }
    }
}
