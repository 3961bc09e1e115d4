use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::repository::WalRepository;

const COMPACT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends have piled up
/// since the last compaction.
pub async fn run_compactor(repo: Arc<WalRepository>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&repo, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
async fn compact_if_due(repo: &WalRepository, threshold: u64) -> bool {
    let appends = repo.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match repo.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}
