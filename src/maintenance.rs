use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::calendar::now_ms;
use crate::engine::Engine;

/// Background task that marks appointments as completed once they are over.
pub async fn run_completer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        complete_finished(&engine).await;
    }
}

/// One completer pass. Returns how many appointments were flipped.
pub async fn complete_finished(engine: &Engine) -> usize {
    let mut completed = 0;
    for id in engine.collect_finished_appointments(now_ms()) {
        match engine.complete(id).await {
            Ok(_) => completed += 1,
            // Cancelled or removed since it was collected.
            Err(e) => debug!("completer skip {id}: {e}"),
        }
    }
    if completed > 0 {
        info!("marked {completed} past appointments completed");
    }
    completed
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted WAL after {appends} appends");
            }
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
