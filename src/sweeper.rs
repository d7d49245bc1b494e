use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background maintenance for one tenant: drops idle lock queues and
/// compacts the WAL once it has grown past `compact_threshold` appends.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, compact_threshold: u64) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        sweep(&engine, compact_threshold).await;
    }
}

/// One maintenance pass. Returns whether the WAL was compacted.
pub async fn sweep(engine: &Engine, compact_threshold: u64) -> bool {
    let (queues, keys) = engine.prune_idle();
    if queues + keys > 0 {
        debug!("pruned {queues} idle lock queues and {keys} idempotency locks");
    }
    match engine.compact_if_needed(compact_threshold).await {
        Ok(compacted) => compacted,
        Err(e) => {
            warn!("compaction failed, will retry next sweep: {e}");
            false
        }
    }
}

/// Spawn the sweeper for `engine` on the current runtime.
pub fn spawn(engine: Arc<Engine>, every: Duration, compact_threshold: u64) {
    info!("sweeping every {}ms, compacting past {compact_threshold} appends", every.as_millis());
    tokio::spawn(run_sweeper(engine, every, compact_threshold));
}
