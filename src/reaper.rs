use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::Ms;

/// How often the compactor checks the append counter.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Expire waitlist entries whose start has passed.
pub async fn expire_once(engine: &Engine, now: Ms) -> usize {
    match engine.expire_waitlist(now).await {
        Ok(0) => 0,
        Ok(n) => {
            info!(company_id = %engine.company_id, expired = n, "expired waitlist entries");
            n
        }
        Err(e) => {
            // Retried on the next tick.
            warn!(company_id = %engine.company_id, "waitlist expiry failed: {e}");
            0
        }
    }
}

/// Background task that periodically expires stale waitlist entries.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        expire_once(&engine, crate::engine::now_ms()).await;
    }
}

/// Compact the WAL if at least `threshold` events were appended since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(company_id = %engine.company_id, appends, "compaction skipped");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(company_id = %engine.company_id, appends, "compacted WAL");
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!(company_id = %engine.company_id, "WAL compaction failed: {e}");
        }
    }
}
