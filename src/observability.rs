use std::net::SocketAddr;

use crate::engine::CommitOutcome;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: availability listings served.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "slotwise_availability_queries_total";

/// Histogram: availability listing latency in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "slotwise_availability_duration_seconds";

/// Counter: booking commit attempts. Labels: outcome.
pub const COMMITS_TOTAL: &str = "slotwise_commits_total";

/// Counter: external busy-feed failures. Labels: kind (error, timeout).
pub const FEED_FAILURES_TOTAL: &str = "slotwise_feed_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of loaded companies.
pub const TENANTS_ACTIVE: &str = "slotwise_tenants_active";

/// Counter: waitlist entries expired by the reaper.
pub const WAITLIST_EXPIRED_TOTAL: &str = "slotwise_waitlist_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a commit outcome.
pub fn outcome_label(outcome: &CommitOutcome) -> &'static str {
    match outcome {
        CommitOutcome::Committed { .. } => "committed",
        CommitOutcome::WaitlistOffered { .. } => "waitlist_offered",
        CommitOutcome::Rejected { .. } => "rejected",
        CommitOutcome::NeedsConfirmation { .. } => "needs_confirmation",
    }
}
