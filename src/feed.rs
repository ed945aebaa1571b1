//! External busy-interval source (a synced calendar, an upstream system).
//!
//! The engine only needs `{start, end}` pairs. Fetches are time-bounded and fail
//! open: an error or timeout is logged, counted and treated as "no extra busy
//! intervals" so availability never depends on the feed being up.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;
use ulid::Ulid;

use crate::engine::busy::ExternalBusy;
use crate::model::*;
use crate::observability;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("external feed unavailable: {0}")]
    Unavailable(String),
    #[error("external feed timed out")]
    Timeout,
}

#[async_trait]
pub trait BusyFeed: Send + Sync {
    /// Busy spans in `range`. `professional_id: None` asks for company-wide entries.
    async fn busy_intervals(
        &self,
        company_id: Ulid,
        professional_id: Option<Ulid>,
        range: Span,
    ) -> Result<Vec<Span>, FeedError>;
}

/// A company with no external calendar.
pub struct NoExternalFeed;

#[async_trait]
impl BusyFeed for NoExternalFeed {
    async fn busy_intervals(
        &self,
        _company_id: Ulid,
        _professional_id: Option<Ulid>,
        _range: Span,
    ) -> Result<Vec<Span>, FeedError> {
        Ok(Vec::new())
    }
}

async fn fetch_one(
    feed: &dyn BusyFeed,
    company_id: Ulid,
    professional_id: Option<Ulid>,
    range: Span,
    timeout: Duration,
) -> ExternalBusy {
    let result = match tokio::time::timeout(timeout, feed.busy_intervals(company_id, professional_id, range)).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout),
    };
    let spans = match result {
        Ok(spans) => spans
            .into_iter()
            .filter(|s| s.start < s.end && s.overlaps(&range))
            .collect(),
        Err(e) => {
            let kind = match &e {
                FeedError::Timeout => "timeout",
                FeedError::Unavailable(_) => "error",
            };
            warn!(%company_id, ?professional_id, "external busy feed failed, continuing without it: {e}");
            metrics::counter!(observability::FEED_FAILURES_TOTAL, "kind" => kind).increment(1);
            Vec::new()
        }
    };
    ExternalBusy {
        professional_id,
        spans,
    }
}

/// Fetch company-wide entries plus one list per professional owner, concurrently.
pub async fn fetch_fail_open(
    feed: &dyn BusyFeed,
    company_id: Ulid,
    owners: &[Owner],
    range: Span,
    timeout: Duration,
) -> Vec<ExternalBusy> {
    let mut targets = vec![None];
    targets.extend(owners.iter().filter_map(Owner::professional_id).map(Some));
    targets.dedup();
    futures::future::join_all(
        targets
            .into_iter()
            .map(|professional_id| fetch_one(feed, company_id, professional_id, range, timeout)),
    )
    .await
}
