pub mod busy;
pub mod conflict;
mod error;
pub mod interval;
mod mutations;
mod queries;
pub mod recurrence;
pub mod schedule;
pub mod slots;
pub mod store;

pub use error::EngineError;
pub use mutations::{BookingRequest, CommitOutcome, ConflictReason, ExceptionRequest, WaitlistRequest};
pub use queries::{Availability, AvailabilityQuery};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::feed::{BusyFeed, NoExternalFeed};
use crate::model::*;
use crate::notify::{Change, NotifyHub};
use crate::wal::{Replay, Wal};

use store::CompanyState;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak into
    // the next batch; callers of this batch are told it failed.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Per-company knobs the engine does not persist.
#[derive(Clone)]
pub struct EngineOptions {
    pub feed: Arc<dyn BusyFeed>,
    pub feed_timeout: Duration,
    /// Settings a company starts with before any are written.
    pub defaults: CompanySettings,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            feed: Arc::new(NoExternalFeed),
            feed_timeout: Duration::from_millis(2000),
            defaults: CompanySettings::default(),
        }
    }
}

/// Write guard on a company's tables that can outlive the request holding it.
pub(super) type StateGuard = OwnedRwLockWriteGuard<CompanyState>;

/// The availability and booking engine of one company.
pub struct Engine {
    pub company_id: Ulid,
    pub(super) state: Arc<RwLock<CompanyState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) options: EngineOptions,
}

impl Engine {
    /// Open the company's WAL, replay it and start its writer task. Must run
    /// inside a Tokio runtime.
    pub fn new(
        company_id: Ulid,
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let (wal, replay) = Wal::open(&wal_path)?;
        Ok(Self::from_wal(company_id, wal, replay, notify, options))
    }

    /// Build the engine from a WAL that was already opened and read.
    pub fn from_wal(
        company_id: Ulid,
        wal: Wal,
        replay: Replay,
        notify: Arc<NotifyHub>,
        options: EngineOptions,
    ) -> Self {
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = CompanyState::new(company_id, options.defaults.clone());
        for event in &replay.events {
            state.apply_event(event);
        }
        tracing::debug!(%company_id, events = replay.events.len(), "replayed WAL");

        Self {
            company_id,
            state: Arc::new(RwLock::new(state)),
            wal_tx,
            notify,
            options,
        }
    }

    pub(super) async fn write_state(&self) -> StateGuard {
        self.state.clone().write_owned().await
    }

    /// WAL-append, apply and notify on a task of its own that owns the write
    /// guard. Once started it runs to completion even if the caller is dropped,
    /// so memory never lags behind the log. Hands the guard back on success.
    pub(super) async fn persist_and_apply(&self, mut state: StateGuard, event: Event) -> Result<StateGuard, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            let vacated = vacated_span(&state, &event);
            state.apply_event(&event);
            for change in changes_for(&state, &event, vacated) {
                notify.publish(change);
            }
            Ok::<_, EngineError>(state)
        });
        task.await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// The span a booking occupied before `event` moves or cancels it.
fn vacated_span(state: &CompanyState, event: &Event) -> Option<Span> {
    match event {
        Event::BookingStatusChanged { id, .. } | Event::BookingRescheduled { id, .. } => {
            state.booking(id).map(|b| b.span)
        }
        _ => None,
    }
}

/// Subscriber-facing changes for an event that was just applied.
fn changes_for(state: &CompanyState, event: &Event, vacated: Option<Span>) -> Vec<Change> {
    match event {
        Event::BookingsCommitted { bookings } => bookings
            .iter()
            .map(|b| Change::SlotsChanged {
                service_id: b.service_id,
                span: b.span,
            })
            .collect(),
        Event::BookingStatusChanged { id, .. } | Event::BookingRescheduled { id, .. } => {
            let Some(booking) = state.booking(id) else {
                return Vec::new();
            };
            let mut spans = vec![booking.span];
            spans.extend(vacated.filter(|s| *s != booking.span));
            let mut changes: Vec<Change> = spans
                .into_iter()
                .map(|span| Change::SlotsChanged {
                    service_id: booking.service_id,
                    span,
                })
                .collect();
            if let Event::BookingStatusChanged { notified_waitlist, .. } = event {
                changes.extend(waitlist_changes(state, notified_waitlist));
            }
            changes
        }
        Event::WaitlistAdded { entry } => vec![waitlist_change(entry)],
        Event::WaitlistStatusChanged { id, .. } => waitlist_changes(state, std::slice::from_ref(id)),
        Event::WaitlistPromoted { entry_id, bookings } => {
            let mut changes = waitlist_changes(state, std::slice::from_ref(entry_id));
            changes.extend(bookings.iter().map(|b| Change::SlotsChanged {
                service_id: b.service_id,
                span: b.span,
            }));
            changes
        }
        Event::ServiceUpserted { service } => vec![Change::ServiceUpdated { service_id: service.id }],
        Event::ServiceRemoved { id } => vec![Change::ServiceRemoved { service_id: *id }],
        _ => Vec::new(),
    }
}

fn waitlist_changes(state: &CompanyState, ids: &[Ulid]) -> Vec<Change> {
    ids.iter()
        .filter_map(|id| state.waitlist_entry(id))
        .map(waitlist_change)
        .collect()
}

fn waitlist_change(entry: &WaitlistEntry) -> Change {
    Change::Waitlist {
        service_id: entry.service_id,
        entry_id: entry.id,
        client_id: entry.client_id,
        status: entry.status,
    }
}

pub(crate) fn now_ms() -> Ms {
    utc_to_ms(chrono::Utc::now())
}

pub(crate) fn validate_span(span: &Span, max_duration: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::invalid("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_duration {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// The stored timezone was validated on write; failing to parse it now means
/// the state itself is unreadable.
pub(crate) fn company_tz(state: &CompanyState) -> Result<Tz, EngineError> {
    schedule::parse_timezone(&state.settings.timezone).ok_or_else(|| {
        EngineError::TransientRead(format!("stored timezone {:?} is not valid", state.settings.timezone))
    })
}

pub(crate) fn service<'a>(state: &'a CompanyState, id: &Ulid) -> Result<&'a Service, EngineError> {
    state.services.get(id).ok_or(EngineError::not_found("service", *id))
}
