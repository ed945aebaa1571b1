use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::feed::fetch_fail_open;
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, outcome_label};

use super::busy::{aggregate, BusyFilter};
use super::conflict::{check_candidate, CapacityModel, Rejection};
use super::interval::covered_by;
use super::recurrence::{expand, RecurrenceError, Series};
use super::schedule::{local_datetime, parse_timezone, resolve_day};
use super::slots::{temporal_warnings, SlotRules};
use super::store::CompanyState;
use super::{company_tz, service, validate_span, Engine, EngineError, WalCommand};

/// A single booking, or the first occurrence of a series when `recurrence` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub span: Span,
    pub professional_id: Option<Ulid>,
    pub recurrence: Option<RecurrenceRule>,
    /// `Confirmed` or `Pending`.
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Commit even if warnings were raised.
    pub acknowledge_warnings: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    Full,
    ResourceUnavailable,
    TooManyOccurrences,
}

impl From<Rejection> for ConflictReason {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::OwnerBusy | Rejection::Full => ConflictReason::Full,
            Rejection::ResourceUnavailable => ConflictReason::ResourceUnavailable,
        }
    }
}

/// Result of a commit attempt. Conflicts are ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        bookings: Vec<Booking>,
        warnings: Vec<ValidationWarning>,
    },
    /// Nothing free for a single interval; the caller may offer a waitlist entry.
    WaitlistOffered { reason: ConflictReason },
    Rejected { reason: ConflictReason },
    /// Nothing was written; resend with `acknowledge_warnings` to proceed.
    NeedsConfirmation { warnings: Vec<ValidationWarning> },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }

    pub fn offer_waitlist(&self) -> bool {
        matches!(self, CommitOutcome::WaitlistOffered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistRequest {
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub span: Span,
    pub professional_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRequest {
    pub professional_id: Option<Ulid>,
    pub span: Span,
    pub reason: Option<String>,
}

/// The more specific of two rejections wins when several owners were tried.
fn worse(a: Option<Rejection>, b: Rejection) -> Rejection {
    let rank = |r: Rejection| match r {
        Rejection::OwnerBusy => 0,
        Rejection::Full => 1,
        Rejection::ResourceUnavailable => 2,
    };
    match a {
        Some(a) if rank(a) >= rank(b) => a,
        _ => b,
    }
}

fn hull_with_buffer(spans: &[Span], buffer_minutes: u32) -> Option<Span> {
    let first = spans.first()?;
    Some(spans.iter().fold(*first, |acc, s| acc.hull(s)).expand(buffer_minutes))
}

/// Owners to try for `effective`, in order: those whose hours cover it, or
/// everyone when nobody's do. The flag is false in the latter case.
fn owners_by_hours(
    state: &CompanyState,
    owners: &[Owner],
    effective: &Span,
    tz: chrono_tz::Tz,
) -> (Vec<Owner>, bool) {
    let Some(local) = local_datetime(tz, effective.start) else {
        return (owners.to_vec(), false);
    };
    let in_hours: Vec<Owner> = owners
        .iter()
        .copied()
        .filter(|o| covered_by(&resolve_day(state.effective_blocks(*o), local.date(), tz).windows, effective))
        .collect();
    if in_hours.is_empty() {
        (owners.to_vec(), false)
    } else {
        (in_hours, true)
    }
}

impl Engine {
    // ── Booking commit ───────────────────────────────────────

    /// Re-validate and commit a booking or a whole series.
    ///
    /// Everything is checked under the company write lock immediately before the
    /// WAL append, so two concurrent requests for the last unit cannot both
    /// commit. A series is all-or-nothing.
    pub async fn create_booking(&self, req: BookingRequest, now: Ms) -> Result<CommitOutcome, EngineError> {
        let outcome = self.commit_request(&req, now, None).await?;
        metrics::counter!(observability::COMMITS_TOTAL, "outcome" => outcome_label(&outcome)).increment(1);
        Ok(outcome)
    }

    async fn commit_request(
        &self,
        req: &BookingRequest,
        now: Ms,
        promoting: Option<Ulid>,
    ) -> Result<CommitOutcome, EngineError> {
        validate_span(&req.span, MAX_SPAN_DURATION_MS)?;
        if req.status == BookingStatus::Cancelled {
            return Err(EngineError::invalid("a new booking cannot be cancelled"));
        }

        // Expand and pick the feed targets under a short read lock.
        let (series, owners, range) = {
            let state = self.state.read().await;
            let svc = service(&state, &req.service_id)?;
            let tz = company_tz(&state)?;
            let series = match req.recurrence {
                None => Series {
                    occurrences: vec![req.span],
                    warnings: Vec::new(),
                },
                Some(rule) => match expand(req.span, &rule, tz, MAX_OCCURRENCES) {
                    Ok(series) => series,
                    Err(RecurrenceError::TooManyOccurrences { cap }) => {
                        debug!(company_id = %self.company_id, cap, "series rejected: too many occurrences");
                        return Ok(CommitOutcome::Rejected {
                            reason: ConflictReason::TooManyOccurrences,
                        });
                    }
                    Err(e) => return Err(EngineError::invalid(e.to_string())),
                },
            };
            for occurrence in &series.occurrences {
                validate_span(occurrence, MAX_SPAN_DURATION_MS)?;
            }
            let range = hull_with_buffer(&series.occurrences, svc.buffer_minutes).unwrap_or(req.span);
            (series, state.candidate_owners(req.professional_id), range)
        };

        let external = fetch_fail_open(
            self.options.feed.as_ref(),
            self.company_id,
            &owners,
            range,
            self.options.feed_timeout,
        )
        .await;

        let state = self.write_state().await;
        if let Some(entry_id) = promoting {
            match state.waitlist_entry(&entry_id) {
                Some(entry) if entry.is_open() => {}
                Some(_) => return Err(EngineError::invalid("waitlist entry is no longer open")),
                None => return Err(EngineError::not_found("waitlist entry", entry_id)),
            }
        }
        if state.bookings.len() + series.occurrences.len() > MAX_BOOKINGS_PER_COMPANY {
            return Err(EngineError::LimitExceeded("too many bookings for company"));
        }

        let svc = service(&state, &req.service_id)?.clone();
        let tz = company_tz(&state)?;
        let rules = SlotRules::for_service(&svc, state.settings.slot_step_minutes);
        let model = CapacityModel::for_service(&svc);
        let units = match &model {
            CapacityModel::ResourcePool { resource_type } => state.active_units(resource_type),
            _ => Vec::new(),
        };
        // Schedules may have changed while the feed was being read.
        let owners = state.candidate_owners(req.professional_id);

        let mut warnings = series.warnings;
        let mut orders = Vec::with_capacity(series.occurrences.len());
        for occurrence in &series.occurrences {
            warnings.extend(temporal_warnings(occurrence.start, &rules, now));
            let effective = occurrence.expand(svc.buffer_minutes);
            let (order, in_hours) = owners_by_hours(&state, &owners, &effective, tz);
            if !in_hours {
                warnings.push(ValidationWarning::OutsideWorkingHours {
                    start: occurrence.start,
                    end: occurrence.end,
                });
            }
            orders.push(order);
        }
        if !warnings.is_empty() && !req.acknowledge_warnings {
            return Ok(CommitOutcome::NeedsConfirmation { warnings });
        }

        let range = hull_with_buffer(&series.occurrences, svc.buffer_minutes).unwrap_or(range);
        let filter = BusyFilter {
            professional_id: req.professional_id,
            exclude_booking: None,
        };
        let mut busy = aggregate(&state, &range, &filter, &external);
        let is_series = series.occurrences.len() > 1;
        let series_id = is_series.then(Ulid::new);

        let mut bookings = Vec::with_capacity(series.occurrences.len());
        for (occurrence, order) in series.occurrences.iter().zip(&orders) {
            let effective = occurrence.expand(svc.buffer_minutes);
            let mut rejection = None;
            let mut placed = None;
            for owner in order {
                match check_candidate(&busy, *owner, &svc.id, &model, &units, &effective) {
                    Ok(unit) => {
                        placed = Some((*owner, unit));
                        break;
                    }
                    Err(r) => rejection = Some(worse(rejection, r)),
                }
            }
            let Some((owner, unit)) = placed else {
                let reason = ConflictReason::from(rejection.unwrap_or(Rejection::OwnerBusy));
                debug!(
                    company_id = %self.company_id,
                    service_id = %svc.id,
                    start = occurrence.start,
                    ?reason,
                    "commit rejected"
                );
                return Ok(if is_series {
                    CommitOutcome::Rejected { reason }
                } else {
                    CommitOutcome::WaitlistOffered { reason }
                });
            };
            let booking = Booking {
                id: Ulid::new(),
                company_id: self.company_id,
                service_id: svc.id,
                client_id: req.client_id,
                professional_id: owner.professional_id(),
                resource_id: unit,
                span: *occurrence,
                status: req.status,
                payment_status: req.payment_status,
                series_id,
            };
            busy.insert_booking(&booking, svc.buffer_minutes);
            bookings.push(booking);
        }

        // A promotion is one record so the entry can never stay open behind its booking.
        let event = match promoting {
            Some(entry_id) => Event::WaitlistPromoted {
                entry_id,
                bookings: bookings.clone(),
            },
            None => Event::BookingsCommitted {
                bookings: bookings.clone(),
            },
        };
        self.persist_and_apply(state, event).await?;
        info!(
            company_id = %self.company_id,
            service_id = %svc.id,
            count = bookings.len(),
            "bookings committed"
        );
        warnings.dedup();
        Ok(CommitOutcome::Committed { bookings, warnings })
    }

    /// Pending → confirmed, or anything → cancelled. Cancelling tells pending
    /// waitlist entries for the freed interval.
    pub async fn set_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let state = self.write_state().await;
        let current = state
            .booking(&id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))?;
        match (current.status, status) {
            (from, to) if from == to => return Ok(current),
            (BookingStatus::Cancelled, _) => {
                return Err(EngineError::invalid("cancelled bookings cannot be reopened"));
            }
            (BookingStatus::Confirmed, BookingStatus::Pending) => {
                return Err(EngineError::invalid("a confirmed booking cannot go back to pending"));
            }
            _ => {}
        }

        let notified_waitlist: Vec<Ulid> = if status == BookingStatus::Cancelled {
            state
                .waitlist
                .iter()
                .filter(|e| {
                    e.status == WaitlistStatus::Pending
                        && e.service_id == current.service_id
                        && e.span.overlaps(&current.span)
                        && e.professional_id.is_none_or(|p| current.professional_id == Some(p))
                })
                .map(|e| e.id)
                .collect()
        } else {
            Vec::new()
        };

        let state = self
            .persist_and_apply(
                state,
                Event::BookingStatusChanged {
                    id,
                    status,
                    notified_waitlist: notified_waitlist.clone(),
                },
            )
            .await?;
        for entry_id in notified_waitlist {
            info!(company_id = %self.company_id, %entry_id, "waitlist entry notified");
        }

        state
            .booking(&id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }

    /// Move a booking to `span`, checked like a new commit with the booking
    /// itself left out of the busy set. The owner does not change.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        span: Span,
        acknowledge_warnings: bool,
        now: Ms,
    ) -> Result<CommitOutcome, EngineError> {
        validate_span(&span, MAX_SPAN_DURATION_MS)?;
        let owner = {
            let state = self.state.read().await;
            let booking = state.booking(&id).ok_or(EngineError::not_found("booking", id))?;
            booking.professional_id.map_or(Owner::Company, Owner::Professional)
        };
        let external = fetch_fail_open(
            self.options.feed.as_ref(),
            self.company_id,
            &[owner],
            span.expand(MAX_SERVICE_MINUTES),
            self.options.feed_timeout,
        )
        .await;

        let state = self.write_state().await;
        let booking = state
            .booking(&id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))?;
        if !booking.is_active() {
            return Err(EngineError::invalid("cancelled bookings cannot be moved"));
        }
        let svc = service(&state, &booking.service_id)?.clone();
        let tz = company_tz(&state)?;
        let rules = SlotRules::for_service(&svc, state.settings.slot_step_minutes);
        let effective = span.expand(svc.buffer_minutes);

        let mut warnings = temporal_warnings(span.start, &rules, now);
        if !owners_by_hours(&state, &[owner], &effective, tz).1 {
            warnings.push(ValidationWarning::OutsideWorkingHours {
                start: span.start,
                end: span.end,
            });
        }
        if !warnings.is_empty() && !acknowledge_warnings {
            return Ok(CommitOutcome::NeedsConfirmation { warnings });
        }

        let model = CapacityModel::for_service(&svc);
        let units = match &model {
            CapacityModel::ResourcePool { resource_type } => state.active_units(resource_type),
            _ => Vec::new(),
        };
        let filter = BusyFilter {
            professional_id: booking.professional_id,
            exclude_booking: Some(id),
        };
        let busy = aggregate(&state, &effective, &filter, &external);
        let outcome = match check_candidate(&busy, owner, &svc.id, &model, &units, &effective) {
            Ok(resource_id) => {
                let state = self
                    .persist_and_apply(state, Event::BookingRescheduled { id, span, resource_id })
                    .await?;
                let moved = state
                    .booking(&id)
                    .cloned()
                    .ok_or(EngineError::not_found("booking", id))?;
                info!(company_id = %self.company_id, booking_id = %id, "booking rescheduled");
                CommitOutcome::Committed {
                    bookings: vec![moved],
                    warnings,
                }
            }
            Err(r) => CommitOutcome::Rejected { reason: r.into() },
        };
        metrics::counter!(observability::COMMITS_TOTAL, "outcome" => outcome_label(&outcome)).increment(1);
        Ok(outcome)
    }

    // ── Waitlist ─────────────────────────────────────────────

    pub async fn join_waitlist(&self, req: WaitlistRequest) -> Result<WaitlistEntry, EngineError> {
        validate_span(&req.span, MAX_SPAN_DURATION_MS)?;
        let state = self.write_state().await;
        service(&state, &req.service_id)?;
        if state.waitlist.len() >= MAX_WAITLIST_PER_COMPANY {
            return Err(EngineError::LimitExceeded("too many waitlist entries for company"));
        }
        let entry = WaitlistEntry {
            id: Ulid::new(),
            company_id: self.company_id,
            client_id: req.client_id,
            service_id: req.service_id,
            professional_id: req.professional_id,
            span: req.span,
            status: WaitlistStatus::Pending,
        };
        self.persist_and_apply(state, Event::WaitlistAdded { entry: entry.clone() })
            .await?;
        Ok(entry)
    }

    /// Turn a waitlist entry into a booking through the normal commit path.
    /// Staff promote deliberately, so warnings do not stop it.
    pub async fn promote_waitlist(&self, id: Ulid, now: Ms) -> Result<CommitOutcome, EngineError> {
        let entry = {
            let state = self.state.read().await;
            state
                .waitlist_entry(&id)
                .cloned()
                .ok_or(EngineError::not_found("waitlist entry", id))?
        };
        if !entry.is_open() {
            return Err(EngineError::invalid("waitlist entry is no longer open"));
        }
        let req = BookingRequest {
            service_id: entry.service_id,
            client_id: entry.client_id,
            span: entry.span,
            professional_id: entry.professional_id,
            recurrence: None,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::default(),
            acknowledge_warnings: true,
        };
        let outcome = self.commit_request(&req, now, Some(id)).await?;
        metrics::counter!(observability::COMMITS_TOTAL, "outcome" => outcome_label(&outcome)).increment(1);
        Ok(outcome)
    }

    /// Expire open entries whose start has passed. Returns how many changed.
    pub async fn expire_waitlist(&self, now: Ms) -> Result<usize, EngineError> {
        let mut state = self.write_state().await;
        let expired: Vec<Ulid> = state
            .waitlist
            .iter()
            .filter(|e| e.is_open() && e.span.start <= now)
            .map(|e| e.id)
            .collect();
        for id in &expired {
            state = self
                .persist_and_apply(
                    state,
                    Event::WaitlistStatusChanged {
                        id: *id,
                        status: WaitlistStatus::Expired,
                    },
                )
                .await?;
        }
        metrics::counter!(observability::WAITLIST_EXPIRED_TOTAL).increment(expired.len() as u64);
        Ok(expired.len())
    }

    // ── Settings and catalog ─────────────────────────────────

    pub async fn update_settings(&self, settings: CompanySettings) -> Result<(), EngineError> {
        if settings.timezone.len() > MAX_TIMEZONE_LEN || parse_timezone(&settings.timezone).is_none() {
            return Err(EngineError::invalid(format!("unknown timezone {:?}", settings.timezone)));
        }
        if !(MIN_SLOT_STEP_MINUTES..=MAX_SLOT_STEP_MINUTES).contains(&settings.slot_step_minutes) {
            return Err(EngineError::invalid(format!(
                "slot_step_minutes must be between {MIN_SLOT_STEP_MINUTES} and {MAX_SLOT_STEP_MINUTES}"
            )));
        }
        let state = self.write_state().await;
        self.persist_and_apply(state, Event::SettingsUpdated { settings }).await.map(drop)
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        if service.duration_minutes == 0 {
            return Err(EngineError::invalid("duration_minutes must be positive"));
        }
        if service.duration_minutes + service.buffer_minutes > MAX_SERVICE_MINUTES {
            return Err(EngineError::LimitExceeded("service longer than a day"));
        }
        if service.max_capacity == 0 {
            return Err(EngineError::invalid("max_capacity must be at least 1"));
        }
        if service.max_lead_days.is_some_and(|d| d > MAX_LEAD_DAYS) {
            return Err(EngineError::LimitExceeded("max_lead_days too large"));
        }
        if let Some(t) = &service.required_resource_type
            && (t.is_empty() || t.len() > MAX_NAME_LEN)
        {
            return Err(EngineError::invalid("required_resource_type must be 1..256 bytes"));
        }
        let state = self.write_state().await;
        if !state.services.contains_key(&service.id) && state.services.len() >= MAX_SERVICES_PER_COMPANY {
            return Err(EngineError::LimitExceeded("too many services for company"));
        }
        self.persist_and_apply(state, Event::ServiceUpserted { service }).await.map(drop)
    }

    /// Existing bookings keep their data; the service just stops being bookable.
    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let state = self.write_state().await;
        service(&state, &id)?;
        self.persist_and_apply(state, Event::ServiceRemoved { id }).await?;
        self.notify.close(&id);
        Ok(())
    }

    pub async fn upsert_resource(&self, resource: Resource) -> Result<(), EngineError> {
        if resource.resource_type.is_empty() || resource.resource_type.len() > MAX_NAME_LEN {
            return Err(EngineError::invalid("resource_type must be 1..256 bytes"));
        }
        let state = self.write_state().await;
        if !state.resources.contains_key(&resource.id) && state.resources.len() >= MAX_RESOURCES_PER_COMPANY {
            return Err(EngineError::LimitExceeded("too many resources for company"));
        }
        self.persist_and_apply(state, Event::ResourceUpserted { resource }).await.map(drop)
    }

    /// Replace every weekly block of `owner`. An empty list clears the schedule
    /// (a professional then falls back to the company hours).
    pub async fn replace_schedule(&self, owner: Owner, mut blocks: Vec<ScheduleBlock>) -> Result<(), EngineError> {
        if blocks.len() > MAX_BLOCKS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many schedule blocks"));
        }
        for block in &mut blocks {
            if block.day_of_week > 6 {
                return Err(EngineError::invalid("day_of_week must be 0..=6"));
            }
            if !block.is_well_formed() {
                return Err(EngineError::invalid("schedule block start must be before end"));
            }
            block.owner = owner;
        }
        let state = self.write_state().await;
        self.persist_and_apply(state, Event::ScheduleReplaced { owner, blocks }).await.map(drop)
    }

    pub async fn add_exception(&self, req: ExceptionRequest) -> Result<AvailabilityException, EngineError> {
        validate_span(&req.span, MAX_EXCEPTION_DURATION_MS)?;
        if req.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("exception reason too long"));
        }
        let exception = AvailabilityException {
            id: Ulid::new(),
            company_id: self.company_id,
            professional_id: req.professional_id,
            span: req.span,
            reason: req.reason,
        };
        let state = self.write_state().await;
        self.persist_and_apply(
            state,
            Event::ExceptionAdded {
                exception: exception.clone(),
            },
        )
        .await?;
        Ok(exception)
    }

    pub async fn remove_exception(&self, id: Ulid) -> Result<(), EngineError> {
        let state = self.write_state().await;
        if !state.exceptions.iter().any(|e| e.id == id) {
            return Err(EngineError::not_found("exception", id));
        }
        self.persist_and_apply(state, Event::ExceptionRemoved { id }).await.map(drop)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Holds the write lock so no append can slip in between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let state = self.state.write().await;
        let events = state.snapshot_events();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(state);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
