use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::feed::fetch_fail_open;
use crate::model::*;
use crate::observability;

use super::busy::{aggregate, BusyFilter};
use super::conflict::{check_candidate, CapacityModel};
use super::schedule::{day_bounds, resolve_day, resolve_union, ResolvedDay};
use super::slots::{generate_candidates, SlotRules};
use super::{company_tz, service, Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub service_id: Ulid,
    /// Calendar day in the company timezone.
    pub date: NaiveDate,
    pub professional_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    /// Bookable start instants, ascending.
    pub slots: Vec<Ms>,
    pub warnings: Vec<ValidationWarning>,
}

impl Engine {
    /// Bookable starts for one service on one day.
    ///
    /// Side-effect free. Two read locks are taken with the external feed fetched
    /// in between, so a slow feed never holds up writers. A slot is listed if at
    /// least one candidate owner is open and passes the conflict filter.
    pub async fn list_availability(&self, query: &AvailabilityQuery, now: Ms) -> Result<Availability, EngineError> {
        let started = Instant::now();

        let (owners, day) = {
            let state = self.state.read().await;
            service(&state, &query.service_id)?;
            let tz = company_tz(&state)?;
            (state.candidate_owners(query.professional_id), day_bounds(tz, query.date))
        };

        let external = fetch_fail_open(
            self.options.feed.as_ref(),
            self.company_id,
            &owners,
            day,
            self.options.feed_timeout,
        )
        .await;

        let state = self.state.read().await;
        let svc = service(&state, &query.service_id)?;
        let tz = company_tz(&state)?;
        let rules = SlotRules::for_service(svc, state.settings.slot_step_minutes);
        let model = CapacityModel::for_service(svc);
        let units = match &model {
            CapacityModel::ResourcePool { resource_type } => state.active_units(resource_type),
            _ => Vec::new(),
        };
        let filter = BusyFilter {
            professional_id: query.professional_id,
            exclude_booking: None,
        };
        let busy = aggregate(&state, &day, &filter, &external);

        let mut slots = Vec::new();
        let mut warnings = Vec::new();
        for owner in &owners {
            let resolved = resolve_day(state.effective_blocks(*owner), query.date, tz);
            warnings.extend(resolved.warnings);
            for start in generate_candidates(&resolved.windows, &rules, now) {
                let effective = rules.effective_span(start);
                if check_candidate(&busy, *owner, &svc.id, &model, &units, &effective).is_ok() {
                    slots.push(start);
                }
            }
        }
        slots.sort_unstable();
        slots.dedup();
        warnings.dedup();

        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
        metrics::histogram!(observability::AVAILABILITY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(Availability { slots, warnings })
    }

    /// Hours worth displaying on `date`: open for at least one professional, or
    /// the company's own hours when nobody has a schedule.
    pub async fn display_hours(&self, date: NaiveDate) -> Result<ResolvedDay, EngineError> {
        let state = self.state.read().await;
        let tz = company_tz(&state)?;
        let days: Vec<ResolvedDay> = state
            .candidate_owners(None)
            .into_iter()
            .map(|owner| resolve_day(state.effective_blocks(owner), date, tz))
            .collect();
        Ok(resolve_union(&days))
    }

    pub async fn settings(&self) -> CompanySettings {
        self.state.read().await.settings.clone()
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let state = self.state.read().await;
        state.booking(&id).cloned().ok_or(EngineError::not_found("booking", id))
    }

    /// Bookings (cancelled included) starting inside `range`, by start.
    pub async fn bookings_in(&self, range: Span) -> Vec<Booking> {
        let state = self.state.read().await;
        state
            .bookings
            .iter()
            .filter(|b| range.contains_instant(b.span.start))
            .cloned()
            .collect()
    }

    pub async fn get_waitlist_entry(&self, id: Ulid) -> Result<WaitlistEntry, EngineError> {
        let state = self.state.read().await;
        state
            .waitlist_entry(&id)
            .cloned()
            .ok_or(EngineError::not_found("waitlist entry", id))
    }
}
