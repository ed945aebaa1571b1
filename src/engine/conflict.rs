use ulid::Ulid;

use crate::model::*;

use super::busy::BusySet;
use super::interval::compute_saturated_spans;

/// How concurrent bookings of one service are limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityModel {
    /// One booking per owner at a time.
    Exclusive,
    /// Up to `capacity` bookings of this service per owner at a time.
    Shared { capacity: u32 },
    /// Each booking takes one free unit of the pool; the pool size is the limit.
    ResourcePool { resource_type: String },
}

impl CapacityModel {
    pub fn for_service(service: &Service) -> Self {
        match &service.required_resource_type {
            Some(resource_type) => CapacityModel::ResourcePool {
                resource_type: resource_type.clone(),
            },
            None if service.max_capacity > 1 => CapacityModel::Shared {
                capacity: service.max_capacity,
            },
            None => CapacityModel::Exclusive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The owner (or the whole company) is blocked.
    OwnerBusy,
    /// Shared capacity is used up.
    Full,
    /// No unit of the required type is free.
    ResourceUnavailable,
}

/// Can `owner` take a booking whose effective interval is `effective`?
///
/// `units` are the active units of the pool, in id order; ignored unless the
/// model is `ResourcePool`. On success returns the unit to occupy, if any.
pub fn check_candidate(
    busy: &BusySet,
    owner: Owner,
    service_id: &Ulid,
    model: &CapacityModel,
    units: &[Ulid],
    effective: &Span,
) -> Result<Option<Ulid>, Rejection> {
    if busy.company_wide().iter().any(|b| b.span.overlaps(effective)) {
        return Err(Rejection::OwnerBusy);
    }

    // Without a professional a pool booking holds only its unit, and unit-only
    // bookings never hold the company calendar, so neither side blocks the other.
    let owner_busy = match (model, owner) {
        (CapacityModel::ResourcePool { .. }, Owner::Company) => &[][..],
        _ => busy.for_owner(&owner),
    };

    let mut same_service = Vec::new();
    for interval in owner_busy {
        if !interval.span.overlaps(effective) {
            continue;
        }
        match model {
            CapacityModel::Shared { .. } if interval.booking_of_service(service_id) => {
                same_service.push(interval.span);
            }
            _ => return Err(Rejection::OwnerBusy),
        }
    }

    match model {
        CapacityModel::Exclusive => Ok(None),
        CapacityModel::Shared { capacity } => {
            let saturated = compute_saturated_spans(&same_service, *capacity);
            if saturated.iter().any(|s| s.overlaps(effective)) {
                Err(Rejection::Full)
            } else {
                Ok(None)
            }
        }
        CapacityModel::ResourcePool { .. } => pick_unit(busy, units, effective).map(Some),
    }
}

/// Count the pool's concurrent allocations against its size, then take the
/// first unit with nothing overlapping.
fn pick_unit(busy: &BusySet, units: &[Ulid], effective: &Span) -> Result<Ulid, Rejection> {
    if units.is_empty() {
        return Err(Rejection::ResourceUnavailable);
    }
    let capacity = u32::try_from(units.len()).unwrap_or(u32::MAX);
    let pool: Vec<Span> = units
        .iter()
        .flat_map(|u| busy.for_resource(u))
        .filter(|b| b.span.overlaps(effective))
        .map(|b| b.span)
        .collect();
    let saturated = compute_saturated_spans(&pool, capacity);
    if saturated.iter().any(|s| s.overlaps(effective)) {
        return Err(Rejection::ResourceUnavailable);
    }

    units
        .iter()
        .copied()
        .find(|u| !busy.for_resource(u).iter().any(|b| b.span.overlaps(effective)))
        .ok_or(Rejection::ResourceUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::busy::{aggregate, BusyFilter, ExternalBusy};
    use crate::engine::store::CompanyState;

    const M: Ms = MINUTE_MS;

    fn service(max_capacity: u32, resource_type: Option<&str>) -> Service {
        Service {
            id: Ulid::new(),
            duration_minutes: 60,
            buffer_minutes: 0,
            min_notice_minutes: 0,
            max_lead_days: None,
            required_resource_type: resource_type.map(str::to_string),
            max_capacity,
        }
    }

    fn booking(service_id: Ulid, professional_id: Option<Ulid>, resource_id: Option<Ulid>, span: Span) -> Booking {
        Booking {
            id: Ulid::new(),
            company_id: Ulid::nil(),
            service_id,
            client_id: Ulid::new(),
            professional_id,
            resource_id,
            span,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
            series_id: None,
        }
    }

    fn state(services: &[&Service], bookings: Vec<Booking>) -> CompanyState {
        let mut state = CompanyState::new(Ulid::nil(), CompanySettings::default());
        for s in services {
            state.apply_event(&Event::ServiceUpserted { service: (*s).clone() });
        }
        state.apply_event(&Event::BookingsCommitted { bookings });
        state
    }

    fn busy(state: &CompanyState) -> BusySet {
        aggregate(state, &Span::new(0, 1_000 * M), &BusyFilter::default(), &[])
    }

    #[test]
    fn capacity_model_selection() {
        assert_eq!(CapacityModel::for_service(&service(1, None)), CapacityModel::Exclusive);
        assert_eq!(
            CapacityModel::for_service(&service(4, None)),
            CapacityModel::Shared { capacity: 4 }
        );
        assert_eq!(
            CapacityModel::for_service(&service(4, Some("room"))),
            CapacityModel::ResourcePool {
                resource_type: "room".into()
            }
        );
    }

    #[test]
    fn touching_is_available_one_minute_overlap_is_not() {
        let svc = service(1, None);
        let st = state(&[&svc], vec![booking(svc.id, None, None, Span::new(60 * M, 120 * M))]);
        let set = busy(&st);
        let model = CapacityModel::Exclusive;
        let touching = Span::new(0, 60 * M);
        let overlapping = Span::new(M, 61 * M);
        assert_eq!(check_candidate(&set, Owner::Company, &svc.id, &model, &[], &touching), Ok(None));
        assert_eq!(
            check_candidate(&set, Owner::Company, &svc.id, &model, &[], &overlapping),
            Err(Rejection::OwnerBusy)
        );
    }

    #[test]
    fn shared_capacity_counts_concurrent_bookings() {
        let svc = service(2, None);
        let slot = Span::new(0, 60 * M);
        let model = CapacityModel::for_service(&svc);

        let one = state(&[&svc], vec![booking(svc.id, None, None, slot)]);
        assert_eq!(check_candidate(&busy(&one), Owner::Company, &svc.id, &model, &[], &slot), Ok(None));

        let two = state(
            &[&svc],
            vec![booking(svc.id, None, None, slot), booking(svc.id, None, None, slot)],
        );
        assert_eq!(
            check_candidate(&busy(&two), Owner::Company, &svc.id, &model, &[], &slot),
            Err(Rejection::Full)
        );
    }

    #[test]
    fn shared_capacity_blocked_by_other_service() {
        let svc = service(5, None);
        let other = service(1, None);
        let slot = Span::new(0, 60 * M);
        let st = state(&[&svc, &other], vec![booking(other.id, None, None, slot)]);
        let model = CapacityModel::for_service(&svc);
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &svc.id, &model, &[], &slot),
            Err(Rejection::OwnerBusy)
        );
    }

    #[test]
    fn pool_picks_free_unit_then_runs_out() {
        let svc = service(1, Some("room"));
        let model = CapacityModel::for_service(&svc);
        let mut units = vec![Ulid::new(), Ulid::new()];
        units.sort();
        let slot = Span::new(0, 60 * M);

        let st = state(&[&svc], vec![booking(svc.id, None, Some(units[0]), slot)]);
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &svc.id, &model, &units, &slot),
            Ok(Some(units[1]))
        );

        let st = state(
            &[&svc],
            vec![
                booking(svc.id, None, Some(units[0]), slot),
                booking(svc.id, None, Some(units[1]), slot),
            ],
        );
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &svc.id, &model, &units, &slot),
            Err(Rejection::ResourceUnavailable)
        );
    }

    #[test]
    fn pool_without_units_is_unavailable() {
        let svc = service(1, Some("room"));
        let model = CapacityModel::for_service(&svc);
        let st = state(&[&svc], vec![]);
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &svc.id, &model, &[], &Span::new(0, M)),
            Err(Rejection::ResourceUnavailable)
        );
    }

    #[test]
    fn pool_fragmented_units_still_unavailable() {
        // Neither unit is free for the whole slot even though at most one is busy at a time.
        let svc = service(1, Some("room"));
        let model = CapacityModel::for_service(&svc);
        let mut units = vec![Ulid::new(), Ulid::new()];
        units.sort();
        let st = state(
            &[&svc],
            vec![
                booking(svc.id, None, Some(units[0]), Span::new(0, 30 * M)),
                booking(svc.id, None, Some(units[1]), Span::new(30 * M, 60 * M)),
            ],
        );
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &svc.id, &model, &units, &Span::new(0, 60 * M)),
            Err(Rejection::ResourceUnavailable)
        );
    }

    #[test]
    fn professional_busy_even_if_unit_free() {
        let svc = service(1, Some("room"));
        let model = CapacityModel::for_service(&svc);
        let p = Ulid::new();
        let units = vec![Ulid::new()];
        let st = state(&[&svc], vec![]);
        let external = [ExternalBusy {
            professional_id: Some(p),
            spans: vec![Span::new(0, 10 * M)],
        }];
        let set = aggregate(&st, &Span::new(0, 100 * M), &BusyFilter::default(), &external);
        let slot = Span::new(0, 60 * M);
        assert_eq!(
            check_candidate(&set, Owner::Professional(p), &svc.id, &model, &units, &slot),
            Err(Rejection::OwnerBusy)
        );
        assert_eq!(
            check_candidate(&set, Owner::Company, &svc.id, &model, &units, &slot),
            Ok(Some(units[0]))
        );
    }

    #[test]
    fn unit_bookings_and_company_bookings_do_not_block_each_other() {
        let plain = service(1, None);
        let pool = service(1, Some("room"));
        let units = vec![Ulid::new()];
        let slot = Span::new(0, 60 * M);

        let st = state(&[&plain, &pool], vec![booking(plain.id, None, None, slot)]);
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &pool.id, &CapacityModel::for_service(&pool), &units, &slot),
            Ok(Some(units[0]))
        );

        let st = state(&[&plain, &pool], vec![booking(pool.id, None, Some(units[0]), slot)]);
        assert_eq!(
            check_candidate(&busy(&st), Owner::Company, &plain.id, &CapacityModel::Exclusive, &[], &slot),
            Ok(None)
        );
    }

    #[test]
    fn company_wide_block_stops_everyone() {
        let svc = service(1, None);
        let st = state(&[&svc], vec![]);
        let external = [ExternalBusy {
            professional_id: None,
            spans: vec![Span::new(0, 10 * M)],
        }];
        let set = aggregate(&st, &Span::new(0, 100 * M), &BusyFilter::default(), &external);
        let p = Ulid::new();
        assert_eq!(
            check_candidate(&set, Owner::Professional(p), &svc.id, &CapacityModel::Exclusive, &[], &Span::new(0, M)),
            Err(Rejection::OwnerBusy)
        );
    }
}
