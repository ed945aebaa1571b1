use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// All tables of one company. Mutated only through `apply_event`.
#[derive(Debug, Clone)]
pub struct CompanyState {
    pub company_id: Ulid,
    pub settings: CompanySettings,
    pub services: HashMap<Ulid, Service>,
    pub resources: HashMap<Ulid, Resource>,
    pub schedules: HashMap<Owner, Vec<ScheduleBlock>>,
    /// Sorted by `span.start`.
    pub exceptions: Vec<AvailabilityException>,
    /// Sorted by `span.start`; cancelled bookings are kept.
    pub bookings: Vec<Booking>,
    pub waitlist: Vec<WaitlistEntry>,
}

impl CompanyState {
    pub fn new(company_id: Ulid, settings: CompanySettings) -> Self {
        Self {
            company_id,
            settings,
            services: HashMap::new(),
            resources: HashMap::new(),
            schedules: HashMap::new(),
            exceptions: Vec::new(),
            bookings: Vec::new(),
            waitlist: Vec::new(),
        }
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::SettingsUpdated { settings } => {
                self.settings = settings.clone();
            }
            Event::ServiceUpserted { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceRemoved { id } => {
                self.services.remove(id);
            }
            Event::ResourceUpserted { resource } => {
                self.resources.insert(resource.id, resource.clone());
            }
            Event::ScheduleReplaced { owner, blocks } => {
                if blocks.is_empty() {
                    self.schedules.remove(owner);
                } else {
                    self.schedules.insert(*owner, blocks.clone());
                }
            }
            Event::ExceptionAdded { exception } => {
                let pos = self
                    .exceptions
                    .partition_point(|e| e.span.start <= exception.span.start);
                self.exceptions.insert(pos, exception.clone());
            }
            Event::ExceptionRemoved { id } => {
                self.exceptions.retain(|e| e.id != *id);
            }
            Event::BookingsCommitted { bookings } => {
                for booking in bookings {
                    self.insert_booking(booking.clone());
                }
            }
            Event::BookingStatusChanged {
                id,
                status,
                notified_waitlist,
            } => {
                if let Some(b) = self.bookings.iter_mut().find(|b| b.id == *id) {
                    b.status = *status;
                }
                for entry_id in notified_waitlist {
                    self.set_waitlist_status(entry_id, WaitlistStatus::Notified);
                }
            }
            Event::BookingRescheduled { id, span, resource_id } => {
                if let Some(pos) = self.bookings.iter().position(|b| b.id == *id) {
                    let mut booking = self.bookings.remove(pos);
                    booking.span = *span;
                    booking.resource_id = *resource_id;
                    self.insert_booking(booking);
                }
            }
            Event::WaitlistAdded { entry } => {
                self.waitlist.push(entry.clone());
            }
            Event::WaitlistStatusChanged { id, status } => {
                self.set_waitlist_status(id, *status);
            }
            Event::WaitlistPromoted { entry_id, bookings } => {
                for booking in bookings {
                    self.insert_booking(booking.clone());
                }
                self.set_waitlist_status(entry_id, WaitlistStatus::Promoted);
            }
        }
    }

    fn set_waitlist_status(&mut self, id: &Ulid, status: WaitlistStatus) {
        if let Some(e) = self.waitlist.iter_mut().find(|e| e.id == *id) {
            e.status = status;
        }
    }

    fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn waitlist_entry(&self, id: &Ulid) -> Option<&WaitlistEntry> {
        self.waitlist.iter().find(|e| e.id == *id)
    }

    /// Buffer of the service a booking was made for; 0 if the service is gone.
    pub fn buffer_for(&self, service_id: &Ulid) -> u32 {
        self.services.get(service_id).map_or(0, |s| s.buffer_minutes)
    }

    fn max_buffer_ms(&self) -> Ms {
        self.services
            .values()
            .map(|s| minutes(s.buffer_minutes))
            .max()
            .unwrap_or(0)
    }

    /// Non-cancelled bookings whose buffer-expanded interval may overlap `query`.
    ///
    /// Bookings are sorted by start, so everything starting at or after `query.end`
    /// is skipped by binary search. The lower bound is widened by the largest
    /// service buffer so bookings ending just before the window are still seen.
    pub fn active_bookings_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        let reach = query.start - self.max_buffer_ms();
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.is_active() && b.span.end > reach)
    }

    pub fn exceptions_overlapping(&self, query: &Span) -> impl Iterator<Item = &AvailabilityException> {
        let right_bound = self.exceptions.partition_point(|e| e.span.start < query.end);
        self.exceptions[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    // ── Schedules ────────────────────────────────────────────

    /// Blocks that govern `owner`. A professional with no blocks of their own
    /// works the company schedule.
    pub fn effective_blocks(&self, owner: Owner) -> &[ScheduleBlock] {
        match owner {
            Owner::Company => self
                .schedules
                .get(&Owner::Company)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            Owner::Professional(_) => self
                .schedules
                .get(&owner)
                .or_else(|| self.schedules.get(&Owner::Company))
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        }
    }

    /// Professionals with their own schedule, in id order.
    pub fn professionals_with_schedules(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self
            .schedules
            .keys()
            .filter_map(Owner::professional_id)
            .collect();
        ids.sort();
        ids
    }

    /// Who can serve a request: the named professional, else every scheduled
    /// professional, else the company itself.
    pub fn candidate_owners(&self, professional_id: Option<Ulid>) -> Vec<Owner> {
        if let Some(p) = professional_id {
            return vec![Owner::Professional(p)];
        }
        let pros = self.professionals_with_schedules();
        if pros.is_empty() {
            vec![Owner::Company]
        } else {
            pros.into_iter().map(Owner::Professional).collect()
        }
    }

    /// Active units of a resource type, in id order.
    pub fn active_units(&self, resource_type: &str) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self
            .resources
            .values()
            .filter(|r| r.is_active && r.resource_type == resource_type)
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    // ── Compaction ───────────────────────────────────────────

    /// The minimal event list that rebuilds this state from scratch.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::SettingsUpdated {
            settings: self.settings.clone(),
        }];
        let mut services: Vec<&Service> = self.services.values().collect();
        services.sort_by_key(|s| s.id);
        events.extend(services.into_iter().map(|s| Event::ServiceUpserted { service: s.clone() }));

        let mut resources: Vec<&Resource> = self.resources.values().collect();
        resources.sort_by_key(|r| r.id);
        events.extend(resources.into_iter().map(|r| Event::ResourceUpserted { resource: r.clone() }));

        let mut owners: Vec<&Owner> = self.schedules.keys().collect();
        owners.sort();
        for owner in owners {
            events.push(Event::ScheduleReplaced {
                owner: *owner,
                blocks: self.schedules[owner].clone(),
            });
        }

        events.extend(
            self.exceptions
                .iter()
                .map(|e| Event::ExceptionAdded { exception: e.clone() }),
        );
        if !self.bookings.is_empty() {
            events.push(Event::BookingsCommitted {
                bookings: self.bookings.clone(),
            });
        }
        events.extend(
            self.waitlist
                .iter()
                .map(|e| Event::WaitlistAdded { entry: e.clone() }),
        );
        events
    }
}
