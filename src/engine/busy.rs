use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::interval::normalize;
use super::store::CompanyState;

/// Where a busy interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusySource {
    Booking { id: Ulid, service_id: Ulid },
    Exception { id: Ulid },
    External,
}

/// One unavailable interval. `span` is already the effective interval
/// (bookings include their own service buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub span: Span,
    pub source: BusySource,
}

impl BusyInterval {
    pub fn booking_of_service(&self, service_id: &Ulid) -> bool {
        matches!(self.source, BusySource::Booking { service_id: s, .. } if s == *service_id)
    }
}

/// Busy spans reported by the external feed for one owner.
/// `professional_id: None` is company-wide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalBusy {
    pub professional_id: Option<Ulid>,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BusyFilter {
    /// Only collect this professional's own intervals (company-wide ones always apply).
    pub professional_id: Option<Ulid>,
    /// Leave one booking out (it is being moved).
    pub exclude_booking: Option<Ulid>,
}

/// Unavailable intervals for a range, grouped by what they block. Every list is
/// sorted by start.
#[derive(Debug, Clone, Default)]
pub struct BusySet {
    /// Blocks every owner: company-wide exceptions and feed entries.
    company_wide: Vec<BusyInterval>,
    by_owner: HashMap<Owner, Vec<BusyInterval>>,
    by_resource: HashMap<Ulid, Vec<BusyInterval>>,
}

fn insert_sorted(list: &mut Vec<BusyInterval>, item: BusyInterval) {
    let pos = list.partition_point(|b| b.span.start <= item.span.start);
    list.insert(pos, item);
}

impl BusySet {
    pub fn company_wide(&self) -> &[BusyInterval] {
        &self.company_wide
    }

    pub fn for_owner(&self, owner: &Owner) -> &[BusyInterval] {
        self.by_owner.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn for_resource(&self, resource_id: &Ulid) -> &[BusyInterval] {
        self.by_resource.get(resource_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Company-wide plus owner intervals as one sorted, disjoint list.
    pub fn merged_for(&self, owner: &Owner) -> Vec<Span> {
        normalize(
            self.company_wide
                .iter()
                .chain(self.for_owner(owner))
                .map(|b| b.span)
                .collect(),
        )
    }

    /// Add a booking that is not in the store yet (earlier occurrence of the same batch).
    pub fn insert_booking(&mut self, booking: &Booking, buffer_minutes: u32) {
        let item = BusyInterval {
            span: booking.span.expand(buffer_minutes),
            source: BusySource::Booking {
                id: booking.id,
                service_id: booking.service_id,
            },
        };
        if let Some(owner) = booking.occupied_owner() {
            insert_sorted(self.by_owner.entry(owner).or_default(), item);
        }
        if let Some(rid) = booking.resource_id {
            insert_sorted(self.by_resource.entry(rid).or_default(), item);
        }
    }

    fn push_owner(&mut self, owner: Owner, item: BusyInterval) {
        self.by_owner.entry(owner).or_default().push(item);
    }

    fn sort(&mut self) {
        let key = |b: &BusyInterval| (b.span.start, b.span.end);
        self.company_wide.sort_by_key(key);
        for list in self.by_owner.values_mut() {
            list.sort_by_key(key);
        }
        for list in self.by_resource.values_mut() {
            list.sort_by_key(key);
        }
    }
}

/// Collect bookings, exceptions and external feed spans that touch `range`.
///
/// Internal sources come straight from the store and are authoritative. The
/// external lists were fetched beforehand; a failed fetch simply arrives empty.
pub fn aggregate(
    state: &CompanyState,
    range: &Span,
    filter: &BusyFilter,
    external: &[ExternalBusy],
) -> BusySet {
    let mut set = BusySet::default();
    let wanted = |owner: &Owner| match (filter.professional_id, owner) {
        (None, _) => true,
        (Some(p), Owner::Professional(o)) => p == *o,
        (Some(_), Owner::Company) => false,
    };

    for booking in state.active_bookings_overlapping(range) {
        if filter.exclude_booking == Some(booking.id) {
            continue;
        }
        let item = BusyInterval {
            span: booking.span.expand(state.buffer_for(&booking.service_id)),
            source: BusySource::Booking {
                id: booking.id,
                service_id: booking.service_id,
            },
        };
        if !item.span.overlaps(range) {
            continue;
        }
        if let Some(owner) = booking.occupied_owner()
            && wanted(&owner)
        {
            set.push_owner(owner, item);
        }
        // Resource units are shared by everyone, so they ignore the owner filter.
        if let Some(rid) = booking.resource_id {
            set.by_resource.entry(rid).or_default().push(item);
        }
    }

    for exception in state.exceptions_overlapping(range) {
        let item = BusyInterval {
            span: exception.span,
            source: BusySource::Exception { id: exception.id },
        };
        match exception.professional_id {
            None => set.company_wide.push(item),
            Some(p) if wanted(&Owner::Professional(p)) => set.push_owner(Owner::Professional(p), item),
            Some(_) => {}
        }
    }

    for feed in external {
        for span in feed.spans.iter().filter(|s| s.overlaps(range)) {
            let item = BusyInterval {
                span: *span,
                source: BusySource::External,
            };
            match feed.professional_id {
                None => set.company_wide.push(item),
                Some(p) if wanted(&Owner::Professional(p)) => set.push_owner(Owner::Professional(p), item),
                Some(_) => {}
            }
        }
    }

    set.sort();
    set
}
