use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 24 * 60 * MINUTE_MS;

/// Whole minutes to milliseconds.
pub fn minutes(n: u32) -> Ms {
    Ms::from(n) * MINUTE_MS
}

pub fn ms_to_utc(ms: Ms) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

pub fn utc_to_ms(at: DateTime<Utc>) -> Ms {
    at.timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted input.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `a.start < b.end && a.end > b.start`; touching spans do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// New span with `end` pushed out by a buffer in whole minutes.
    pub fn expand(&self, buffer_minutes: u32) -> Span {
        Span {
            start: self.start,
            end: self.end + minutes(buffer_minutes),
        }
    }

    /// Smallest span covering both.
    pub fn hull(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Who a schedule or booking belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Owner {
    Company,
    Professional(Ulid),
}

impl Owner {
    pub fn professional_id(&self) -> Option<Ulid> {
        match self {
            Owner::Company => None,
            Owner::Professional(id) => Some(*id),
        }
    }
}

/// One recurring weekly window. `day_of_week` is 0 = Sunday … 6 = Saturday.
/// An `end_time` of 00:00 means midnight at the end of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBlock {
    pub owner: Owner,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_unavailable: bool,
}

impl ScheduleBlock {
    pub fn ends_at_midnight(&self) -> bool {
        self.end_time == NaiveTime::MIN
    }

    pub fn is_well_formed(&self) -> bool {
        self.day_of_week <= 6 && (self.ends_at_midnight() || self.start_time < self.end_time)
    }
}

/// One-off closed interval. `professional_id: None` closes the whole company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Ulid,
    pub company_id: Ulid,
    pub professional_id: Option<Ulid>,
    pub span: Span,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub company_id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub professional_id: Option<Ulid>,
    pub resource_id: Option<Ulid>,
    pub span: Span,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub series_id: Option<Ulid>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    /// The owner whose calendar this booking occupies exclusively, if any.
    /// Bookings that only hold a resource unit occupy the unit, not the company.
    pub fn occupied_owner(&self) -> Option<Owner> {
        match (self.professional_id, self.resource_id) {
            (Some(p), _) => Some(Owner::Professional(p)),
            (None, None) => Some(Owner::Company),
            (None, Some(_)) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub duration_minutes: u32,
    pub buffer_minutes: u32,
    pub min_notice_minutes: u32,
    /// `None` = no upper bound.
    pub max_lead_days: Option<u32>,
    pub required_resource_type: Option<String>,
    /// Concurrent bookings allowed per owner (default 1).
    pub max_capacity: u32,
}

/// One interchangeable unit (room, chair, machine) of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub resource_type: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Pending,
    Notified,
    Promoted,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub company_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub professional_id: Option<Ulid>,
    pub span: Span,
    pub status: WaitlistStatus,
}

impl WaitlistEntry {
    pub fn is_open(&self) -> bool {
        matches!(self.status, WaitlistStatus::Pending | WaitlistStatus::Notified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

/// Transient input; expanded into occurrences at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    /// Last calendar day (company timezone) an occurrence may start on.
    pub series_end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySettings {
    /// IANA timezone name.
    pub timezone: String,
    pub slot_step_minutes: u32,
}

impl Default for CompanySettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".into(),
            slot_step_minutes: 15,
        }
    }
}

/// Something the caller may want to confirm before proceeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    TooSoon { start: Ms, earliest_allowed: Ms },
    TooFarAhead { start: Ms, latest_allowed: Ms },
    OutsideWorkingHours { start: Ms, end: Ms },
    /// Local time did not exist; moved forward to `shifted_to`.
    DstGapShifted { date: NaiveDate, local_time: NaiveTime, shifted_to: Ms },
    /// Local time occurred twice; the earlier instant was used.
    DstAmbiguous { date: NaiveDate, local_time: NaiveTime, chosen: Ms },
}

/// The WAL record format. One event per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SettingsUpdated {
        settings: CompanySettings,
    },
    ServiceUpserted {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
    },
    ResourceUpserted {
        resource: Resource,
    },
    ScheduleReplaced {
        owner: Owner,
        blocks: Vec<ScheduleBlock>,
    },
    ExceptionAdded {
        exception: AvailabilityException,
    },
    ExceptionRemoved {
        id: Ulid,
    },
    /// Single booking or a whole recurring series; applied atomically.
    BookingsCommitted {
        bookings: Vec<Booking>,
    },
    /// Waitlist entries told about the freed interval change in the same record.
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        notified_waitlist: Vec<Ulid>,
    },
    BookingRescheduled {
        id: Ulid,
        span: Span,
        resource_id: Option<Ulid>,
    },
    WaitlistAdded {
        entry: WaitlistEntry,
    },
    WaitlistStatusChanged {
        id: Ulid,
        status: WaitlistStatus,
    },
    /// The booking made for a waitlist entry and the entry's move to promoted.
    WaitlistPromoted {
        entry_id: Ulid,
        bookings: Vec<Booking>,
    },
}
