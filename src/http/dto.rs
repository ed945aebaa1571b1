//! Request and response bodies of the HTTP API.
//!
//! Instants cross the wire as RFC 3339 strings and are converted to Unix
//! milliseconds at this edge; the engine never sees a string timestamp.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::schedule::ResolvedDay;
use crate::engine::{CommitOutcome, ConflictReason};
use crate::model::*;

use super::error::AppError;

/// Convert a wire interval into a span, rejecting empty or inverted ones.
pub fn span_of(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Span, AppError> {
    Span::checked(utc_to_ms(start), utc_to_ms(end))
        .ok_or_else(|| AppError::BadRequest("start must be before end".into()))
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_wall_time(s: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| AppError::BadRequest(format!("invalid time of day {s:?}")))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// ── Queries ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityParams {
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub professional_id: Option<Ulid>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub slots: Vec<DateTime<Utc>>,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoursParams {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct WindowDto {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HoursResponse {
    pub windows: Vec<WindowDto>,
    pub warnings: Vec<ValidationWarning>,
}

impl From<ResolvedDay> for HoursResponse {
    fn from(day: ResolvedDay) -> Self {
        Self {
            windows: day
                .windows
                .iter()
                .filter_map(|w| {
                    Some(WindowDto {
                        start: ms_to_utc(w.start)?,
                        end: ms_to_utc(w.end)?,
                    })
                })
                .collect(),
            warnings: day.warnings,
        }
    }
}

// ── Bookings ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RecurrenceDto {
    pub kind: RecurrenceKind,
    pub series_end_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub professional_id: Option<Ulid>,
    pub recurrence: Option<RecurrenceDto>,
    /// `confirmed` (default) or `pending`.
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub acknowledge_warnings: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub acknowledge_warnings: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingDto {
    pub id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub professional_id: Option<Ulid>,
    pub resource_id: Option<Ulid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub series_id: Option<Ulid>,
}

impl From<Booking> for BookingDto {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            service_id: b.service_id,
            client_id: b.client_id,
            professional_id: b.professional_id,
            resource_id: b.resource_id,
            start: ms_to_utc(b.span.start),
            end: ms_to_utc(b.span.end),
            status: b.status,
            payment_status: b.payment_status,
            series_id: b.series_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeResponse {
    Committed {
        bookings: Vec<BookingDto>,
        warnings: Vec<ValidationWarning>,
    },
    Conflict {
        reason: ConflictReason,
        offer_waitlist: bool,
    },
    NeedsConfirmation {
        warnings: Vec<ValidationWarning>,
    },
}

impl From<CommitOutcome> for OutcomeResponse {
    fn from(outcome: CommitOutcome) -> Self {
        let offer_waitlist = outcome.offer_waitlist();
        match outcome {
            CommitOutcome::Committed { bookings, warnings } => OutcomeResponse::Committed {
                bookings: bookings.into_iter().map(Into::into).collect(),
                warnings,
            },
            CommitOutcome::WaitlistOffered { reason } | CommitOutcome::Rejected { reason } => {
                OutcomeResponse::Conflict { reason, offer_waitlist }
            }
            CommitOutcome::NeedsConfirmation { warnings } => OutcomeResponse::NeedsConfirmation { warnings },
        }
    }
}

// ── Waitlist ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct JoinWaitlistRequest {
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub professional_id: Option<Ulid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitlistEntryDto {
    pub id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub professional_id: Option<Ulid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: WaitlistStatus,
}

impl From<WaitlistEntry> for WaitlistEntryDto {
    fn from(e: WaitlistEntry) -> Self {
        Self {
            id: e.id,
            client_id: e.client_id,
            service_id: e.service_id,
            professional_id: e.professional_id,
            start: ms_to_utc(e.span.start),
            end: ms_to_utc(e.span.end),
            status: e.status,
        }
    }
}

// ── Settings ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsRequest {
    pub timezone: String,
    pub slot_step_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRequest {
    pub duration_minutes: u32,
    #[serde(default)]
    pub buffer_minutes: u32,
    #[serde(default)]
    pub min_notice_minutes: u32,
    pub max_lead_days: Option<u32>,
    pub required_resource_type: Option<String>,
    #[serde(default = "default_capacity")]
    pub max_capacity: u32,
}

fn default_capacity() -> u32 {
    1
}

impl ServiceRequest {
    pub fn into_service(self, id: Ulid) -> Service {
        Service {
            id,
            duration_minutes: self.duration_minutes,
            buffer_minutes: self.buffer_minutes,
            min_notice_minutes: self.min_notice_minutes,
            max_lead_days: self.max_lead_days,
            required_resource_type: self.required_resource_type,
            max_capacity: self.max_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRequest {
    pub resource_type: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockDto {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub is_unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub blocks: Vec<BlockDto>,
}

impl ScheduleRequest {
    pub fn into_blocks(self, owner: Owner) -> Result<Vec<ScheduleBlock>, AppError> {
        self.blocks
            .into_iter()
            .map(|b| {
                Ok(ScheduleBlock {
                    owner,
                    day_of_week: b.day_of_week,
                    start_time: parse_wall_time(&b.start_time)?,
                    end_time: parse_wall_time(&b.end_time)?,
                    is_unavailable: b.is_unavailable,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionRequestDto {
    pub professional_id: Option<Ulid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionDto {
    pub id: Ulid,
    pub professional_id: Option<Ulid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl From<AvailabilityException> for ExceptionDto {
    fn from(e: AvailabilityException) -> Self {
        Self {
            id: e.id,
            professional_id: e.professional_id,
            start: ms_to_utc(e.span.start),
            end: ms_to_utc(e.span.end),
            reason: e.reason,
        }
    }
}
