//! Weekly schedule → absolute open windows for one calendar day.
//!
//! Blocks are wall-clock times in the company timezone. The timezone is applied
//! exactly once, when each boundary is turned into a UTC instant; everything after
//! that is millisecond arithmetic.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::model::*;

use super::interval::{normalize, subtract_intervals, union_all};

/// Longest DST gap we will walk across when shifting a nonexistent local time.
const MAX_GAP_MINUTES: i64 = 180;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDay {
    /// Sorted, disjoint open windows.
    pub windows: Vec<Span>,
    pub warnings: Vec<ValidationWarning>,
}

/// Day-of-week index with 0 = Sunday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

/// Resolve a local wall-clock time to a UTC instant.
///
/// Ambiguous times (clocks going back) take the earlier instant; nonexistent times
/// (clocks going forward) move to the first valid minute after the gap. Either case
/// is reported as a warning.
pub fn local_instant(tz: Tz, local: NaiveDateTime) -> (Ms, Option<ValidationWarning>) {
    let mapped = tz.from_local_datetime(&local);
    if let Some(at) = mapped.single() {
        return (at.timestamp_millis(), None);
    }
    if let Some(at) = mapped.earliest() {
        let chosen = at.timestamp_millis();
        let warning = ValidationWarning::DstAmbiguous {
            date: local.date(),
            local_time: local.time(),
            chosen,
        };
        return (chosen, Some(warning));
    }

    for shift in 1..=MAX_GAP_MINUTES {
        let candidate = local + Duration::minutes(shift);
        if let Some(at) = tz.from_local_datetime(&candidate).earliest() {
            let shifted_to = at.timestamp_millis();
            let warning = ValidationWarning::DstGapShifted {
                date: local.date(),
                local_time: local.time(),
                shifted_to,
            };
            return (shifted_to, Some(warning));
        }
    }

    // No real zone has a gap this long; read the wall clock as UTC.
    (local.and_utc().timestamp_millis(), None)
}

/// Wall-clock reading of `ms` in `tz`.
pub fn local_datetime(tz: Tz, ms: Ms) -> Option<NaiveDateTime> {
    ms_to_utc(ms).map(|at| at.with_timezone(&tz).naive_local())
}

/// `[local midnight, next local midnight)` for `date`.
pub fn day_bounds(tz: Tz, date: NaiveDate) -> Span {
    let (start, _) = local_instant(tz, date.and_time(NaiveTime::MIN));
    let next = date.succ_opt().unwrap_or(date);
    let (end, _) = local_instant(tz, next.and_time(NaiveTime::MIN));
    Span::checked(start, end).unwrap_or(Span::new(start, start + DAY_MS))
}

fn block_span(
    tz: Tz,
    date: NaiveDate,
    block: &ScheduleBlock,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<Span> {
    let (start, w) = local_instant(tz, date.and_time(block.start_time));
    warnings.extend(w);
    let end_local = if block.ends_at_midnight() {
        date.succ_opt()?.and_time(NaiveTime::MIN)
    } else {
        date.and_time(block.end_time)
    };
    let (end, w) = local_instant(tz, end_local);
    warnings.extend(w);
    Span::checked(start, end)
}

/// Open windows on `date` from one owner's weekly blocks.
///
/// Only blocks whose `day_of_week` matches are considered. Unavailable blocks are
/// cut out of the open ones. No matching open block means the day is closed.
pub fn resolve_day(blocks: &[ScheduleBlock], date: NaiveDate, tz: Tz) -> ResolvedDay {
    let dow = weekday_index(date);
    let mut warnings = Vec::new();
    let mut open = Vec::new();
    let mut closed = Vec::new();

    for block in blocks.iter().filter(|b| b.day_of_week == dow) {
        if !block.is_well_formed() {
            tracing::warn!(?block, "skipping malformed schedule block");
            continue;
        }
        let Some(span) = block_span(tz, date, block, &mut warnings) else {
            continue;
        };
        if block.is_unavailable {
            closed.push(span);
        } else {
            open.push(span);
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(%date, count = warnings.len(), "DST transition adjusted schedule boundaries");
    }

    let open = normalize(open);
    let closed = normalize(closed);
    let windows = if closed.is_empty() {
        open
    } else {
        subtract_intervals(&open, &closed)
    };
    warnings.dedup();
    ResolvedDay { windows, warnings }
}

/// The at-least-one-open view across several owners. For display only: whether a
/// given owner can actually take a slot is decided per owner.
pub fn resolve_union(days: &[ResolvedDay]) -> ResolvedDay {
    let windows = union_all(days.iter().map(|d| d.windows.as_slice()));
    let mut warnings: Vec<ValidationWarning> =
        days.iter().flat_map(|d| d.warnings.iter().cloned()).collect();
    warnings.dedup();
    ResolvedDay { windows, warnings }
}
