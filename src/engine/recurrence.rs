use chrono::{Days, Months, NaiveDateTime};
use chrono_tz::Tz;
use thiserror::Error;

use crate::model::*;

use super::schedule::{local_datetime, local_instant};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("series would exceed {cap} occurrences")]
    TooManyOccurrences { cap: usize },
    #[error("series end date is before the first occurrence")]
    EndBeforeStart,
    #[error("first occurrence is outside the supported time range")]
    StartOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    /// First occurrence included, in order.
    pub occurrences: Vec<Span>,
    pub warnings: Vec<ValidationWarning>,
}

fn nth_local(first: NaiveDateTime, kind: RecurrenceKind, n: u32) -> Option<NaiveDateTime> {
    match kind {
        RecurrenceKind::Daily => first.checked_add_days(Days::new(u64::from(n))),
        RecurrenceKind::Weekly => first.checked_add_days(Days::new(7 * u64::from(n))),
        RecurrenceKind::Monthly => first.checked_add_months(Months::new(n)),
    }
}

/// Expand `first` into every occurrence whose local start date is on or before
/// `rule.series_end_date`.
///
/// Occurrence `n` is `n` units after the first occurrence's wall-clock start in
/// `tz` (month steps clamp to the month's last day), and keeps the first
/// occurrence's duration. Exceeding `cap` is an error, never a truncation.
pub fn expand(first: Span, rule: &RecurrenceRule, tz: Tz, cap: usize) -> Result<Series, RecurrenceError> {
    let local_first = local_datetime(tz, first.start).ok_or(RecurrenceError::StartOutOfRange)?;
    if rule.series_end_date < local_first.date() {
        return Err(RecurrenceError::EndBeforeStart);
    }
    let duration = first.duration_ms();

    let mut occurrences = vec![first];
    let mut warnings = Vec::new();
    for n in 1.. {
        let Some(local) = nth_local(local_first, rule.kind, n) else {
            break;
        };
        if local.date() > rule.series_end_date {
            break;
        }
        if occurrences.len() >= cap {
            return Err(RecurrenceError::TooManyOccurrences { cap });
        }
        let (start, warning) = local_instant(tz, local);
        warnings.extend(warning);
        occurrences.push(Span::new(start, start + duration));
    }
    Ok(Series {
        occurrences,
        warnings,
    })
}
