use crate::model::*;

use super::interval::step_range;

/// Temporal and sizing rules for one service, plus the company step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRules {
    pub duration_minutes: u32,
    pub buffer_minutes: u32,
    pub min_notice_minutes: u32,
    pub max_lead_days: Option<u32>,
    pub step_minutes: u32,
}

impl SlotRules {
    pub fn for_service(service: &Service, step_minutes: u32) -> Self {
        Self {
            duration_minutes: service.duration_minutes,
            buffer_minutes: service.buffer_minutes,
            min_notice_minutes: service.min_notice_minutes,
            max_lead_days: service.max_lead_days,
            step_minutes,
        }
    }

    pub fn earliest_start(&self, now: Ms) -> Ms {
        now + minutes(self.min_notice_minutes)
    }

    pub fn latest_start(&self, now: Ms) -> Option<Ms> {
        self.max_lead_days.map(|d| now + Ms::from(d) * DAY_MS)
    }

    /// `[start, start + duration)`.
    pub fn slot_span(&self, start: Ms) -> Span {
        Span::new(start, start + minutes(self.duration_minutes))
    }

    /// `[start, start + duration + buffer)`, the interval used for conflicts.
    pub fn effective_span(&self, start: Ms) -> Span {
        self.slot_span(start).expand(self.buffer_minutes)
    }
}

/// Candidate starts inside `windows`, in order.
///
/// Each window is walked from its opening boundary in `step_minutes` increments,
/// so candidates may overlap each other. A start is emitted while its effective
/// end still fits the window; starts that are too soon or too far ahead are
/// skipped without ending the walk.
pub fn generate_candidates(windows: &[Span], rules: &SlotRules, now: Ms) -> Vec<Ms> {
    if rules.duration_minutes == 0 {
        return Vec::new();
    }
    let earliest = rules.earliest_start(now);
    let latest = rules.latest_start(now);
    let total = minutes(rules.duration_minutes + rules.buffer_minutes);

    let mut out = Vec::new();
    for window in windows {
        for start in step_range(window.start, window.end, rules.step_minutes) {
            if start + total > window.end {
                break;
            }
            if start < earliest || latest.is_some_and(|l| start > l) {
                continue;
            }
            out.push(start);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Why a caller-chosen start would not have been offered as a slot.
pub fn temporal_warnings(start: Ms, rules: &SlotRules, now: Ms) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let earliest_allowed = rules.earliest_start(now);
    if start < earliest_allowed {
        warnings.push(ValidationWarning::TooSoon {
            start,
            earliest_allowed,
        });
    }
    if let Some(latest_allowed) = rules.latest_start(now)
        && start > latest_allowed
    {
        warnings.push(ValidationWarning::TooFarAhead {
            start,
            latest_allowed,
        });
    }
    warnings
}
