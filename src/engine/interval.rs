use crate::model::*;

// ── Stepping ─────────────────────────────────────────────────────

/// Instants `start, start + step, …` strictly before `end`.
///
/// A plain value: iterating it does not consume it, so the same range can be
/// walked any number of times. Empty when `end <= start` or `step_minutes == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRange {
    start: Ms,
    end: Ms,
    step: Ms,
}

pub fn step_range(start: Ms, end: Ms, step_minutes: u32) -> StepRange {
    StepRange {
        start,
        end,
        step: minutes(step_minutes),
    }
}

impl StepRange {
    pub fn iter(&self) -> StepIter {
        StepIter {
            next: self.start,
            end: self.end,
            step: self.step,
        }
    }
}

impl IntoIterator for StepRange {
    type Item = Ms;
    type IntoIter = StepIter;

    fn into_iter(self) -> StepIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct StepIter {
    next: Ms,
    end: Ms,
    step: Ms,
}

impl Iterator for StepIter {
    type Item = Ms;

    fn next(&mut self) -> Option<Ms> {
        if self.step <= 0 || self.next >= self.end {
            return None;
        }
        let current = self.next;
        self.next = current.saturating_add(self.step);
        Some(current)
    }
}

// ── Interval sets ────────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Sort then merge.
pub fn normalize(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by_key(|s| (s.start, s.end));
    merge_overlapping(&spans)
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` may overlap itself.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

/// Sweep line: time ranges where at least `capacity` of `allocs` are active at once.
/// Result is sorted and disjoint. `allocs` need not be sorted.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return normalize(allocs.to_vec());
    }

    // Ends sort before starts at the same instant: touching allocations never stack.
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_unstable();

    let mut result: Vec<Span> = Vec::new();
    let mut count: i64 = 0;
    let mut saturated_start: Option<Ms> = None;
    let threshold = i64::from(capacity);

    for (time, delta) in events {
        count += i64::from(delta);
        if count >= threshold && saturated_start.is_none() {
            saturated_start = Some(time);
        } else if count < threshold
            && let Some(start) = saturated_start.take()
            && time > start
        {
            result.push(Span::new(start, time));
        }
    }

    merge_overlapping(&result)
}

/// Union of several window lists: an instant is covered if any list covers it.
pub fn union_all<'a>(lists: impl IntoIterator<Item = &'a [Span]>) -> Vec<Span> {
    normalize(lists.into_iter().flatten().copied().collect())
}

/// True if any span in sorted, disjoint `windows` fully contains `span`.
pub fn covered_by(windows: &[Span], span: &Span) -> bool {
    let idx = windows.partition_point(|w| w.end < span.end);
    windows.get(idx).is_some_and(|w| w.contains_span(span))
}
