use ulid::Ulid;

use crate::limits::MERGE_GAP_TOLERANCE_MINUTES;
use crate::model::*;

// ── Merge pass ────────────────────────────────────────────────────

fn mergeable(last: &TimeWindow, next: &TimeWindow) -> bool {
    next.start_minute() <= last.end_minute() + MERGE_GAP_TOLERANCE_MINUTES
}

/// Sort by start and coalesce windows whose gap is at most one minute.
/// Idempotent and independent of input order.
pub fn merge_pass(windows: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut sorted = windows.to_vec();
    sorted.sort();
    let mut merged: Vec<TimeWindow> = Vec::with_capacity(sorted.len());
    for w in sorted {
        if let Some(last) = merged.last_mut()
            && mergeable(last, &w)
        {
            *last = last.merged_with(&w);
            continue;
        }
        merged.push(w);
    }
    merged
}

/// Row-level outcome of merging one day's stored slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// Rows whose window grew to cover a merged group (id kept).
    pub updated: Vec<AvailabilitySlot>,
    /// Rows absorbed into a neighbour.
    pub removed: Vec<Ulid>,
    /// Final rows for the day, sorted by start.
    pub result: Vec<AvailabilitySlot>,
}

impl MergePlan {
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Merge stored rows for a single instructor-date. The earliest row of each
/// group keeps its id; the others are removed.
pub fn merge_slot_rows(rows: &[AvailabilitySlot]) -> MergePlan {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| a.window.cmp(&b.window).then(a.id.cmp(&b.id)));

    let mut plan = MergePlan::default();
    let mut originals: Vec<TimeWindow> = Vec::new();
    for row in sorted {
        if let Some(last) = plan.result.last_mut()
            && mergeable(&last.window, &row.window)
        {
            last.window = last.window.merged_with(&row.window);
            plan.removed.push(row.id);
            continue;
        }
        originals.push(row.window);
        plan.result.push(row);
    }
    for (row, original) in plan.result.iter().zip(&originals) {
        if row.window != *original {
            plan.updated.push(row.clone());
        }
    }
    plan
}

/// Whether any two windows in the set strictly overlap.
pub fn windows_overlap(windows: &[TimeWindow]) -> bool {
    let mut sorted = windows.to_vec();
    sorted.sort();
    sorted.windows(2).any(|pair| pair[0].overlaps(&pair[1]))
}

// ── Gaps & subtraction ───────────────────────────────────────────

/// Gaps between consecutive merged windows that are at least `min_gap_minutes` long.
pub fn find_gaps(windows: &[TimeWindow], min_gap_minutes: u32) -> Vec<TimeWindow> {
    let merged = merge_pass(windows);
    merged
        .windows(2)
        .filter_map(|pair| TimeWindow::from_minutes(pair[0].end_minute(), pair[1].start_minute()).ok())
        .filter(|gap| gap.duration_minutes() >= min_gap_minutes)
        .collect()
}

/// Remove every window in `to_remove` (sorted by start) from `base` (sorted, disjoint).
pub fn subtract_windows(base: &[TimeWindow], to_remove: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut result = Vec::new();
    let mut ri = 0;

    for b in base {
        let mut current_start = b.start_minute();
        let current_end = b.end_minute();

        while ri < to_remove.len() && to_remove[ri].end_minute() <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start_minute() < current_end {
            let r = &to_remove[j];
            if r.start_minute() > current_start
                && let Ok(piece) = TimeWindow::from_minutes(current_start, r.start_minute())
            {
                result.push(piece);
            }
            current_start = current_start.max(r.end_minute());
            j += 1;
        }

        if current_start < current_end
            && let Ok(piece) = TimeWindow::from_minutes(current_start, current_end)
        {
            result.push(piece);
        }
    }

    result
}

/// Back-to-back `duration`-sized pieces of `window`, dropping any remainder.
pub fn slice_window(window: &TimeWindow, duration_minutes: u32) -> Vec<TimeWindow> {
    if duration_minutes == 0 {
        return Vec::new();
    }
    let step = duration_minutes.min(u32::from(u16::MAX)) as u16;
    let mut pieces = Vec::new();
    let mut start = window.start_minute();
    while u32::from(start) + duration_minutes <= u32::from(window.end_minute()) {
        if let Ok(piece) = TimeWindow::from_minutes(start, start + step) {
            pieces.push(piece);
        }
        start += step;
    }
    pieces
}
