//! Preview of week edits as add/remove operations. Nothing here writes.
//!
//! The per-operation rules mirror what `save_week_availability` does with the
//! same input: misaligned windows fail, windows that have already started are
//! rejected, and removes must name a window the server still has.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{timed, BULK_OPERATIONS_VALIDATED_TOTAL};
use crate::store::Repository;
use crate::timezone::{LocalNow, TimezoneProvider};

use super::slots::ensure_aligned;
use super::warming::resolve_days;
use super::AvailabilityError;

pub type DayWindows = BTreeMap<NaiveDate, Vec<TimeWindow>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekDiff {
    pub operations: Vec<SlotOperation>,
    pub warnings: Vec<String>,
}

/// Three-way diff. Per date, windows in `saved` but not `current` become
/// removes (only when `existing` still has them), windows in `current` but
/// not `saved` become adds. Removes precede adds; both are sorted.
pub fn diff_week(existing: &DayWindows, saved: &DayWindows, current: &DayWindows) -> WeekDiff {
    let mut diff = WeekDiff::default();
    let dates: BTreeSet<NaiveDate> = saved.keys().chain(current.keys()).copied().collect();
    let empty = Vec::new();

    for date in dates {
        let before: BTreeSet<TimeWindow> = saved.get(&date).unwrap_or(&empty).iter().copied().collect();
        let after: BTreeSet<TimeWindow> = current.get(&date).unwrap_or(&empty).iter().copied().collect();
        let server = existing.get(&date).unwrap_or(&empty);

        for window in before.difference(&after) {
            if server.contains(window) {
                diff.operations.push(SlotOperation::remove(date, *window));
            } else {
                diff.warnings
                    .push(format!("{date} {window} was removed locally but no longer exists on the server"));
            }
        }
        for window in after.difference(&before) {
            diff.operations.push(SlotOperation::add(date, *window));
        }
    }
    diff
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationValidation {
    pub operation: SlotOperation,
    pub valid: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub add: ActionSummary,
    pub remove: ActionSummary,
}

impl BulkSummary {
    pub fn for_action(&self, action: OperationAction) -> &ActionSummary {
        match action {
            OperationAction::Add => &self.add,
            OperationAction::Remove => &self.remove,
        }
    }

    fn record(&mut self, action: OperationAction, valid: bool) {
        let entry = match action {
            OperationAction::Add => &mut self.add,
            OperationAction::Remove => &mut self.remove,
        };
        entry.total += 1;
        if valid {
            entry.valid += 1;
        } else {
            entry.invalid += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkValidationResult {
    pub operations: Vec<OperationValidation>,
    pub summary: BulkSummary,
    pub has_conflicts: bool,
    pub warnings: Vec<String>,
}

/// Server state the operations are judged against.
struct Context {
    local: LocalNow,
    existing: DayWindows,
    blackouts: BTreeSet<NaiveDate>,
}

fn validate_one(
    op: &SlotOperation,
    ctx: &Context,
    pending_adds: &mut BTreeSet<(NaiveDate, TimeWindow)>,
    warnings: &mut Vec<String>,
) -> Result<(), String> {
    let window = op.window().map_err(|e| e.to_string())?;
    ensure_aligned(&window).map_err(|e| e.to_string())?;
    if ctx.local.is_past(op.date, &window) {
        return Err(format!("{} {window} is in the past", op.date));
    }

    let server = ctx.existing.get(&op.date).map(Vec::as_slice).unwrap_or(&[]);
    match op.action {
        OperationAction::Add => {
            if server.contains(&window) || !pending_adds.insert((op.date, window)) {
                return Err(format!("Time slot {window} already exists on {}", op.date));
            }
            if let Some(neighbour) = server.iter().find(|w| w.overlaps(&window)) {
                warnings.push(format!("{} {window} overlaps {neighbour} and will merge", op.date));
            }
            if ctx.blackouts.contains(&op.date) {
                warnings.push(format!("{} is a blackout date; {window} stays hidden until it is removed", op.date));
            }
        }
        OperationAction::Remove => {
            if !server.contains(&window) {
                return Err(format!("Time slot {window} not found on {}", op.date));
            }
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct BulkOperationService {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn TimezoneProvider>,
}

impl BulkOperationService {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn TimezoneProvider>) -> Self {
        Self { repo, clock }
    }

    async fn load_context(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Context, AvailabilityError> {
        let rows = self.repo.slots_between(instructor_id, start, end).await?;
        let blackouts: BTreeSet<NaiveDate> = self
            .repo
            .blackouts_between(instructor_id, start, end)
            .await?
            .into_iter()
            .map(|b| b.date)
            .collect();
        let dates = dates_between(start, end);
        // Presence is judged against stored windows; blackout only warns.
        let existing = resolve_days(&dates, &rows, &[]);
        Ok(Context {
            local: LocalNow::read(self.clock.as_ref(), instructor_id),
            existing,
            blackouts,
        })
    }

    fn judge(ops: Vec<SlotOperation>, ctx: &Context, mut warnings: Vec<String>) -> BulkValidationResult {
        let mut result = BulkValidationResult::default();
        let mut pending_adds = BTreeSet::new();
        for op in ops {
            let outcome = validate_one(&op, ctx, &mut pending_adds, &mut warnings);
            let valid = outcome.is_ok();
            result.summary.record(op.action, valid);
            metrics::counter!(
                BULK_OPERATIONS_VALIDATED_TOTAL,
                "action" => op.action.to_string(),
                "valid" => if valid { "true" } else { "false" }
            )
            .increment(1);
            result.operations.push(OperationValidation {
                operation: op,
                valid,
                error: outcome.err(),
            });
        }
        result.has_conflicts = result.operations.iter().any(|o| !o.valid);
        result.warnings = warnings;
        result
    }

    /// Diff the client's week against its baseline and validate each resulting operation.
    pub async fn validate_week_changes(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
        saved: &DayWindows,
        current: &DayWindows,
    ) -> Result<BulkValidationResult, AvailabilityError> {
        timed("validate_week_changes", async {
            let week_start = ensure_monday(week_start)?;
            let last = week_end(week_start);
            if let Some(date) = saved.keys().chain(current.keys()).find(|d| **d < week_start || **d > last) {
                return Err(AvailabilityError::Validation(format!(
                    "{date} is outside the week starting {week_start}"
                )));
            }
            let ctx = self.load_context(instructor_id, week_start, last).await?;
            let diff = diff_week(&ctx.existing, saved, current);
            if diff.operations.len() > MAX_BULK_OPERATIONS {
                return Err(too_many(diff.operations.len()));
            }
            Ok(Self::judge(diff.operations, &ctx, diff.warnings))
        })
        .await
    }

    /// Validate an explicit list of operations.
    pub async fn validate_operations(
        &self,
        instructor_id: Ulid,
        operations: Vec<SlotOperation>,
    ) -> Result<BulkValidationResult, AvailabilityError> {
        timed("validate_operations", async {
            if operations.len() > MAX_BULK_OPERATIONS {
                return Err(too_many(operations.len()));
            }
            let (Some(start), Some(end)) = (
                operations.iter().map(|op| op.date).min(),
                operations.iter().map(|op| op.date).max(),
            ) else {
                return Ok(BulkValidationResult::default());
            };
            if (end - start).num_days() >= MAX_PATTERN_RANGE_DAYS {
                return Err(AvailabilityError::Validation(format!(
                    "Operations span more than {MAX_PATTERN_RANGE_DAYS} days"
                )));
            }
            let ctx = self.load_context(instructor_id, start, end).await?;
            Ok(Self::judge(operations, &ctx, Vec::new()))
        })
        .await
    }
}

fn too_many(count: usize) -> AvailabilityError {
    AvailabilityError::Validation(format!(
        "{count} operations exceeds the limit of {MAX_BULK_OPERATIONS}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn w(start: &str, end: &str) -> TimeWindow {
        TimeWindow::parse(start, end).unwrap()
    }

    fn days(entries: &[(&str, &[TimeWindow])]) -> DayWindows {
        entries.iter().map(|(date, ws)| (d(date), ws.to_vec())).collect()
    }

    #[test]
    fn removed_window_still_on_server_becomes_remove() {
        let mon = "2025-07-14";
        let existing = days(&[(mon, &[w("09:00", "10:00")])]);
        let saved = days(&[(mon, &[w("09:00", "10:00")])]);
        let current = days(&[(mon, &[])]);
        let diff = diff_week(&existing, &saved, &current);
        assert_eq!(diff.operations, vec![SlotOperation::remove(d(mon), w("09:00", "10:00"))]);
        assert!(diff.warnings.is_empty());
    }

    #[test]
    fn removed_window_gone_from_server_only_warns() {
        let mon = "2025-07-14";
        let saved = days(&[(mon, &[w("09:00", "10:00")])]);
        let current = days(&[(mon, &[])]);
        let diff = diff_week(&DayWindows::new(), &saved, &current);
        assert!(diff.operations.is_empty());
        assert_eq!(diff.warnings.len(), 1);
    }

    #[test]
    fn unchanged_windows_emit_nothing() {
        let mon = "2025-07-14";
        let both = days(&[(mon, &[w("09:00", "10:00"), w("13:00", "14:00")])]);
        let diff = diff_week(&both, &both, &both);
        assert!(diff.operations.is_empty());
    }

    #[test]
    fn adds_and_removes_across_days() {
        let existing = days(&[("2025-07-14", &[w("09:00", "10:00")])]);
        let saved = existing.clone();
        let current = days(&[
            ("2025-07-14", &[w("09:00", "09:30")]),
            ("2025-07-16", &[w("14:00", "15:00")]),
        ]);
        let diff = diff_week(&existing, &saved, &current);
        assert_eq!(
            diff.operations,
            vec![
                SlotOperation::remove(d("2025-07-14"), w("09:00", "10:00")),
                SlotOperation::add(d("2025-07-14"), w("09:00", "09:30")),
                SlotOperation::add(d("2025-07-16"), w("14:00", "15:00")),
            ]
        );
    }

    #[test]
    fn summary_counts() {
        let mut summary = BulkSummary::default();
        summary.record(OperationAction::Add, true);
        summary.record(OperationAction::Add, false);
        summary.record(OperationAction::Remove, true);
        assert_eq!(summary.for_action(OperationAction::Add), &ActionSummary { total: 2, valid: 1, invalid: 1 });
        assert_eq!(summary.for_action(OperationAction::Remove).valid, 1);
    }
}
