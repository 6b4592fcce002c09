use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_PATTERN_RANGE_DAYS;
use crate::model::*;
use crate::observability::timed;
use crate::store::Repository;

use super::warming::{read_week_uncached, resolve_days, CacheWarmer, WarmOutcome};
use super::AvailabilityError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyWeekResult {
    pub from_week: NaiveDate,
    pub to_week: NaiveDate,
    pub slots_created: usize,
    pub week: WeekView,
    pub warm: WarmOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyPatternResult {
    pub from_week: NaiveDate,
    pub dates_processed: usize,
    pub slots_created: usize,
    pub warmed: Vec<WarmOutcome>,
}

/// Week-to-week copies and pattern fills. Both replace their target dates
/// outright in one transaction.
#[derive(Clone)]
pub struct WeekOperationService {
    repo: Arc<dyn Repository>,
    warmer: CacheWarmer,
}

impl WeekOperationService {
    pub fn new(repo: Arc<dyn Repository>, warmer: CacheWarmer) -> Self {
        Self { repo, warmer }
    }

    /// Resolved view of each Monday in `weeks` as it will read after the
    /// write, given the rows replacing each date.
    async fn projected_weeks(
        &self,
        instructor_id: Ulid,
        weeks: &[NaiveDate],
        replaced: &BTreeMap<NaiveDate, Vec<AvailabilitySlot>>,
    ) -> Result<Vec<WeekView>, AvailabilityError> {
        let (Some(first), Some(last)) = (weeks.first(), weeks.last()) else {
            return Ok(Vec::new());
        };
        let last = week_end(*last);
        let mut rows: Vec<AvailabilitySlot> = self
            .repo
            .slots_between(instructor_id, *first, last)
            .await?
            .into_iter()
            .filter(|row| !replaced.contains_key(&row.date))
            .collect();
        rows.extend(replaced.values().flatten().cloned());
        let blackouts = self.repo.blackouts_between(instructor_id, *first, last).await?;

        Ok(weeks
            .iter()
            .map(|monday| WeekView {
                instructor_id,
                week_start: *monday,
                days: resolve_days(&week_dates(*monday), &rows, &blackouts),
            })
            .collect())
    }

    /// Replace `to_week` with the resolved windows of `from_week`, day for day.
    pub async fn copy_week_availability(
        &self,
        instructor_id: Ulid,
        from_week: NaiveDate,
        to_week: NaiveDate,
    ) -> Result<CopyWeekResult, AvailabilityError> {
        timed("copy_week_availability", async {
            let from_week = ensure_monday(from_week)?;
            let to_week = ensure_monday(to_week)?;
            if from_week == to_week {
                return Err(AvailabilityError::Validation(format!(
                    "Cannot copy week {from_week} onto itself"
                )));
            }

            let source = read_week_uncached(self.repo.as_ref(), instructor_id, from_week).await?;
            let mut replaced: BTreeMap<NaiveDate, Vec<AvailabilitySlot>> = BTreeMap::new();
            for (src, dst) in week_dates(from_week).into_iter().zip(week_dates(to_week)) {
                let rows: Vec<AvailabilitySlot> = source
                    .windows_on(src)
                    .iter()
                    .map(|w| AvailabilitySlot::new(instructor_id, dst, *w))
                    .collect();
                replaced.insert(dst, rows);
            }
            let projected = self
                .projected_weeks(instructor_id, &[to_week], &replaced)
                .await?
                .pop()
                .unwrap_or_else(|| WeekView::empty(instructor_id, to_week));

            let mut tx = self.repo.begin().await?;
            tx.clear_dates(instructor_id, &week_dates(to_week));
            let slots_created: usize = replaced.values().map(Vec::len).sum();
            tx.create_slots(replaced.into_values().flatten());
            self.repo.commit(tx).await?;

            let (week, warm) = self
                .warmer
                .warm_with_verification(instructor_id, to_week, Some(projected.window_count()))
                .await;
            info!("copied week {from_week} -> {to_week} for {instructor_id}: {slots_created} slots");
            Ok(CopyWeekResult {
                from_week,
                to_week,
                slots_created,
                week: week.unwrap_or(projected),
                warm,
            })
        })
        .await
    }

    /// Stamp the day-of-week pattern of `from_week` onto every date in
    /// `[start, end]`. Weekdays without pattern windows end up empty.
    pub async fn apply_pattern_to_date_range(
        &self,
        instructor_id: Ulid,
        from_week: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ApplyPatternResult, AvailabilityError> {
        timed("apply_pattern_to_date_range", async {
            let from_week = ensure_monday(from_week)?;
            if end < start {
                return Err(AvailabilityError::Validation(format!(
                    "Range end {end} is before start {start}"
                )));
            }
            if (end - start).num_days() >= MAX_PATTERN_RANGE_DAYS {
                return Err(AvailabilityError::Validation(format!(
                    "Range may cover at most {MAX_PATTERN_RANGE_DAYS} days"
                )));
            }

            let source = read_week_uncached(self.repo.as_ref(), instructor_id, from_week).await?;
            let pattern = WeekPattern::from_week(&source);
            let dates = dates_between(start, end);

            let replaced: BTreeMap<NaiveDate, Vec<AvailabilitySlot>> = dates
                .iter()
                .map(|date| {
                    let rows: Vec<AvailabilitySlot> = pattern
                        .windows_for(date.weekday())
                        .iter()
                        .map(|w| AvailabilitySlot::new(instructor_id, *date, *w))
                        .collect();
                    (*date, rows)
                })
                .collect();

            let mut weeks: Vec<NaiveDate> = dates.iter().map(|d| monday_of(*d)).collect();
            weeks.dedup();
            let expected: Vec<(NaiveDate, Option<usize>)> = self
                .projected_weeks(instructor_id, &weeks, &replaced)
                .await?
                .iter()
                .map(|week| (week.week_start, Some(week.window_count())))
                .collect();

            let mut tx = self.repo.begin().await?;
            tx.clear_dates(instructor_id, &dates);
            let slots_created: usize = replaced.values().map(Vec::len).sum();
            tx.create_slots(replaced.into_values().flatten());
            self.repo.commit(tx).await?;

            let warmed = self
                .warmer
                .warm_weeks(instructor_id, &expected)
                .await
                .into_iter()
                .map(|(_, outcome)| outcome)
                .collect();
            info!(
                "applied pattern of {from_week} to {start}..={end} for {instructor_id}: {slots_created} slots over {} dates",
                dates.len()
            );
            Ok(ApplyPatternResult {
                from_week,
                dates_processed: dates.len(),
                slots_created,
                warmed,
            })
        })
        .await
    }
}
