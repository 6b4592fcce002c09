use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::timed;
use crate::store::{Repository, Transaction};
use crate::timezone::{LocalNow, TimezoneProvider};

use super::bitset::{bits_from_windows, windows_from_bits, DayBitmap};
use super::intervals::{merge_pass, merge_slot_rows};
use super::slots::{ensure_aligned, SlotManager};
use super::warming::{resolve_days, CacheWarmer, ReadThroughCache, WarmOutcome};
use super::AvailabilityError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveWeekResult {
    pub week_start: NaiveDate,
    pub dates_cleared: Vec<NaiveDate>,
    pub windows_created: usize,
    pub skipped_past: usize,
    pub skipped_duplicate: usize,
    pub week: WeekView,
    pub warm: WarmOutcome,
}

/// Week-level reads and writes, blackout dates and the cache around them.
#[derive(Clone)]
pub struct AvailabilityService {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn TimezoneProvider>,
    slots: SlotManager,
    reader: ReadThroughCache,
    warmer: CacheWarmer,
}

impl AvailabilityService {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn TimezoneProvider>,
        slots: SlotManager,
        reader: ReadThroughCache,
        warmer: CacheWarmer,
    ) -> Self {
        Self {
            repo,
            clock,
            slots,
            reader,
            warmer,
        }
    }

    pub fn slot_manager(&self) -> &SlotManager {
        &self.slots
    }

    // ── Reads ────────────────────────────────────────────────────

    pub async fn get_week_availability(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
    ) -> Result<WeekView, AvailabilityError> {
        timed("get_week_availability", async {
            let week_start = ensure_monday(week_start)?;
            Ok(self.reader.get_or_load(instructor_id, week_start).await?)
        })
        .await
    }

    pub async fn get_availability_for_date(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TimeWindow>, AvailabilityError> {
        let week = self.get_week_availability(instructor_id, monday_of(date)).await?;
        Ok(week.windows_on(date).to_vec())
    }

    /// Day-of-week pattern of one week, derived on demand.
    pub async fn week_pattern(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
    ) -> Result<WeekPattern, AvailabilityError> {
        let week = self.get_week_availability(instructor_id, week_start).await?;
        Ok(WeekPattern::from_week(&week))
    }

    pub async fn get_week_bitmaps(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, DayBitmap>, AvailabilityError> {
        let week = self.get_week_availability(instructor_id, week_start).await?;
        Ok(week
            .days
            .iter()
            .map(|(date, windows)| (*date, bits_from_windows(windows)))
            .collect())
    }

    // ── Week saves ───────────────────────────────────────────────

    /// Replace whole days. With `clear_existing` all seven dates are
    /// replaced, otherwise only the dates present in `input`. Windows that
    /// have already started are skipped and never removed.
    pub async fn save_week_availability(
        &self,
        instructor_id: Ulid,
        input: WeekScheduleInput,
        clear_existing: bool,
    ) -> Result<SaveWeekResult, AvailabilityError> {
        timed("save_week_availability", self.save_week_inner(instructor_id, input, clear_existing)).await
    }

    async fn save_week_inner(
        &self,
        instructor_id: Ulid,
        input: WeekScheduleInput,
        clear_existing: bool,
    ) -> Result<SaveWeekResult, AvailabilityError> {
        let week_start = ensure_monday(input.week_start)?;
        let dates = week_dates(week_start);
        let last = week_end(week_start);
        for (date, windows) in &input.days {
            if *date < week_start || *date > last {
                return Err(AvailabilityError::Validation(format!(
                    "{date} is outside the week starting {week_start}"
                )));
            }
            if windows.len() > MAX_WINDOWS_PER_DAY {
                return Err(AvailabilityError::Validation(format!(
                    "At most {MAX_WINDOWS_PER_DAY} windows per day ({date})"
                )));
            }
            for window in windows {
                ensure_aligned(window)?;
            }
        }

        let targets: Vec<NaiveDate> = if clear_existing {
            dates.to_vec()
        } else {
            input.days.keys().copied().collect()
        };
        let local = LocalNow::read(self.clock.as_ref(), instructor_id);
        let existing = self.repo.slots_between(instructor_id, week_start, last).await?;
        let blackouts = self.repo.blackouts_between(instructor_id, week_start, last).await?;

        let mut tx = self.repo.begin().await?;
        let mut kept = existing.clone();

        // Future dates are cleared wholesale; today and earlier only lose rows that have not started.
        let future: Vec<NaiveDate> = targets.iter().copied().filter(|d| *d > local.today).collect();
        tx.clear_dates(instructor_id, &future);
        kept.retain(|row| !future.contains(&row.date));
        for row in existing.iter().filter(|r| targets.contains(&r.date) && r.date <= local.today) {
            if !local.is_past(row.date, &row.window) {
                tx.delete_slot(instructor_id, row.id);
                kept.retain(|k| k.id != row.id);
            }
        }

        let mut created = Vec::new();
        let mut skipped_past = 0;
        let mut skipped_duplicate = 0;
        for date in &targets {
            let mut seen = BTreeSet::new();
            let mut accepted = Vec::new();
            for window in input.days.get(date).map(Vec::as_slice).unwrap_or(&[]) {
                if local.is_past(*date, window) {
                    skipped_past += 1;
                } else if !seen.insert(*window) {
                    skipped_duplicate += 1;
                } else {
                    accepted.push(*window);
                }
            }
            let fresh: Vec<AvailabilitySlot> = merge_pass(&accepted)
                .into_iter()
                .map(|window| AvailabilitySlot::new(instructor_id, *date, window))
                .collect();
            if *date > local.today || fresh.is_empty() {
                created.extend(fresh);
            } else {
                fold_into_started(&mut tx, instructor_id, *date, fresh, &mut kept, &mut created);
            }
        }
        tx.create_slots(created.iter().cloned());
        self.repo.commit(tx).await?;

        let mut after = kept;
        after.extend(created.iter().cloned());
        let projected = WeekView {
            instructor_id,
            week_start,
            days: resolve_days(&dates, &after, &blackouts),
        };
        let (week, warm) = self
            .warmer
            .warm_with_verification(instructor_id, week_start, Some(projected.window_count()))
            .await;

        info!(
            "saved week {week_start} for {instructor_id}: {} dates replaced, {} windows created",
            targets.len(),
            created.len()
        );
        Ok(SaveWeekResult {
            week_start,
            dates_cleared: targets,
            windows_created: created.len(),
            skipped_past,
            skipped_duplicate,
            week: week.unwrap_or(projected),
            warm,
        })
    }

    /// Full-replace save from raw bitmaps.
    pub async fn save_week_bitmaps(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
        bitmaps: BTreeMap<NaiveDate, DayBitmap>,
    ) -> Result<SaveWeekResult, AvailabilityError> {
        let days = bitmaps
            .iter()
            .map(|(date, bitmap)| (*date, windows_from_bits(bitmap)))
            .collect();
        self.save_week_availability(instructor_id, WeekScheduleInput { week_start, days }, true)
            .await
    }

    // ── Single-slot writes ───────────────────────────────────────

    /// Add one window on a specific date, merged into its neighbours.
    pub async fn add_specific_date_slot(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        window: TimeWindow,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        timed("add_specific_date_slot", async {
            let local = LocalNow::read(self.clock.as_ref(), instructor_id);
            if local.is_past(date, &window) {
                return Err(AvailabilityError::Validation(format!(
                    "Cannot add availability in the past ({date} {window})"
                )));
            }
            if self.repo.blackout_on(instructor_id, date).await?.is_some() {
                return Err(AvailabilityError::Conflict(format!("{date} is a blackout date")));
            }
            let slot = self.slots.create_slot(instructor_id, date, window, true).await?;
            self.warmer
                .warm_with_verification(instructor_id, monday_of(date), None)
                .await;
            Ok(slot)
        })
        .await
    }

    pub async fn update_slot(&self, slot_id: Ulid, window: TimeWindow) -> Result<AvailabilitySlot, AvailabilityError> {
        timed("update_slot", async {
            let slot = self.slots.update_slot(slot_id, window).await?;
            self.warmer
                .warm_with_verification(slot.instructor_id, monday_of(slot.date), None)
                .await;
            Ok(slot)
        })
        .await
    }

    pub async fn delete_slot(&self, slot_id: Ulid) -> Result<AvailabilitySlot, AvailabilityError> {
        timed("delete_slot", async {
            let slot = self.slots.delete_slot(slot_id).await?;
            self.warmer
                .warm_with_verification(slot.instructor_id, monday_of(slot.date), None)
                .await;
            Ok(slot)
        })
        .await
    }

    // ── Blackout dates ───────────────────────────────────────────

    pub async fn add_blackout_date(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        reason: Option<String>,
    ) -> Result<BlackoutDate, AvailabilityError> {
        timed("add_blackout_date", async {
            if reason.as_ref().is_some_and(|r| r.len() > MAX_BLACKOUT_REASON_LEN) {
                return Err(AvailabilityError::Validation(format!(
                    "Reason must be at most {MAX_BLACKOUT_REASON_LEN} characters"
                )));
            }
            if date < self.clock.today_for(instructor_id) {
                return Err(AvailabilityError::Validation(format!(
                    "Cannot add a blackout date in the past ({date})"
                )));
            }
            if self.repo.blackout_on(instructor_id, date).await?.is_some() {
                return Err(AvailabilityError::Conflict(format!(
                    "Blackout date already exists for {date}"
                )));
            }

            let blackout = BlackoutDate {
                id: Ulid::new(),
                instructor_id,
                date,
                reason,
            };
            let mut tx = self.repo.begin().await?;
            tx.add_blackout(blackout.clone());
            self.repo.commit(tx).await?;
            self.warmer
                .warm_with_verification(instructor_id, monday_of(date), None)
                .await;
            info!("blackout {date} added for {instructor_id}");
            Ok(blackout)
        })
        .await
    }

    /// Blackout dates from today (instructor-local) onwards.
    pub async fn list_blackout_dates(&self, instructor_id: Ulid) -> Result<Vec<BlackoutDate>, AvailabilityError> {
        let today = self.clock.today_for(instructor_id);
        Ok(self.repo.blackouts_between(instructor_id, today, NaiveDate::MAX).await?)
    }

    pub async fn delete_blackout_date(
        &self,
        instructor_id: Ulid,
        blackout_id: Ulid,
    ) -> Result<BlackoutDate, AvailabilityError> {
        timed("delete_blackout_date", async {
            let blackout = self
                .repo
                .get_blackout(blackout_id)
                .await?
                .filter(|b| b.instructor_id == instructor_id)
                .ok_or_else(|| AvailabilityError::NotFound(format!("Blackout date {blackout_id} not found")))?;
            let mut tx = self.repo.begin().await?;
            tx.delete_blackout(instructor_id, blackout_id);
            self.repo.commit(tx).await?;
            self.warmer
                .warm_with_verification(instructor_id, monday_of(blackout.date), None)
                .await;
            info!("blackout {} removed for {instructor_id}", blackout.date);
            Ok(blackout)
        })
        .await
    }
}

/// Merge new rows for today or earlier into the rows that survived the clear
/// because they had already started. Surviving rows always sort first, so they
/// keep their ids; absorbed new rows are never inserted.
fn fold_into_started(
    tx: &mut Transaction,
    instructor_id: Ulid,
    date: NaiveDate,
    fresh: Vec<AvailabilitySlot>,
    kept: &mut Vec<AvailabilitySlot>,
    created: &mut Vec<AvailabilitySlot>,
) {
    let fresh_ids: BTreeSet<Ulid> = fresh.iter().map(|row| row.id).collect();
    let mut day: Vec<AvailabilitySlot> = kept.iter().filter(|row| row.date == date).cloned().collect();
    day.extend(fresh);

    let plan = merge_slot_rows(&day);
    for id in plan.removed.iter().filter(|id| !fresh_ids.contains(id)) {
        tx.delete_slot(instructor_id, *id);
    }
    for row in plan.updated.iter().filter(|row| !fresh_ids.contains(&row.id)) {
        tx.update_slot(row.clone());
    }
    kept.retain(|row| row.date != date);
    for row in plan.result {
        if fresh_ids.contains(&row.id) {
            created.push(row);
        } else {
            kept.push(row);
        }
    }
}
