use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::{Repository, Transaction};

use super::intervals::{find_gaps, merge_pass, merge_slot_rows, slice_window};
use super::AvailabilityError;

pub(crate) fn ensure_aligned(window: &TimeWindow) -> Result<(), AvailabilityError> {
    if !window.is_aligned(SLOT_ALIGNMENT_MINUTES) {
        return Err(AvailabilityError::Validation(format!(
            "Slot boundaries must fall on {SLOT_ALIGNMENT_MINUTES}-minute marks: {window}"
        )));
    }
    Ok(())
}

pub(crate) fn duplicate_error(date: NaiveDate, window: &TimeWindow) -> AvailabilityError {
    AvailabilityError::Conflict(format!("Time slot {window} already exists on {date}"))
}

fn slot_not_found(id: Ulid) -> AvailabilityError {
    AvailabilityError::NotFound(format!("Availability slot {id} not found"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Rows folded into a neighbour and deleted.
    pub absorbed: usize,
    pub slots: Vec<AvailabilitySlot>,
}

/// Window CRUD plus merge and split over one instructor-date.
///
/// Merging never looks at bookings; removing availability never cancels one.
#[derive(Clone)]
pub struct SlotManager {
    repo: Arc<dyn Repository>,
}

impl SlotManager {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn slots_for_date(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityError> {
        Ok(self.repo.slots_on(instructor_id, date).await?)
    }

    async fn require_slot(&self, id: Ulid) -> Result<AvailabilitySlot, AvailabilityError> {
        self.repo.get_slot(id).await?.ok_or_else(|| slot_not_found(id))
    }

    /// Insert a window; with `auto_merge` the day is merged in the same
    /// transaction. Returns the row that now covers the window.
    pub async fn create_slot(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        window: TimeWindow,
        auto_merge: bool,
    ) -> Result<AvailabilitySlot, AvailabilityError> {
        ensure_aligned(&window)?;
        let existing = self.repo.slots_on(instructor_id, date).await?;
        if existing.iter().any(|row| row.window == window) {
            return Err(duplicate_error(date, &window));
        }
        if existing.len() >= MAX_WINDOWS_PER_DAY {
            return Err(AvailabilityError::Validation(format!(
                "At most {MAX_WINDOWS_PER_DAY} windows per day"
            )));
        }

        let slot = AvailabilitySlot::new(instructor_id, date, window);
        let mut tx = self.repo.begin().await?;
        tx.create_slot(slot.clone());
        if !auto_merge {
            self.repo.commit(tx).await?;
            return Ok(slot);
        }

        let mut rows = existing;
        rows.push(slot.clone());
        let plan = merge_slot_rows(&rows);
        stage_merge(&mut tx, instructor_id, &plan.updated, &plan.removed);
        self.repo.commit(tx).await?;

        let covering = plan
            .result
            .into_iter()
            .find(|row| row.window.contains(&window))
            .unwrap_or(slot);
        debug!("created {window} on {date} for {instructor_id} as {}", covering.window);
        Ok(covering)
    }

    /// Move a row to a new window on the same date. No merge runs.
    pub async fn update_slot(&self, id: Ulid, window: TimeWindow) -> Result<AvailabilitySlot, AvailabilityError> {
        ensure_aligned(&window)?;
        let mut slot = self.require_slot(id).await?;
        let siblings = self.repo.slots_on(slot.instructor_id, slot.date).await?;
        if siblings.iter().any(|row| row.id != id && row.window == window) {
            return Err(duplicate_error(slot.date, &window));
        }
        slot.window = window;
        let mut tx = self.repo.begin().await?;
        tx.update_slot(slot.clone());
        self.repo.commit(tx).await?;
        Ok(slot)
    }

    /// Unconditional: bookings inside the window are left alone.
    pub async fn delete_slot(&self, id: Ulid) -> Result<AvailabilitySlot, AvailabilityError> {
        let slot = self.require_slot(id).await?;
        let mut tx = self.repo.begin().await?;
        tx.delete_slot(slot.instructor_id, id);
        self.repo.commit(tx).await?;
        Ok(slot)
    }

    /// Persist a merge pass over one day.
    pub async fn merge_slots(&self, instructor_id: Ulid, date: NaiveDate) -> Result<MergeOutcome, AvailabilityError> {
        let rows = self.repo.slots_on(instructor_id, date).await?;
        let plan = merge_slot_rows(&rows);
        if !plan.is_noop() {
            let mut tx = self.repo.begin().await?;
            stage_merge(&mut tx, instructor_id, &plan.updated, &plan.removed);
            self.repo.commit(tx).await?;
        }
        Ok(MergeOutcome {
            absorbed: plan.removed.len(),
            slots: plan.result,
        })
    }

    /// Split at a strictly interior, aligned point. The original row keeps
    /// the first half.
    pub async fn split_slot(
        &self,
        id: Ulid,
        at: NaiveTime,
    ) -> Result<(AvailabilitySlot, AvailabilitySlot), AvailabilityError> {
        let slot = self.require_slot(id).await?;
        let at_minute = time_to_minute(at);
        if at_minute <= slot.window.start_minute() || at_minute >= slot.window.end_minute() {
            return Err(AvailabilityError::Validation(format!(
                "Split point {} must be strictly inside {}",
                at.format("%H:%M"),
                slot.window
            )));
        }
        if at_minute % SLOT_ALIGNMENT_MINUTES != 0 {
            return Err(AvailabilityError::Validation(format!(
                "Split point {} must fall on a {SLOT_ALIGNMENT_MINUTES}-minute mark",
                at.format("%H:%M")
            )));
        }

        let mut first = slot.clone();
        first.window = TimeWindow::from_minutes(slot.window.start_minute(), at_minute)?;
        let second = AvailabilitySlot::new(
            slot.instructor_id,
            slot.date,
            TimeWindow::from_minutes(at_minute, slot.window.end_minute())?,
        );

        let mut tx = self.repo.begin().await?;
        tx.update_slot(first.clone());
        tx.create_slot(second.clone());
        self.repo.commit(tx).await?;
        Ok((first, second))
    }

    pub async fn find_gaps(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        min_gap_minutes: u32,
    ) -> Result<Vec<TimeWindow>, AvailabilityError> {
        let windows: Vec<TimeWindow> = self
            .repo
            .slots_on(instructor_id, date)
            .await?
            .into_iter()
            .map(|row| row.window)
            .collect();
        Ok(find_gaps(&windows, min_gap_minutes))
    }

    /// Candidate booking windows of `duration_minutes`, taken only from
    /// windows that no confirmed or completed booking touches.
    pub async fn optimize_availability(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<TimeWindow>, AvailabilityError> {
        if duration_minutes == 0 {
            return Err(AvailabilityError::Validation("Duration must be positive".into()));
        }
        let rows = self.repo.slots_on(instructor_id, date).await?;
        let windows = merge_pass(&rows.iter().map(|row| row.window).collect::<Vec<_>>());
        let booked: Vec<TimeWindow> = self
            .repo
            .bookings_on(instructor_id, date)
            .await?
            .into_iter()
            .filter(|b| b.status.blocks_time())
            .map(|b| b.window)
            .collect();

        Ok(windows
            .iter()
            .filter(|w| !booked.iter().any(|b| b.overlaps(w)))
            .flat_map(|w| slice_window(w, duration_minutes))
            .collect())
    }
}

fn stage_merge(tx: &mut Transaction, instructor_id: Ulid, updated: &[AvailabilitySlot], removed: &[Ulid]) {
    for id in removed {
        tx.delete_slot(instructor_id, *id);
    }
    for row in updated {
        tx.update_slot(row.clone());
    }
}
