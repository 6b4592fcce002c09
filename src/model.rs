use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::AvailabilityError;
use crate::limits::MINUTES_PER_DAY;

/// Minutes since local midnight. `1440` is only ever a window end (24:00).
pub type Minute = u16;

/// Half-open time-of-day interval `[start, end)` at minute resolution.
///
/// An end of `00:00` paired with a non-midnight start means end of day and is
/// stored as minute 1440. `00:00-00:00` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "WindowRepr", into = "WindowRepr")]
pub struct TimeWindow {
    start: Minute,
    end: Minute,
}

/// Wire form. End of day is written `24:00:00` so `00:00-24:00` reads back.
#[derive(Serialize, Deserialize)]
struct WindowRepr {
    start: String,
    end: String,
}

impl TryFrom<WindowRepr> for TimeWindow {
    type Error = AvailabilityError;

    fn try_from(repr: WindowRepr) -> Result<Self, Self::Error> {
        TimeWindow::parse(&repr.start, &repr.end)
    }
}

impl From<TimeWindow> for WindowRepr {
    fn from(w: TimeWindow) -> Self {
        let end = if w.ends_at_midnight() {
            "24:00:00".to_string()
        } else {
            w.end_string()
        };
        WindowRepr {
            start: w.start_string(),
            end,
        }
    }
}

fn whole_minute(t: NaiveTime) -> Result<Minute, AvailabilityError> {
    if t.second() != 0 || t.nanosecond() != 0 {
        return Err(AvailabilityError::Validation(format!(
            "Time {} must be a whole minute",
            t.format("%H:%M:%S")
        )));
    }
    Ok((t.hour() * 60 + t.minute()) as Minute)
}

pub fn minute_to_time(minute: Minute) -> NaiveTime {
    let m = u32::from(minute % MINUTES_PER_DAY);
    NaiveTime::from_hms_opt(m / 60, m % 60, 0).unwrap_or(NaiveTime::MIN)
}

pub fn time_to_minute(t: NaiveTime) -> Minute {
    (t.hour() * 60 + t.minute()) as Minute
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(s: &str) -> Result<NaiveTime, AvailabilityError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| AvailabilityError::Validation(format!("Invalid time format: {s}")))
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, AvailabilityError> {
        let start_min = whole_minute(start)?;
        let mut end_min = whole_minute(end)?;
        if end_min == 0 && start_min != 0 {
            end_min = MINUTES_PER_DAY;
        }
        Self::from_minutes(start_min, end_min)
    }

    pub fn from_minutes(start: Minute, end: Minute) -> Result<Self, AvailabilityError> {
        if start >= MINUTES_PER_DAY || end > MINUTES_PER_DAY {
            return Err(AvailabilityError::Validation(format!(
                "Minute offset out of range: {start}-{end}"
            )));
        }
        if end <= start {
            return Err(AvailabilityError::Validation(format!(
                "End time {} must be after start time {}",
                fmt_minute(end),
                fmt_minute(start)
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse from clock strings. `24:00` is accepted as the end of the day.
    pub fn parse(start: &str, end: &str) -> Result<Self, AvailabilityError> {
        let start = parse_clock(start)?;
        if matches!(end, "24:00" | "24:00:00") {
            return Self::from_minutes(time_to_minute(start), MINUTES_PER_DAY);
        }
        Self::new(start, parse_clock(end)?)
    }

    pub fn start(&self) -> NaiveTime {
        minute_to_time(self.start)
    }

    /// Clock end; end of day comes back as `00:00`.
    pub fn end(&self) -> NaiveTime {
        minute_to_time(self.end)
    }

    pub fn start_minute(&self) -> Minute {
        self.start
    }

    pub fn end_minute(&self) -> Minute {
        self.end
    }

    pub fn duration_minutes(&self) -> u32 {
        u32::from(self.end - self.start)
    }

    pub fn ends_at_midnight(&self) -> bool {
        self.end == MINUTES_PER_DAY
    }

    /// Strict overlap: touching boundaries do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest window covering both.
    pub fn merged_with(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Both boundaries fall on a multiple of `step` minutes.
    pub fn is_aligned(&self, step: Minute) -> bool {
        self.start % step == 0 && self.end % step == 0
    }

    pub fn start_string(&self) -> String {
        self.start().format("%H:%M:%S").to_string()
    }

    pub fn end_string(&self) -> String {
        self.end().format("%H:%M:%S").to_string()
    }
}

fn fmt_minute(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", fmt_minute(self.start), fmt_minute(self.end))
    }
}

/// One stored availability row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
}

impl AvailabilitySlot {
    pub fn new(instructor_id: Ulid, date: NaiveDate, window: TimeWindow) -> Self {
        Self {
            id: Ulid::new(),
            instructor_id,
            date,
            window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutDate {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Only confirmed and completed bookings occupy the instructor's time.
    pub fn blocks_time(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }
}

/// A reservation owned by the booking system; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub status: BookingStatus,
    pub service_id: Option<Ulid>,
}

// ── Operations & week shapes ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationAction {
    Add,
    Remove,
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationAction::Add => f.write_str("add"),
            OperationAction::Remove => f.write_str("remove"),
        }
    }
}

/// A proposed add or remove. Removes are identified by `(date, start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOperation {
    pub action: OperationAction,
    pub date: NaiveDate,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

impl SlotOperation {
    pub fn add(date: NaiveDate, window: TimeWindow) -> Self {
        Self {
            action: OperationAction::Add,
            date,
            start: Some(window.start()),
            end: Some(window.end()),
        }
    }

    pub fn remove(date: NaiveDate, window: TimeWindow) -> Self {
        Self {
            action: OperationAction::Remove,
            date,
            start: Some(window.start()),
            end: Some(window.end()),
        }
    }

    /// Resolve the window; fails when either bound is missing or the range is invalid.
    ///
    /// An end of `00:00` always means end of day here, so an operation built
    /// from `00:00-24:00` resolves back to the full day.
    pub fn window(&self) -> Result<TimeWindow, AvailabilityError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end == NaiveTime::MIN => {
                TimeWindow::from_minutes(time_to_minute(start), MINUTES_PER_DAY)
            }
            (Some(start), Some(end)) => TimeWindow::new(start, end),
            _ => Err(AvailabilityError::Validation(format!(
                "{} operation on {} requires both start_time and end_time",
                self.action, self.date
            ))),
        }
    }
}

/// Monday-aligned seven-day map of date → merged windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekView {
    pub instructor_id: Ulid,
    pub week_start: NaiveDate,
    pub days: BTreeMap<NaiveDate, Vec<TimeWindow>>,
}

impl WeekView {
    pub fn empty(instructor_id: Ulid, week_start: NaiveDate) -> Self {
        Self {
            instructor_id,
            week_start,
            days: week_dates(week_start).into_iter().map(|d| (d, Vec::new())).collect(),
        }
    }

    pub fn window_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    pub fn windows_on(&self, date: NaiveDate) -> &[TimeWindow] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Day-of-week → windows, extracted from a week on demand and never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekPattern {
    days: [Vec<TimeWindow>; 7],
}

impl WeekPattern {
    pub fn from_week(week: &WeekView) -> Self {
        let mut pattern = Self::default();
        for (date, windows) in &week.days {
            let idx = date.weekday().num_days_from_monday() as usize;
            pattern.days[idx] = windows.clone();
        }
        pattern
    }

    pub fn windows_for(&self, weekday: Weekday) -> &[TimeWindow] {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn set(&mut self, weekday: Weekday, windows: Vec<TimeWindow>) {
        self.days[weekday.num_days_from_monday() as usize] = windows;
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    pub fn window_count(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }
}

/// Client payload for a whole-week save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekScheduleInput {
    pub week_start: NaiveDate,
    pub days: BTreeMap<NaiveDate, Vec<TimeWindow>>,
}

// ── Calendar helpers ─────────────────────────────────────────────

pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn ensure_monday(date: NaiveDate) -> Result<NaiveDate, AvailabilityError> {
    if date.weekday() != Weekday::Mon {
        return Err(AvailabilityError::Validation(format!(
            "Week start {date} must be a Monday"
        )));
    }
    Ok(date)
}

pub fn week_dates(week_start: NaiveDate) -> [NaiveDate; 7] {
    std::array::from_fn(|i| week_start + Duration::days(i as i64))
}

/// Sunday of the week starting at `week_start`.
pub fn week_end(week_start: NaiveDate) -> NaiveDate {
    week_start + Duration::days(6)
}

/// Inclusive date range.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}
