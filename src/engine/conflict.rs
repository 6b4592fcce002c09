use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::config::Config;
use crate::limits::*;
use crate::model::*;
use crate::store::Repository;
use crate::timezone::{LocalNow, TimezoneProvider};

use super::intervals::{merge_pass, subtract_windows};
use super::AvailabilityError;

/// Booking policy applied by [`ConflictChecker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRules {
    pub min_advance_hours: u32,
    pub min_minutes: u32,
    pub max_minutes: u32,
    /// Typical working hours; bookings outside only draw a warning.
    pub earliest: NaiveTime,
    pub latest: NaiveTime,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_advance_hours: DEFAULT_MIN_ADVANCE_HOURS,
            min_minutes: DEFAULT_MIN_BOOKING_MINUTES,
            max_minutes: DEFAULT_MAX_BOOKING_MINUTES,
            earliest: NaiveTime::from_hms_opt(DEFAULT_EARLIEST_HOUR, 0, 0).unwrap_or(NaiveTime::MIN),
            latest: NaiveTime::from_hms_opt(DEFAULT_LATEST_HOUR, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl BookingRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_advance_hours: config.min_advance_hours,
            min_minutes: config.min_booking_minutes,
            max_minutes: config.max_booking_minutes,
            ..Self::default()
        }
    }
}

/// A prospective booking to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Durations the service offers; `None` skips the duration warning.
    pub service_durations: Option<Vec<u32>>,
    /// Ignore this booking when rescheduling it.
    pub exclude_booking: Option<Ulid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookingValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BookingValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// End must be after start (with the end-of-day rule); the duration must lie
/// within `[min, max]`. Returns the duration in minutes.
pub fn validate_time_range(
    start: NaiveTime,
    end: NaiveTime,
    min_minutes: u32,
    max_minutes: u32,
) -> Result<u32, AvailabilityError> {
    let window = TimeWindow::new(start, end)?;
    let duration = window.duration_minutes();
    if duration < min_minutes {
        return Err(AvailabilityError::Validation(format!(
            "Duration of {duration} minutes is below the minimum of {min_minutes} minutes"
        )));
    }
    if duration > max_minutes {
        return Err(AvailabilityError::Validation(format!(
            "Duration of {duration} minutes exceeds the maximum of {max_minutes} minutes"
        )));
    }
    Ok(duration)
}

/// Overlap checks against bookings plus the date-relative booking rules.
#[derive(Clone)]
pub struct ConflictChecker {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn TimezoneProvider>,
    rules: BookingRules,
}

impl ConflictChecker {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn TimezoneProvider>, rules: BookingRules) -> Self {
        Self { repo, clock, rules }
    }

    pub fn rules(&self) -> &BookingRules {
        &self.rules
    }

    /// Confirmed or completed bookings that strictly overlap `window`.
    pub async fn check_booking_conflicts(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        window: TimeWindow,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Booking>, AvailabilityError> {
        let bookings = self.repo.bookings_on(instructor_id, date).await?;
        Ok(bookings
            .into_iter()
            .filter(|b| b.status.blocks_time())
            .filter(|b| Some(b.id) != exclude)
            .filter(|b| b.window.overlaps(&window))
            .collect())
    }

    /// Whether `date` at `start` is at least `min_advance_hours` ahead of the
    /// instructor's local now.
    pub fn check_minimum_advance_booking(&self, instructor_id: Ulid, date: NaiveDate, start: NaiveTime) -> bool {
        let now = self.clock.now_for(instructor_id);
        let earliest = now + Duration::hours(i64::from(self.rules.min_advance_hours));
        date.and_time(start) >= earliest
    }

    pub async fn check_blackout_date(&self, instructor_id: Ulid, date: NaiveDate) -> Result<bool, AvailabilityError> {
        Ok(self.repo.blackout_on(instructor_id, date).await?.is_some())
    }

    /// Blocking bookings on `date` as windows, sorted by start.
    pub async fn booked_windows_for_date(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TimeWindow>, AvailabilityError> {
        let mut windows: Vec<TimeWindow> = self
            .repo
            .bookings_on(instructor_id, date)
            .await?
            .into_iter()
            .filter(|b| b.status.blocks_time())
            .map(|b| b.window)
            .collect();
        windows.sort();
        Ok(windows)
    }

    pub async fn booked_windows_for_week(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, Vec<TimeWindow>>, AvailabilityError> {
        let week_start = ensure_monday(week_start)?;
        let mut days: BTreeMap<NaiveDate, Vec<TimeWindow>> =
            week_dates(week_start).into_iter().map(|d| (d, Vec::new())).collect();
        let bookings = self
            .repo
            .bookings_between(instructor_id, week_start, week_end(week_start))
            .await?;
        for booking in bookings.into_iter().filter(|b| b.status.blocks_time()) {
            if let Some(day) = days.get_mut(&booking.date) {
                day.push(booking.window);
            }
        }
        for windows in days.values_mut() {
            windows.sort();
        }
        Ok(days)
    }

    /// First free stretch of `duration_minutes` between `earliest` and
    /// `latest` (09:00 and 21:00 unless given), around blocking bookings.
    pub async fn find_next_available_time(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
        earliest: Option<NaiveTime>,
        latest: Option<NaiveTime>,
    ) -> Result<Option<TimeWindow>, AvailabilityError> {
        if duration_minutes == 0 {
            return Err(AvailabilityError::Validation("Duration must be positive".into()));
        }
        let bounds = TimeWindow::new(
            earliest.unwrap_or(self.rules.earliest),
            latest.unwrap_or(self.rules.latest),
        )?;
        let booked = merge_pass(&self.booked_windows_for_date(instructor_id, date).await?);
        let free = subtract_windows(&[bounds], &booked);

        Ok(free
            .into_iter()
            .find(|gap| gap.duration_minutes() >= duration_minutes)
            .and_then(|gap| {
                let end = gap.start_minute() + duration_minutes as Minute;
                TimeWindow::from_minutes(gap.start_minute(), end).ok()
            }))
    }

    /// Run every check; errors are fatal, warnings advisory.
    pub async fn validate_booking_constraints(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingValidation, AvailabilityError> {
        let mut result = BookingValidation::default();
        let instructor_id = request.instructor_id;

        let duration = match validate_time_range(
            request.start,
            request.end,
            self.rules.min_minutes,
            self.rules.max_minutes,
        ) {
            Ok(duration) => Some(duration),
            Err(e) => {
                result.errors.push(e.to_string());
                None
            }
        };

        let local = LocalNow::read(self.clock.as_ref(), instructor_id);
        if request.date < local.today {
            result.errors.push(format!("Cannot book {} because it is in the past", request.date));
        } else if !self.check_minimum_advance_booking(instructor_id, request.date, request.start) {
            result.errors.push(format!(
                "Bookings must be made at least {} hours in advance",
                self.rules.min_advance_hours
            ));
        }

        if self.check_blackout_date(instructor_id, request.date).await? {
            result
                .errors
                .push(format!("Instructor is unavailable on {} (blackout date)", request.date));
        }

        if let Ok(window) = TimeWindow::new(request.start, request.end) {
            for booking in self
                .check_booking_conflicts(instructor_id, request.date, window, request.exclude_booking)
                .await?
            {
                result.errors.push(format!(
                    "Conflicts with existing booking {} on {}",
                    booking.window, booking.date
                ));
            }

            let earliest = time_to_minute(self.rules.earliest);
            let latest = time_to_minute(self.rules.latest);
            if window.start_minute() < earliest || window.end_minute() > latest {
                result.warnings.push(format!(
                    "{window} falls outside typical hours {}-{}",
                    self.rules.earliest.format("%H:%M"),
                    self.rules.latest.format("%H:%M")
                ));
            }
        }

        if let (Some(duration), Some(offered)) = (duration, &request.service_durations)
            && !offered.is_empty()
            && !offered.contains(&duration)
        {
            result.warnings.push(format!(
                "Duration of {duration} minutes is not one of the service's durations {offered:?}"
            ));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_clock(s).unwrap()
    }

    #[test]
    fn time_range_bounds() {
        assert_eq!(validate_time_range(t("09:00"), t("10:30"), 30, 240).unwrap(), 90);
        let short = validate_time_range(t("09:00"), t("09:15"), 30, 240).unwrap_err();
        assert!(short.to_string().contains("minimum of 30"));
        let long = validate_time_range(t("08:00"), t("13:00"), 30, 240).unwrap_err();
        assert!(long.to_string().contains("maximum of 240"));
        assert!(validate_time_range(t("10:00"), t("09:00"), 30, 240).is_err());
    }

    #[test]
    fn time_range_end_of_day() {
        assert_eq!(validate_time_range(t("23:00"), t("00:00"), 30, 240).unwrap(), 60);
        assert!(validate_time_range(t("00:00"), t("00:00"), 30, 240).is_err());
    }

    #[test]
    fn default_rules() {
        let rules = BookingRules::default();
        assert_eq!(rules.earliest, t("09:00"));
        assert_eq!(rules.latest, t("21:00"));
        assert_eq!(rules.min_advance_hours, 2);
    }
}
