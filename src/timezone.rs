//! Instructor-local clock. Every date-relative rule (past dates, minimum
//! advance, "today") is evaluated in the instructor's own IANA zone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use ulid::Ulid;

use crate::config::ConfigError;
use crate::model::TimeWindow;

pub trait TimezoneProvider: Send + Sync {
    fn timezone_for(&self, instructor_id: Ulid) -> Tz;

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Wall-clock time at the instructor's location.
    fn now_for(&self, instructor_id: Ulid) -> NaiveDateTime {
        self.now_utc()
            .with_timezone(&self.timezone_for(instructor_id))
            .naive_local()
    }

    fn today_for(&self, instructor_id: Ulid) -> NaiveDate {
        self.now_for(instructor_id).date()
    }
}

/// One reading of an instructor's local clock, shared by every past-time
/// check within an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNow {
    pub today: NaiveDate,
    pub time: NaiveTime,
}

impl LocalNow {
    pub fn read(clock: &dyn TimezoneProvider, instructor_id: Ulid) -> Self {
        let now = clock.now_for(instructor_id);
        Self {
            today: now.date(),
            time: now.time(),
        }
    }

    /// A window is past when its date is before today, or it is today and
    /// it has already started.
    pub fn is_past(&self, date: NaiveDate, window: &TimeWindow) -> bool {
        date < self.today || (date == self.today && window.start() <= self.time)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
}

/// Registered zones per instructor, falling back to a default.
pub struct InstructorTimezones {
    default: Tz,
    zones: DashMap<Ulid, Tz>,
    frozen: Option<DateTime<Utc>>,
}

impl InstructorTimezones {
    pub fn new(default: Tz) -> Self {
        Self {
            default,
            zones: DashMap::new(),
            frozen: None,
        }
    }

    /// Pin "now" for deterministic tests and replays.
    pub fn with_fixed_now(mut self, now: DateTime<Utc>) -> Self {
        self.frozen = Some(now);
        self
    }

    pub fn set_timezone(&self, instructor_id: Ulid, tz: Tz) {
        self.zones.insert(instructor_id, tz);
    }

    pub fn default_timezone(&self) -> Tz {
        self.default
    }
}

impl TimezoneProvider for InstructorTimezones {
    fn timezone_for(&self, instructor_id: Ulid) -> Tz {
        self.zones
            .get(&instructor_id)
            .map(|e| *e.value())
            .unwrap_or(self.default)
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.frozen.unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_date_differs_from_utc() {
        // 02:00 UTC on the 15th is still the 14th in New York
        let now = Utc.with_ymd_and_hms(2025, 7, 15, 2, 0, 0).unwrap();
        let tz = InstructorTimezones::new(chrono_tz::America::New_York).with_fixed_now(now);
        let instructor = Ulid::new();
        assert_eq!(tz.today_for(instructor), NaiveDate::from_ymd_opt(2025, 7, 14).unwrap());

        tz.set_timezone(instructor, chrono_tz::Asia::Tokyo);
        assert_eq!(tz.today_for(instructor), NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
        assert_eq!(tz.now_for(instructor).format("%H:%M").to_string(), "11:00");
    }

    #[test]
    fn past_windows() {
        let now = Utc.with_ymd_and_hms(2025, 7, 15, 14, 0, 0).unwrap(); // 10:00 in New York
        let tz = InstructorTimezones::new(chrono_tz::America::New_York).with_fixed_now(now);
        let local = LocalNow::read(&tz, Ulid::new());
        let today = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let w = |a, b| TimeWindow::parse(a, b).unwrap();

        assert!(local.is_past(today.pred_opt().unwrap(), &w("18:00", "19:00")));
        assert!(local.is_past(today, &w("09:00", "11:00")));
        assert!(local.is_past(today, &w("10:00", "11:00")));
        assert!(!local.is_past(today, &w("10:15", "11:00")));
        assert!(!local.is_past(today.succ_opt().unwrap(), &w("00:00", "01:00")));
    }

    #[test]
    fn parse_rejects_unknown_zone() {
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }
}
