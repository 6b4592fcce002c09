use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use ulid::Ulid;

use slotwise::cache::{BreakerState, CacheClient, InMemoryCache};
use slotwise::model::{monday_of, week_dates, TimeWindow, WeekScheduleInput};
use slotwise::store::WalStore;
use slotwise::timezone::InstructorTimezones;
use slotwise::{App, AvailabilityError, Config};

// ── Test infrastructure ──────────────────────────────────────

fn test_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotwise_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(dir: PathBuf) -> Config {
    Config {
        data_dir: dir,
        ..Config::default()
    }
}

/// A Monday comfortably in the future for the default timezone.
fn future_monday() -> NaiveDate {
    let today = Utc::now().with_timezone(&chrono_tz::America::New_York).date_naive();
    monday_of(today) + Duration::weeks(3)
}

fn w(start: &str, end: &str) -> TimeWindow {
    TimeWindow::parse(start, end).unwrap()
}

fn full_week(monday: NaiveDate, days: &[(usize, Vec<TimeWindow>)]) -> WeekScheduleInput {
    let dates = week_dates(monday);
    let mut map: BTreeMap<NaiveDate, Vec<TimeWindow>> = dates.iter().map(|d| (*d, Vec::new())).collect();
    for (offset, windows) in days {
        map.insert(dates[*offset], windows.clone());
    }
    WeekScheduleInput {
        week_start: monday,
        days: map,
    }
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn saved_week_survives_reopen() {
    let dir = test_data_dir();
    let instructor = Ulid::new();
    let monday = future_monday();

    let saved = {
        let app = App::open(config(dir.clone())).unwrap();
        let input = full_week(monday, &[(0, vec![w("09:00", "12:00")]), (3, vec![w("14:00", "16:00")])]);
        app.availability
            .save_week_availability(instructor, input, true)
            .await
            .unwrap()
            .week
    };

    let app = App::open(config(dir)).unwrap();
    let week = app.availability.get_week_availability(instructor, monday).await.unwrap();
    assert_eq!(week, saved);
    assert_eq!(week.window_count(), 2);
}

#[tokio::test]
async fn blackout_survives_reopen() {
    let dir = test_data_dir();
    let instructor = Ulid::new();
    let monday = future_monday();

    {
        let app = App::open(config(dir.clone())).unwrap();
        let input = full_week(monday, &[(1, vec![w("09:00", "10:00")])]);
        app.availability.save_week_availability(instructor, input, true).await.unwrap();
        app.availability
            .add_blackout_date(instructor, monday + Duration::days(1), Some("holiday".into()))
            .await
            .unwrap();
    }

    let app = App::open(config(dir)).unwrap();
    let blackouts = app.availability.list_blackout_dates(instructor).await.unwrap();
    assert_eq!(blackouts.len(), 1);
    assert_eq!(blackouts[0].reason.as_deref(), Some("holiday"));
    let week = app.availability.get_week_availability(instructor, monday).await.unwrap();
    assert_eq!(week.window_count(), 0);
}

#[tokio::test]
async fn full_day_window_survives_reopen() {
    let dir = test_data_dir();
    let a = Ulid::new();
    let b = Ulid::new();
    let monday = future_monday();

    {
        let app = App::open(config(dir.clone())).unwrap();
        let halves = full_week(monday, &[(0, vec![w("00:00", "12:00"), w("12:00", "24:00")])]);
        let saved = app.availability.save_week_availability(a, halves, true).await.unwrap();
        assert_eq!(saved.week.windows_on(monday), &[w("00:00", "24:00")]);
        assert!(saved.warm.cached);
        app.availability
            .save_week_availability(b, full_week(monday, &[(0, vec![w("09:00", "10:00")])]), true)
            .await
            .unwrap();
    }

    let app = App::open(config(dir)).unwrap();
    assert_eq!(
        app.availability.get_availability_for_date(a, monday).await.unwrap(),
        vec![w("00:00", "24:00")]
    );
    assert_eq!(
        app.availability.get_availability_for_date(b, monday).await.unwrap(),
        vec![w("09:00", "10:00")]
    );
}

// ── Week workflows ───────────────────────────────────────────

#[tokio::test]
async fn template_week_rolls_forward() {
    let app = App::open(config(test_data_dir())).unwrap();
    let instructor = Ulid::new();
    let template = future_monday();

    let input = full_week(
        template,
        &[
            (0, vec![w("09:00", "12:00"), w("13:00", "17:00")]),
            (2, vec![w("09:00", "12:00")]),
            (4, vec![w("10:00", "14:00")]),
        ],
    );
    app.availability.save_week_availability(instructor, input, true).await.unwrap();

    let next = template + Duration::weeks(1);
    let copied = app.weeks.copy_week_availability(instructor, template, next).await.unwrap();
    assert_eq!(copied.slots_created, 4);

    let range_start = template + Duration::weeks(2);
    let range_end = range_start + Duration::days(27);
    let applied = app
        .weeks
        .apply_pattern_to_date_range(instructor, template, range_start, range_end)
        .await
        .unwrap();
    assert_eq!(applied.dates_processed, 28);
    assert_eq!(applied.slots_created, 16);
    assert_eq!(applied.warmed.len(), 4);

    let source = app.availability.week_pattern(instructor, template).await.unwrap();
    for offset in 1..6 {
        let week = app
            .availability
            .week_pattern(instructor, template + Duration::weeks(offset))
            .await
            .unwrap();
        assert_eq!(week, source, "week +{offset}");
    }
}

#[tokio::test]
async fn preview_then_save_agrees() {
    let app = App::open(config(test_data_dir())).unwrap();
    let instructor = Ulid::new();
    let monday = future_monday();
    let dates = week_dates(monday);

    let baseline = full_week(monday, &[(0, vec![w("09:00", "10:00")]), (1, vec![w("09:00", "10:00")])]);
    app.availability.save_week_availability(instructor, baseline.clone(), true).await.unwrap();

    let mut edited = baseline.clone();
    edited.days.insert(dates[0], vec![w("09:00", "10:00"), w("15:00", "16:00")]);
    edited.days.insert(dates[1], Vec::new());

    let preview = app
        .bulk
        .validate_week_changes(instructor, monday, &baseline.days, &edited.days)
        .await
        .unwrap();
    assert!(!preview.has_conflicts);
    assert_eq!(preview.summary.add.valid, 1);
    assert_eq!(preview.summary.remove.valid, 1);

    let saved = app.availability.save_week_availability(instructor, edited.clone(), true).await.unwrap();
    for date in dates {
        assert_eq!(saved.week.windows_on(date), edited.days[&date].as_slice());
    }
}

#[tokio::test]
async fn instructors_are_isolated() {
    let app = App::open(config(test_data_dir())).unwrap();
    let a = Ulid::new();
    let b = Ulid::new();
    let monday = future_monday();

    app.availability
        .save_week_availability(a, full_week(monday, &[(0, vec![w("09:00", "10:00")])]), true)
        .await
        .unwrap();
    app.availability
        .save_week_availability(b, full_week(monday, &[(0, vec![w("13:00", "14:00")])]), true)
        .await
        .unwrap();

    assert_eq!(
        app.availability.get_availability_for_date(a, monday).await.unwrap(),
        vec![w("09:00", "10:00")]
    );
    assert_eq!(
        app.availability.get_availability_for_date(b, monday).await.unwrap(),
        vec![w("13:00", "14:00")]
    );
}

#[tokio::test]
async fn rejects_non_monday_week() {
    let app = App::open(config(test_data_dir())).unwrap();
    let tuesday = future_monday() + Duration::days(1);
    let err = app
        .availability
        .get_week_availability(Ulid::new(), tuesday)
        .await
        .unwrap_err();
    assert!(matches!(err, AvailabilityError::Validation(_)));
    assert_eq!(err.kind(), "validation");
}

// ── Cache degradation ────────────────────────────────────────

fn app_with_cache(cache: Arc<InMemoryCache>, cooldown_secs: u64) -> App {
    let dir = test_data_dir();
    let config = Config {
        cache_failure_threshold: 3,
        cache_cooldown_secs: cooldown_secs,
        ..config(dir)
    };
    let store = Arc::new(WalStore::open(config.wal_path()).unwrap());
    let timezones = Arc::new(InstructorTimezones::new(config.default_timezone));
    App::with_parts(config, store, cache, timezones)
}

#[tokio::test]
async fn breaker_opens_and_reads_fall_through() {
    let cache = Arc::new(InMemoryCache::new());
    let app = app_with_cache(cache.clone(), 3600);
    let instructor = Ulid::new();
    let monday = future_monday();

    app.availability
        .save_week_availability(instructor, full_week(monday, &[(0, vec![w("09:00", "10:00")])]), true)
        .await
        .unwrap();
    assert_eq!(cache.len(), 1);

    cache.set_available(false);
    for week in 0..3 {
        let week = app
            .availability
            .get_week_availability(instructor, monday + Duration::weeks(week))
            .await
            .unwrap();
        assert_eq!(week.week_start.weekday(), chrono::Weekday::Mon);
    }
    assert_eq!(app.cache.breaker().state(), BreakerState::Open);

    // Back online, but the breaker keeps the cache out of the path until its cooldown elapses.
    cache.set_available(true);
    cache.delete_pattern("*").await.unwrap();
    let week = app.availability.get_week_availability(instructor, monday).await.unwrap();
    assert_eq!(week.window_count(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn breaker_recovers_through_probe() {
    let cache = Arc::new(InMemoryCache::new());
    let app = app_with_cache(cache.clone(), 0);
    let instructor = Ulid::new();
    let monday = future_monday();

    cache.set_available(false);
    for _ in 0..2 {
        app.availability.get_week_availability(instructor, monday).await.unwrap();
    }
    assert_eq!(app.cache.breaker().state(), BreakerState::Open);

    cache.set_available(true);
    app.availability.get_week_availability(instructor, monday).await.unwrap();
    assert_eq!(app.cache.breaker().state(), BreakerState::Closed);
    app.availability.get_week_availability(instructor, monday).await.unwrap();
    assert_eq!(cache.len(), 1);
}
