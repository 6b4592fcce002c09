use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::cache::{instructor_namespace, week_key, CacheTier, ResilientCache};
use crate::limits::WARM_RETRY_BACKOFF_MS;
use crate::model::*;
use crate::observability::{CACHE_WARM_EXHAUSTED_TOTAL, CACHE_WARM_FAILED_TOTAL, CACHE_WARM_RETRIES_TOTAL};
use crate::store::{Repository, RepositoryError};
use crate::timezone::TimezoneProvider;

use super::intervals::merge_pass;

/// Group rows by date, merge each day and blank out blackout dates.
pub fn resolve_days(
    dates: &[NaiveDate],
    rows: &[AvailabilitySlot],
    blackouts: &[BlackoutDate],
) -> BTreeMap<NaiveDate, Vec<TimeWindow>> {
    let mut raw: BTreeMap<NaiveDate, Vec<TimeWindow>> = dates.iter().map(|d| (*d, Vec::new())).collect();
    for row in rows {
        if let Some(day) = raw.get_mut(&row.date) {
            day.push(row.window);
        }
    }
    let blacked: BTreeSet<NaiveDate> = blackouts.iter().map(|b| b.date).collect();
    raw.into_iter()
        .map(|(date, windows)| {
            let windows = if blacked.contains(&date) {
                Vec::new()
            } else {
                merge_pass(&windows)
            };
            (date, windows)
        })
        .collect()
}

/// Resolved week straight from storage, bypassing every cache.
pub async fn read_week_uncached(
    repo: &dyn Repository,
    instructor_id: Ulid,
    week_start: NaiveDate,
) -> Result<WeekView, RepositoryError> {
    let dates = week_dates(week_start);
    let last = week_end(week_start);
    let rows = repo.slots_between(instructor_id, week_start, last).await?;
    let blackouts = repo.blackouts_between(instructor_id, week_start, last).await?;
    Ok(WeekView {
        instructor_id,
        week_start,
        days: resolve_days(&dates, &rows, &blackouts),
    })
}

/// Week views served from cache, loaded from storage on a miss.
#[derive(Clone)]
pub struct ReadThroughCache {
    repo: Arc<dyn Repository>,
    cache: Arc<ResilientCache>,
    clock: Arc<dyn TimezoneProvider>,
}

impl ReadThroughCache {
    pub fn new(repo: Arc<dyn Repository>, cache: Arc<ResilientCache>, clock: Arc<dyn TimezoneProvider>) -> Self {
        Self { repo, cache, clock }
    }

    /// Hot for the current and future weeks, warm for weeks already over.
    pub fn tier_for(&self, instructor_id: Ulid, week_start: NaiveDate) -> CacheTier {
        let today = self.clock.today_for(instructor_id);
        if week_end(week_start) >= today {
            CacheTier::Hot
        } else {
            CacheTier::Warm
        }
    }

    pub async fn get_or_load(&self, instructor_id: Ulid, week_start: NaiveDate) -> Result<WeekView, RepositoryError> {
        let key = week_key(instructor_id, week_start);
        if let Some(week) = self.cache.get::<WeekView>(&key).await {
            return Ok(week);
        }
        let week = read_week_uncached(self.repo.as_ref(), instructor_id, week_start).await?;
        self.cache.put(&week, self.tier_for(instructor_id, week_start)).await;
        Ok(week)
    }
}

/// What one warming pass did for one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmOutcome {
    pub week_start: NaiveDate,
    /// Storage reads, including the first.
    pub attempts: u32,
    /// The last read matched the expected count (always true without one).
    pub verified: bool,
    pub window_count: usize,
    pub cached: bool,
}

impl WarmOutcome {
    fn failed(week_start: NaiveDate, attempts: u32) -> Self {
        Self {
            week_start,
            attempts,
            verified: false,
            window_count: 0,
            cached: false,
        }
    }
}

/// Invalidate, re-read and repopulate after a write.
#[derive(Clone)]
pub struct CacheWarmer {
    reader: ReadThroughCache,
}

impl CacheWarmer {
    pub fn new(reader: ReadThroughCache) -> Self {
        Self { reader }
    }

    /// Never fails: the write this follows has already committed. A storage
    /// read that errors is logged and reported as an unverified, uncached
    /// outcome with no view.
    pub async fn warm_with_verification(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
        expected: Option<usize>,
    ) -> (Option<WeekView>, WarmOutcome) {
        self.invalidate(instructor_id).await;
        self.verify_and_cache(instructor_id, week_start, expected).await
    }

    /// Invalidate the instructor's namespace once, then verify and repopulate each week.
    pub async fn warm_weeks(
        &self,
        instructor_id: Ulid,
        weeks: &[(NaiveDate, Option<usize>)],
    ) -> Vec<(Option<WeekView>, WarmOutcome)> {
        self.invalidate(instructor_id).await;
        let mut results = Vec::with_capacity(weeks.len());
        for &(week_start, expected) in weeks {
            results.push(self.verify_and_cache(instructor_id, week_start, expected).await);
        }
        results
    }

    async fn invalidate(&self, instructor_id: Ulid) {
        let removed = self.reader.cache.invalidate(&instructor_namespace(instructor_id)).await;
        debug!("invalidated {removed} cache keys for {instructor_id}");
    }

    async fn read_after_commit(&self, instructor_id: Ulid, week_start: NaiveDate) -> Option<WeekView> {
        match read_week_uncached(self.reader.repo.as_ref(), instructor_id, week_start).await {
            Ok(week) => Some(week),
            Err(e) => {
                metrics::counter!(CACHE_WARM_FAILED_TOTAL).increment(1);
                warn!("cache warm for {instructor_id} week {week_start}: storage read failed: {e}");
                None
            }
        }
    }

    async fn verify_and_cache(
        &self,
        instructor_id: Ulid,
        week_start: NaiveDate,
        expected: Option<usize>,
    ) -> (Option<WeekView>, WarmOutcome) {
        let mut attempts = 1;
        let Some(mut week) = self.read_after_commit(instructor_id, week_start).await else {
            return (None, WarmOutcome::failed(week_start, attempts));
        };
        let mut verified = expected.is_none_or(|n| n == week.window_count());

        for backoff in WARM_RETRY_BACKOFF_MS {
            if verified {
                break;
            }
            metrics::counter!(CACHE_WARM_RETRIES_TOTAL).increment(1);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            attempts += 1;
            let Some(reread) = self.read_after_commit(instructor_id, week_start).await else {
                return (None, WarmOutcome::failed(week_start, attempts));
            };
            week = reread;
            verified = expected.is_none_or(|n| n == week.window_count());
        }
        if !verified {
            metrics::counter!(CACHE_WARM_EXHAUSTED_TOTAL).increment(1);
            warn!(
                "cache warm for {instructor_id} week {week_start}: expected {:?} windows, read {} after {attempts} attempts; caching last snapshot",
                expected,
                week.window_count()
            );
        }

        let cached = self
            .reader
            .cache
            .put(&week, self.reader.tier_for(instructor_id, week_start))
            .await;
        let outcome = WarmOutcome {
            week_start,
            attempts,
            verified,
            window_count: week.window_count(),
            cached,
        };
        (Some(week), outcome)
    }
}
