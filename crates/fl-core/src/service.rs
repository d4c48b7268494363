//! Cached statistics over a [`Store`].
//!
//! Operations never fail. A store read error is logged and answered with
//! the last cached value for the same key, or with zeroed results when
//! nothing was ever cached.

use chrono::{DateTime, NaiveDate, Utc};

use crate::cache::{CacheKey, CacheMetrics, StatsCache};
use crate::error::StoreError;
use crate::settings::Settings;
use crate::stats::{
    self, AppUsage, COMPARISON_DAYS, FocusSummary, HourlyBucket, ReportPeriod, TagUsage,
    TagUsageReport, TrendPoint, UsageStatistics, WeeklyComparison,
};
use crate::store::Store;

/// Read-side facade combining the store, the statistics engine and the cache.
pub struct StatisticsService<'a, S: Store + ?Sized> {
    store: &'a S,
    cache: &'a StatsCache,
    now: DateTime<Utc>,
}

impl<'a, S: Store + ?Sized> StatisticsService<'a, S> {
    /// Creates a service evaluating cache freshness against the current time.
    pub fn new(store: &'a S, cache: &'a StatsCache) -> Self {
        Self {
            store,
            cache,
            now: Utc::now(),
        }
    }

    /// Evaluates cache freshness against `now` instead of the wall clock.
    #[must_use]
    pub const fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The local date of `now`, per the stored timezone mode.
    pub fn today(&self) -> NaiveDate {
        self.settings().calendar().date_of(self.now)
    }

    /// Usage totals for one day.
    pub fn usage_statistics(&self, date: NaiveDate) -> UsageStatistics {
        self.cached(
            CacheKey::new("usage_statistics", date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.day_bounds(date);
                let sessions = store.app_sessions_in_range(start, end)?;
                Ok(stats::usage_statistics(&sessions, &calendar, date))
            },
            |_| UsageStatistics::empty(date),
        )
    }

    /// Per-app totals for one day.
    pub fn app_usage_breakdown(&self, date: NaiveDate) -> Vec<AppUsage> {
        self.cached(
            CacheKey::new("app_usage_breakdown", date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.day_bounds(date);
                let sessions = store.app_sessions_in_range(start, end)?;
                Ok(stats::app_usage_breakdown(&sessions, &calendar, date))
            },
            |_| Vec::new(),
        )
    }

    /// Per-tag totals for one day.
    pub fn scene_tag_distribution(&self, date: NaiveDate) -> Vec<TagUsage> {
        self.cached(
            CacheKey::new("scene_tag_distribution", date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.day_bounds(date);
                let sessions = store.app_sessions_in_range(start, end)?;
                let tags = store.list_tags()?;
                Ok(stats::scene_tag_distribution(&sessions, &tags, &calendar, date))
            },
            |_| Vec::new(),
        )
    }

    /// Usage by start hour for one day.
    pub fn hourly_distribution(&self, date: NaiveDate) -> Vec<HourlyBucket> {
        self.cached(
            CacheKey::new("hourly_distribution", date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.day_bounds(date);
                let sessions = store.app_sessions_in_range(start, end)?;
                Ok(stats::hourly_distribution(&sessions, &calendar, date))
            },
            |settings| stats::hourly_distribution(&[], &settings.calendar(), date),
        )
    }

    /// Weekday versus weekend over the 14 days ending at `end_date`.
    pub fn weekly_comparison(&self, end_date: NaiveDate) -> WeeklyComparison {
        self.cached(
            CacheKey::new("weekly_comparison", end_date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.range_bounds(end_date, COMPARISON_DAYS);
                let sessions = store.app_sessions_in_range(start, end)?;
                Ok(stats::weekly_comparison(&sessions, &calendar, end_date))
            },
            |settings| stats::weekly_comparison(&[], &settings.calendar(), end_date),
        )
    }

    /// Seven daily points ending at `end_date`.
    pub fn weekly_trend(&self, end_date: NaiveDate) -> Vec<TrendPoint> {
        self.trend("weekly_trend", end_date, 7)
    }

    /// Thirty daily points ending at `end_date`.
    pub fn monthly_trend(&self, end_date: NaiveDate) -> Vec<TrendPoint> {
        self.trend("monthly_trend", end_date, 30)
    }

    /// Tag distribution for `period` compared with the period before.
    pub fn tag_usage_report(&self, period: ReportPeriod, end_date: NaiveDate) -> TagUsageReport {
        self.cached(
            CacheKey::new("tag_usage_report", format!("{}:{end_date}", period.as_str())),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.range_bounds(end_date, period.days() * 2);
                let sessions = store.app_sessions_in_range(start, end)?;
                let tags = store.list_tags()?;
                Ok(stats::tag_usage_report(
                    &sessions, &tags, &calendar, period, end_date,
                ))
            },
            |_| TagUsageReport::empty(period, end_date),
        )
    }

    /// Validated focus totals for one day against the daily goal.
    pub fn focus_summary(&self, date: NaiveDate) -> FocusSummary {
        self.cached(
            CacheKey::new("focus_summary", date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.day_bounds(date);
                let focus = store.focus_sessions_in_range(start, end, true)?;
                Ok(stats::focus_summary(
                    &focus,
                    &calendar,
                    date,
                    settings.daily_focus_goal_secs,
                ))
            },
            |settings| FocusSummary::empty(date, settings.daily_focus_goal_secs),
        )
    }

    /// Cache counters.
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    fn trend(&self, operation: &'static str, end_date: NaiveDate, days: u32) -> Vec<TrendPoint> {
        self.cached(
            CacheKey::new(operation, end_date),
            |store, settings| {
                let calendar = settings.calendar();
                let (start, end) = calendar.range_bounds(end_date, days);
                let sessions = store.app_sessions_in_range(start, end)?;
                Ok(stats::trend(&sessions, &calendar, end_date, days))
            },
            |settings| stats::trend(&[], &settings.calendar(), end_date, days),
        )
    }

    fn settings(&self) -> Settings {
        self.store.load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings; using defaults");
            Settings::default()
        })
    }

    fn cached<T, F, D>(&self, key: CacheKey, compute: F, empty: D) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&S, &Settings) -> Result<T, StoreError>,
        D: FnOnce(&Settings) -> T,
    {
        let result = self.cache.get_or_compute(&key, self.now, || {
            let settings = self.store.load_settings()?;
            compute(self.store, &settings)
        });
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%key, error = %err, "statistics read failed");
                self.cache.last_known_good(&key).unwrap_or_else(|| {
                    tracing::warn!(%key, "no cached value; returning empty statistics");
                    empty(&self.settings())
                })
            }
        }
    }
}
