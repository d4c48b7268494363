//! Aggregates over the session log.
//!
//! Every function here is pure: it takes the sessions fetched from the
//! store, a [`Calendar`] for local-day bucketing, and a reference date.
//! Sessions are attributed to the local day and hour their `start_time`
//! falls in. Records that are open or internally inconsistent are left out
//! of every aggregate and counted in `excluded_sessions`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, is_weekend_date};
use crate::session::{AppSession, FocusSession};
use crate::tag::SceneTag;
use crate::types::{AppId, TagId};

/// Days covered by [`weekly_comparison`].
pub const COMPARISON_DAYS: u32 = 14;

/// Top apps attached to each trend point.
pub const TREND_TOP_APPS: usize = 3;

/// Percentage-point change that counts as a trend.
pub const TREND_THRESHOLD_PP: f64 = 5.0;

/// Per-day usage totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStatistics {
    pub date: NaiveDate,
    pub total_usage_secs: i64,
    pub session_count: usize,
    pub app_count: usize,
    pub longest_session_secs: i64,
    pub average_session_secs: f64,
    pub productive_secs: i64,
    pub productivity_ratio: f64,
    /// App with the largest total; ties go to the smallest `app_id`.
    pub most_used_app: Option<AppId>,
    pub excluded_sessions: usize,
}

impl UsageStatistics {
    /// Zeroed statistics for a day with no data.
    pub const fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_usage_secs: 0,
            session_count: 0,
            app_count: 0,
            longest_session_secs: 0,
            average_session_secs: 0.0,
            productive_secs: 0,
            productivity_ratio: 0.0,
            most_used_app: None,
            excluded_sessions: 0,
        }
    }
}

/// One app's share of a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsage {
    pub app_id: AppId,
    pub app_name: String,
    pub total_secs: i64,
    pub session_count: usize,
    pub average_session_secs: f64,
    /// Share of the day's total, 0–100.
    pub percentage: f64,
}

/// One tag's share of the tagged time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUsage {
    pub tag_id: TagId,
    pub tag_name: String,
    pub color: Option<String>,
    pub total_secs: i64,
    pub session_count: usize,
    pub average_session_secs: f64,
    /// Share of the tagged-only total, 0–100.
    pub percentage: f64,
}

/// Usage starting within one local hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub hour: u32,
    pub total_secs: i64,
    pub session_count: usize,
    /// `total_secs` relative to the busiest hour, 0–1.
    pub intensity: f64,
}

/// Weekday versus weekend behaviour over the trailing fortnight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyComparison {
    pub weekday_days: u32,
    pub weekend_days: u32,
    pub weekday_average_secs: f64,
    pub weekend_average_secs: f64,
    pub weekday_productivity_ratio: f64,
    pub weekend_productivity_ratio: f64,
    /// `weekend_average - weekday_average`.
    pub difference_secs: f64,
    /// `difference / weekday_average × 100`, 0 when the weekday average is 0.
    pub change_percentage: f64,
}

/// One day of a trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub statistics: UsageStatistics,
    pub top_apps: Vec<AppUsage>,
}

/// Length of a tag report period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Day,
    #[default]
    Week,
    Month,
}

impl ReportPeriod {
    /// Number of local days in the period.
    pub const fn days(self) -> u32 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }

    /// String form used in cache keys and output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Direction of a tag's share between two periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    /// Classifies a percentage-point change.
    pub fn classify(change_pp: f64) -> Self {
        if change_pp > TREND_THRESHOLD_PP {
            Self::Increasing
        } else if change_pp < -TREND_THRESHOLD_PP {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

/// A tag's share now and in the previous period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagTrend {
    pub tag_id: TagId,
    pub tag_name: String,
    pub total_secs: i64,
    pub percentage: f64,
    pub previous_percentage: f64,
    pub change_pp: f64,
    pub direction: TrendDirection,
}

/// Tag distribution for a period compared with the one before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUsageReport {
    pub period: ReportPeriod,
    pub end_date: NaiveDate,
    pub distribution: Vec<TagUsage>,
    pub trends: Vec<TagTrend>,
}

impl TagUsageReport {
    /// A report with no tagged usage.
    pub const fn empty(period: ReportPeriod, end_date: NaiveDate) -> Self {
        Self {
            period,
            end_date,
            distribution: Vec::new(),
            trends: Vec::new(),
        }
    }
}

/// Validated focus time for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusSummary {
    pub date: NaiveDate,
    pub total_focus_secs: i64,
    pub session_count: usize,
    pub longest_focus_secs: i64,
    pub goal_secs: i64,
    /// `total / goal`, 0 when the goal is 0.
    pub goal_progress: f64,
}

impl FocusSummary {
    /// A summary with no focus sessions.
    pub const fn empty(date: NaiveDate, goal_secs: i64) -> Self {
        Self {
            date,
            total_focus_secs: 0,
            session_count: 0,
            longest_focus_secs: 0,
            goal_secs,
            goal_progress: 0.0,
        }
    }
}

/// Completed sessions starting in `[start, end)` with their durations.
struct Completed<'s> {
    sessions: Vec<(&'s AppSession, i64)>,
    excluded: usize,
}

fn completed_in(
    sessions: &[AppSession],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Completed<'_> {
    let mut completed = Vec::new();
    let mut excluded = 0;
    for session in sessions
        .iter()
        .filter(|s| s.start_time >= start && s.start_time < end)
    {
        match session.completed_duration() {
            Some(duration) => completed.push((session, duration)),
            None if session.is_open() => {}
            None => {
                tracing::warn!(
                    id = %session.id,
                    app_id = %session.app_id,
                    duration_secs = session.duration_secs,
                    "excluding inconsistent app session from statistics"
                );
                excluded += 1;
            }
        }
    }
    Completed {
        sessions: completed,
        excluded,
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn average(total: i64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

fn statistics_for(date: NaiveDate, completed: &Completed<'_>) -> UsageStatistics {
    let mut per_app: BTreeMap<&AppId, i64> = BTreeMap::new();
    let mut total = 0;
    let mut productive = 0;
    let mut longest = 0;
    for &(session, duration) in &completed.sessions {
        total += duration;
        longest = longest.max(duration);
        if session.is_productive {
            productive += duration;
        }
        *per_app.entry(&session.app_id).or_default() += duration;
    }

    // BTreeMap iterates in app_id order, so keeping the first maximum
    // resolves ties to the smallest id.
    let mut most_used: Option<(&AppId, i64)> = None;
    for (&app, &time) in &per_app {
        if most_used.is_none_or(|(_, best)| time > best) {
            most_used = Some((app, time));
        }
    }

    let count = completed.sessions.len();
    UsageStatistics {
        date,
        total_usage_secs: total,
        session_count: count,
        app_count: per_app.len(),
        longest_session_secs: longest,
        average_session_secs: average(total, count),
        productive_secs: productive,
        productivity_ratio: ratio(productive, total),
        most_used_app: most_used.map(|(app, _)| app.clone()),
        excluded_sessions: completed.excluded,
    }
}

/// Usage totals for one local day.
pub fn usage_statistics(
    sessions: &[AppSession],
    calendar: &Calendar,
    date: NaiveDate,
) -> UsageStatistics {
    let (start, end) = calendar.day_bounds(date);
    statistics_for(date, &completed_in(sessions, start, end))
}

fn breakdown_for(completed: &Completed<'_>) -> Vec<AppUsage> {
    let mut per_app: HashMap<&AppId, AppUsage> = HashMap::new();
    let mut day_total = 0;
    for &(session, duration) in &completed.sessions {
        day_total += duration;
        let entry = per_app.entry(&session.app_id).or_insert_with(|| AppUsage {
            app_id: session.app_id.clone(),
            app_name: session.app_name.clone(),
            total_secs: 0,
            session_count: 0,
            average_session_secs: 0.0,
            percentage: 0.0,
        });
        entry.total_secs += duration;
        entry.session_count += 1;
    }

    let mut breakdown: Vec<AppUsage> = per_app
        .into_values()
        .map(|mut usage| {
            usage.average_session_secs = average(usage.total_secs, usage.session_count);
            usage.percentage = ratio(usage.total_secs, day_total) * 100.0;
            usage
        })
        .collect();
    breakdown.sort_by(|a, b| {
        b.total_secs
            .cmp(&a.total_secs)
            .then_with(|| a.app_id.cmp(&b.app_id))
    });
    breakdown
}

/// Per-app totals for one local day, largest first.
pub fn app_usage_breakdown(
    sessions: &[AppSession],
    calendar: &Calendar,
    date: NaiveDate,
) -> Vec<AppUsage> {
    let (start, end) = calendar.day_bounds(date);
    breakdown_for(&completed_in(sessions, start, end))
}

fn tag_distribution_in(
    sessions: &[AppSession],
    tags: &[SceneTag],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<TagUsage> {
    let completed = completed_in(sessions, start, end);
    let mut per_tag: HashMap<&TagId, (i64, usize)> = HashMap::new();
    let mut tagged_total = 0;
    for &(session, duration) in &completed.sessions {
        if let Some(tag_id) = &session.scene_tag_id {
            tagged_total += duration;
            let entry = per_tag.entry(tag_id).or_default();
            entry.0 += duration;
            entry.1 += 1;
        }
    }

    let mut distribution: Vec<TagUsage> = per_tag
        .into_iter()
        .map(|(tag_id, (total, count))| {
            let tag = tags.iter().find(|t| &t.id == tag_id);
            TagUsage {
                tag_id: tag_id.clone(),
                tag_name: tag.map_or_else(|| tag_id.to_string(), |t| t.name.clone()),
                color: tag.map(|t| t.color.clone()),
                total_secs: total,
                session_count: count,
                average_session_secs: average(total, count),
                percentage: ratio(total, tagged_total) * 100.0,
            }
        })
        .collect();
    distribution.sort_by(|a, b| {
        b.total_secs
            .cmp(&a.total_secs)
            .then_with(|| a.tag_id.cmp(&b.tag_id))
    });
    distribution
}

/// Per-tag totals for one local day.
///
/// Only tagged sessions count, so percentages are relative to the tagged
/// total rather than the full day.
pub fn scene_tag_distribution(
    sessions: &[AppSession],
    tags: &[SceneTag],
    calendar: &Calendar,
    date: NaiveDate,
) -> Vec<TagUsage> {
    let (start, end) = calendar.day_bounds(date);
    tag_distribution_in(sessions, tags, start, end)
}

/// 24 buckets keyed by the local start hour of each session.
pub fn hourly_distribution(
    sessions: &[AppSession],
    calendar: &Calendar,
    date: NaiveDate,
) -> Vec<HourlyBucket> {
    let (start, end) = calendar.day_bounds(date);
    let mut buckets: Vec<HourlyBucket> = (0..24)
        .map(|hour| HourlyBucket {
            hour,
            total_secs: 0,
            session_count: 0,
            intensity: 0.0,
        })
        .collect();

    for &(session, duration) in &completed_in(sessions, start, end).sessions {
        let hour = calendar.hour_of(session.start_time) as usize;
        if let Some(bucket) = buckets.get_mut(hour) {
            bucket.total_secs += duration;
            bucket.session_count += 1;
        }
    }

    let max = buckets.iter().map(|b| b.total_secs).max().unwrap_or(0);
    for bucket in &mut buckets {
        bucket.intensity = ratio(bucket.total_secs, max);
    }
    buckets
}

/// Weekday and weekend averages over the 14 local days ending at `end_date`.
pub fn weekly_comparison(
    sessions: &[AppSession],
    calendar: &Calendar,
    end_date: NaiveDate,
) -> WeeklyComparison {
    let mut weekday = (0u32, 0i64, 0i64);
    let mut weekend = (0u32, 0i64, 0i64);
    for offset in 0..COMPARISON_DAYS {
        let date = end_date - Duration::days(i64::from(offset));
        let stats = usage_statistics(sessions, calendar, date);
        let group = if is_weekend_date(date) {
            &mut weekend
        } else {
            &mut weekday
        };
        group.0 += 1;
        group.1 += stats.total_usage_secs;
        group.2 += stats.productive_secs;
    }

    let weekday_average = average(weekday.1, weekday.0 as usize);
    let weekend_average = average(weekend.1, weekend.0 as usize);
    let difference = weekend_average - weekday_average;
    let change_percentage = if weekday_average == 0.0 {
        0.0
    } else {
        difference / weekday_average * 100.0
    };

    WeeklyComparison {
        weekday_days: weekday.0,
        weekend_days: weekend.0,
        weekday_average_secs: weekday_average,
        weekend_average_secs: weekend_average,
        weekday_productivity_ratio: ratio(weekday.2, weekday.1),
        weekend_productivity_ratio: ratio(weekend.2, weekend.1),
        difference_secs: difference,
        change_percentage,
    }
}

/// `days` daily points ending at `end_date`, oldest first.
///
/// Days are independent, so they are computed in parallel.
pub fn trend(
    sessions: &[AppSession],
    calendar: &Calendar,
    end_date: NaiveDate,
    days: u32,
) -> Vec<TrendPoint> {
    (0..days)
        .into_par_iter()
        .rev()
        .map(|offset| {
            let date = end_date - Duration::days(i64::from(offset));
            let (start, end) = calendar.day_bounds(date);
            let completed = completed_in(sessions, start, end);
            let mut top_apps = breakdown_for(&completed);
            top_apps.truncate(TREND_TOP_APPS);
            TrendPoint {
                date,
                statistics: statistics_for(date, &completed),
                top_apps,
            }
        })
        .collect()
}

/// Seven daily points ending at `end_date`.
pub fn weekly_trend(
    sessions: &[AppSession],
    calendar: &Calendar,
    end_date: NaiveDate,
) -> Vec<TrendPoint> {
    trend(sessions, calendar, end_date, 7)
}

/// Thirty daily points ending at `end_date`.
pub fn monthly_trend(
    sessions: &[AppSession],
    calendar: &Calendar,
    end_date: NaiveDate,
) -> Vec<TrendPoint> {
    trend(sessions, calendar, end_date, 30)
}

/// Tag distribution for `period` compared with the preceding period.
///
/// `sessions` must cover both periods.
pub fn tag_usage_report(
    sessions: &[AppSession],
    tags: &[SceneTag],
    calendar: &Calendar,
    period: ReportPeriod,
    end_date: NaiveDate,
) -> TagUsageReport {
    let days = period.days();
    let (start, end) = calendar.range_bounds(end_date, days);
    let previous_end_date = end_date - Duration::days(i64::from(days));
    let (previous_start, previous_end) = calendar.range_bounds(previous_end_date, days);

    let distribution = tag_distribution_in(sessions, tags, start, end);
    let previous = tag_distribution_in(sessions, tags, previous_start, previous_end);

    let mut trends: Vec<TagTrend> = distribution
        .iter()
        .map(|current| {
            let before = previous
                .iter()
                .find(|p| p.tag_id == current.tag_id)
                .map_or(0.0, |p| p.percentage);
            tag_trend(
                &current.tag_id,
                &current.tag_name,
                current.total_secs,
                current.percentage,
                before,
            )
        })
        .collect();
    // Tags that disappeared this period still show up as decreasing.
    for gone in previous
        .iter()
        .filter(|p| !distribution.iter().any(|c| c.tag_id == p.tag_id))
    {
        trends.push(tag_trend(&gone.tag_id, &gone.tag_name, 0, 0.0, gone.percentage));
    }
    trends.sort_by(|a, b| {
        b.percentage
            .total_cmp(&a.percentage)
            .then_with(|| a.tag_id.cmp(&b.tag_id))
    });

    TagUsageReport {
        period,
        end_date,
        distribution,
        trends,
    }
}

fn tag_trend(tag_id: &TagId, name: &str, total: i64, percentage: f64, previous: f64) -> TagTrend {
    let change_pp = percentage - previous;
    TagTrend {
        tag_id: tag_id.clone(),
        tag_name: name.to_string(),
        total_secs: total,
        percentage,
        previous_percentage: previous,
        change_pp,
        direction: TrendDirection::classify(change_pp),
    }
}

/// Validated focus totals for one local day against the daily goal.
pub fn focus_summary(
    focus: &[FocusSession],
    calendar: &Calendar,
    date: NaiveDate,
    goal_secs: i64,
) -> FocusSummary {
    let (start, end) = calendar.day_bounds(date);
    let day: Vec<&FocusSession> = focus
        .iter()
        .filter(|s| s.is_valid && s.start_time >= start && s.start_time < end)
        .filter(|s| s.duration_secs >= 0)
        .collect();
    let total: i64 = day.iter().map(|s| s.duration_secs).sum();
    FocusSummary {
        date,
        total_focus_secs: total,
        session_count: day.len(),
        longest_focus_secs: day.iter().map(|s| s.duration_secs).max().unwrap_or(0),
        goal_secs,
        goal_progress: if goal_secs > 0 { ratio(total, goal_secs) } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::session::FocusCandidate;
    use crate::tag::default_tags;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
    }

    fn session(app: &str, start: DateTime<Utc>, minutes: i64) -> AppSession {
        let mut s = AppSession::begin(AppId::new(app).unwrap(), app.to_uppercase(), None, start);
        s.end(start + Duration::minutes(minutes));
        s
    }

    fn tagged(app: &str, start: DateTime<Utc>, minutes: i64, tag: &SceneTag) -> AppSession {
        let mut s = session(app, start, minutes);
        s.scene_tag_id = Some(tag.id.clone());
        s
    }

    #[test]
    fn usage_statistics_for_a_day() {
        let cal = Calendar::utc();
        let mut productive = session("code", at(10, 9, 0), 60);
        productive.is_productive = true;
        let sessions = vec![
            productive,
            session("chat", at(10, 11, 0), 20),
            session("chat", at(10, 14, 0), 40),
            session("code", at(11, 9, 0), 60),
        ];

        let stats = usage_statistics(&sessions, &cal, date(10));
        assert_eq!(stats.total_usage_secs, 7200);
        assert_eq!(stats.session_count, 3);
        assert_eq!(stats.app_count, 2);
        assert_eq!(stats.longest_session_secs, 3600);
        assert!((stats.average_session_secs - 2400.0).abs() < 1e-9);
        assert_eq!(stats.productive_secs, 3600);
        assert!((stats.productivity_ratio - 0.5).abs() < 1e-9);
        // 60 minutes each: the tie goes to "chat".
        assert_eq!(stats.most_used_app.unwrap().as_str(), "chat");
    }

    #[test]
    fn empty_day_is_zeroed() {
        let stats = usage_statistics(&[], &Calendar::utc(), date(10));
        assert_eq!(stats, UsageStatistics::empty(date(10)));
    }

    #[test]
    fn adjacent_sessions_stay_distinct() {
        let sessions = vec![
            session("x", at(10, 9, 0), 10),
            session("x", at(10, 9, 12), 8),
        ];
        let stats = usage_statistics(&sessions, &Calendar::utc(), date(10));
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.total_usage_secs, 18 * 60);
    }

    #[test]
    fn open_and_inconsistent_sessions_are_excluded() {
        let open = AppSession::begin(AppId::new("x").unwrap(), "X", None, at(10, 9, 0));
        let mut broken = session("y", at(10, 10, 0), 10);
        broken.duration_secs = -5;
        let sessions = vec![open, broken, session("z", at(10, 11, 0), 10)];

        let stats = usage_statistics(&sessions, &Calendar::utc(), date(10));
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.total_usage_secs, 600);
        assert_eq!(stats.excluded_sessions, 1);
    }

    #[test]
    fn statistics_are_idempotent() {
        let sessions = vec![
            session("a", at(10, 9, 0), 17),
            session("b", at(10, 10, 0), 23),
        ];
        let cal = Calendar::utc();
        assert_eq!(
            usage_statistics(&sessions, &cal, date(10)),
            usage_statistics(&sessions, &cal, date(10))
        );
    }

    #[test]
    fn local_day_follows_the_offset() {
        // 23:30 UTC on the 9th is 00:30 on the 10th at UTC+1.
        let cal = Calendar::new(crate::settings::TimezoneMode::FixedOffset { seconds: 3600 });
        let sessions = vec![session("a", at(9, 23, 30), 10)];
        assert_eq!(usage_statistics(&sessions, &cal, date(10)).session_count, 1);
        assert_eq!(usage_statistics(&sessions, &cal, date(9)).session_count, 0);
    }

    #[test]
    fn breakdown_sorted_by_total_then_id() {
        let sessions = vec![
            session("b", at(10, 9, 0), 30),
            session("a", at(10, 10, 0), 30),
            session("c", at(10, 11, 0), 60),
            session("c", at(10, 13, 0), 20),
        ];
        let breakdown = app_usage_breakdown(&sessions, &Calendar::utc(), date(10));
        let order: Vec<_> = breakdown.iter().map(|a| a.app_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(breakdown[0].session_count, 2);
        assert!((breakdown[0].average_session_secs - 2400.0).abs() < 1e-9);
        assert!((breakdown[0].percentage - 57.142_857).abs() < 1e-3);
        let sum: f64 = breakdown.iter().map(|a| a.percentage).sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn tag_distribution_uses_tagged_total() {
        let tags = default_tags();
        let sessions = vec![
            tagged("a", at(10, 9, 0), 30, &tags[0]),
            tagged("b", at(10, 10, 0), 90, &tags[1]),
            session("c", at(10, 11, 0), 120),
        ];
        let distribution = scene_tag_distribution(&sessions, &tags, &Calendar::utc(), date(10));
        assert_eq!(distribution.len(), 2);
        assert_eq!(distribution[0].tag_name, tags[1].name);
        assert!((distribution[0].percentage - 75.0).abs() < 1e-9);
        assert!((distribution[1].percentage - 25.0).abs() < 1e-9);

        let sum: f64 = distribution.iter().map(|t| t.percentage).sum();
        assert!(sum <= 100.0 + 1e-9);
    }

    #[test]
    fn hourly_distribution_scales_to_busiest_hour() {
        let sessions = vec![
            session("a", at(10, 9, 0), 60),
            session("a", at(10, 9, 30), 60),
            session("b", at(10, 14, 0), 30),
        ];
        let buckets = hourly_distribution(&sessions, &Calendar::utc(), date(10));
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[9].session_count, 2);
        assert!((buckets[9].intensity - 1.0).abs() < 1e-9);
        assert!((buckets[14].intensity - 0.25).abs() < 1e-9);
        assert!(buckets[3].intensity.abs() < 1e-9);

        let empty = hourly_distribution(&[], &Calendar::utc(), date(10));
        assert!(empty.iter().all(|b| b.intensity == 0.0));
    }

    #[test]
    fn weekly_comparison_without_weekday_usage() {
        // 2025-03-10 is a Monday; the window is 2025-02-25..=2025-03-10.
        let sessions = vec![
            session("game", at(8, 10, 0), 120),
            session("game", at(9, 10, 0), 60),
        ];
        let comparison = weekly_comparison(&sessions, &Calendar::utc(), date(10));
        assert_eq!(comparison.weekday_days, 10);
        assert_eq!(comparison.weekend_days, 4);
        assert!(comparison.weekday_average_secs.abs() < 1e-9);
        assert!((comparison.weekend_average_secs - 2700.0).abs() < 1e-9);
        assert!((comparison.difference_secs - 2700.0).abs() < 1e-9);
        assert!(comparison.change_percentage.abs() < 1e-9);
    }

    #[test]
    fn weekly_comparison_change_percentage() {
        let mut sessions = Vec::new();
        for day in 3..=7 {
            sessions.push(session("work", at(day, 9, 0), 60));
        }
        sessions.push(session("fun", at(8, 9, 0), 120));
        let comparison = weekly_comparison(&sessions, &Calendar::utc(), date(10));
        // Weekdays: 5h over 10 days, weekend: 2h over 4 days.
        assert!((comparison.weekday_average_secs - 1800.0).abs() < 1e-9);
        assert!((comparison.weekend_average_secs - 1800.0).abs() < 1e-9);
        assert!(comparison.change_percentage.abs() < 1e-9);
    }

    #[test]
    fn trend_is_ordered_oldest_first() {
        let sessions = vec![
            session("a", at(4, 9, 0), 10),
            session("b", at(10, 9, 0), 20),
            session("c", at(10, 10, 0), 5),
            session("d", at(10, 11, 0), 3),
            session("e", at(10, 12, 0), 1),
        ];
        let points = weekly_trend(&sessions, &Calendar::utc(), date(10));
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].date, date(4));
        assert_eq!(points[6].date, date(10));
        assert_eq!(points[0].statistics.total_usage_secs, 600);
        assert_eq!(points[6].top_apps.len(), TREND_TOP_APPS);
        assert_eq!(points[6].top_apps[0].app_id.as_str(), "b");

        assert_eq!(monthly_trend(&sessions, &Calendar::utc(), date(10)).len(), 30);
    }

    #[test]
    fn tag_report_classifies_direction() {
        let tags = default_tags();
        let (work, study, fun) = (&tags[0], &tags[1], &tags[2]);
        let sessions = vec![
            // Previous day (9th): work 50%, study 50%.
            tagged("a", at(9, 9, 0), 60, work),
            tagged("b", at(9, 11, 0), 60, study),
            // Current day (10th): work 52%, fun 48%.
            tagged("a", at(10, 9, 0), 52, work),
            tagged("c", at(10, 11, 0), 48, fun),
        ];
        let report =
            tag_usage_report(&sessions, &tags, &Calendar::utc(), ReportPeriod::Day, date(10));

        let direction = |tag: &SceneTag| {
            report
                .trends
                .iter()
                .find(|t| t.tag_id == tag.id)
                .map(|t| t.direction)
        };
        assert_eq!(direction(work), Some(TrendDirection::Stable));
        assert_eq!(direction(fun), Some(TrendDirection::Increasing));
        assert_eq!(direction(study), Some(TrendDirection::Decreasing));
        assert_eq!(report.distribution.len(), 2);
    }

    #[test]
    fn trend_threshold_is_strict() {
        assert_eq!(TrendDirection::classify(5.0), TrendDirection::Stable);
        assert_eq!(TrendDirection::classify(5.01), TrendDirection::Increasing);
        assert_eq!(TrendDirection::classify(-5.0), TrendDirection::Stable);
        assert_eq!(TrendDirection::classify(-5.01), TrendDirection::Decreasing);
    }

    #[test]
    fn focus_summary_tracks_goal() {
        let focus = vec![
            FocusSession::accepted(FocusCandidate::new(at(10, 9, 0), at(10, 10, 0))),
            FocusSession::accepted(FocusCandidate::new(at(10, 14, 0), at(10, 15, 0))),
            FocusSession::accepted(FocusCandidate::new(at(11, 9, 0), at(11, 10, 0))),
        ];
        let summary = focus_summary(&focus, &Calendar::utc(), date(10), 4 * 3600);
        assert_eq!(summary.session_count, 2);
        assert_eq!(summary.total_focus_secs, 7200);
        assert_eq!(summary.longest_focus_secs, 3600);
        assert!((summary.goal_progress - 0.5).abs() < 1e-9);

        let no_goal = focus_summary(&focus, &Calendar::utc(), date(10), 0);
        assert!(no_goal.goal_progress.abs() < 1e-9);
    }
}
