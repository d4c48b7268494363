//! Statistics views over recorded usage and focus sessions.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use fl_core::stats::{
    AppUsage, FocusSummary, HourlyBucket, TagUsage, TagUsageReport, TrendDirection, TrendPoint,
    UsageStatistics, WeeklyComparison,
};
use fl_core::{StatisticsService, StatsCache, Store};

use super::util::{format_duration, progress_bar, write_json};
use crate::{Config, StatsView};

/// Renders one statistics view for `date` (defaults to today).
pub fn run<W: Write, S: Store + ?Sized>(
    writer: &mut W,
    store: &S,
    config: &Config,
    view: StatsView,
    date: Option<NaiveDate>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let cache = StatsCache::new(config.cache_ttl());
    let service = StatisticsService::new(store, &cache).as_of(now);
    let date = date.unwrap_or_else(|| service.today());

    match view {
        StatsView::Day => {
            let stats = service.usage_statistics(date);
            if json {
                return write_json(writer, &stats);
            }
            write_day(writer, &stats)
        }
        StatsView::Apps => {
            let apps = service.app_usage_breakdown(date);
            if json {
                return write_json(writer, &apps);
            }
            write_apps(writer, date, &apps)
        }
        StatsView::Tags => {
            let tags = service.scene_tag_distribution(date);
            if json {
                return write_json(writer, &tags);
            }
            write_tags(writer, date, &tags)
        }
        StatsView::Hourly => {
            let buckets = service.hourly_distribution(date);
            if json {
                return write_json(writer, &buckets);
            }
            write_hourly(writer, date, &buckets)
        }
        StatsView::Weekly => {
            let comparison = service.weekly_comparison(date);
            if json {
                return write_json(writer, &comparison);
            }
            write_weekly(writer, date, &comparison)
        }
        StatsView::Trend { month } => {
            let points = if month {
                service.monthly_trend(date)
            } else {
                service.weekly_trend(date)
            };
            if json {
                return write_json(writer, &points);
            }
            write_trend(writer, &points)
        }
        StatsView::TagReport { period } => {
            let report = service.tag_usage_report(period.into(), date);
            if json {
                return write_json(writer, &report);
            }
            write_tag_report(writer, &report)
        }
        StatsView::Focus => {
            let summary = service.focus_summary(date);
            if json {
                return write_json(writer, &summary);
            }
            write_focus(writer, &summary)
        }
    }
}

fn heading<W: Write>(writer: &mut W, title: &str) -> Result<()> {
    writeln!(writer, "{title}")?;
    writeln!(writer, "{}", "─".repeat(title.chars().count()))?;
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn secs(value: f64) -> i64 {
    value.round() as i64
}

fn write_day<W: Write>(writer: &mut W, stats: &UsageStatistics) -> Result<()> {
    heading(writer, &format!("USAGE: {}", stats.date))?;
    if stats.session_count == 0 {
        writeln!(writer, "No usage recorded.")?;
        return Ok(());
    }
    writeln!(writer, "Total:       {}", format_duration(stats.total_usage_secs))?;
    writeln!(writer, "Sessions:    {}", stats.session_count)?;
    writeln!(writer, "Apps:        {}", stats.app_count)?;
    writeln!(
        writer,
        "Longest:     {}",
        format_duration(stats.longest_session_secs)
    )?;
    writeln!(
        writer,
        "Average:     {}",
        format_duration(secs(stats.average_session_secs))
    )?;
    writeln!(
        writer,
        "Productive:  {} ({:.0}%)",
        format_duration(stats.productive_secs),
        stats.productivity_ratio * 100.0
    )?;
    if let Some(app) = &stats.most_used_app {
        writeln!(writer, "Most used:   {app}")?;
    }
    if stats.excluded_sessions > 0 {
        writeln!(
            writer,
            "Excluded {} inconsistent sessions.",
            stats.excluded_sessions
        )?;
    }
    Ok(())
}

fn write_apps<W: Write>(writer: &mut W, date: NaiveDate, apps: &[AppUsage]) -> Result<()> {
    heading(writer, &format!("APPS: {date}"))?;
    if apps.is_empty() {
        writeln!(writer, "No usage recorded.")?;
        return Ok(());
    }
    let max = apps.first().map_or(0, |a| a.total_secs);
    for app in apps {
        writeln!(
            writer,
            "{:<24}{:>8}  {}  {:>3.0}%",
            app.app_name,
            format_duration(app.total_secs),
            progress_bar(app.total_secs, max),
            app.percentage
        )?;
    }
    Ok(())
}

fn write_tags<W: Write>(writer: &mut W, date: NaiveDate, tags: &[TagUsage]) -> Result<()> {
    heading(writer, &format!("TAGS: {date}"))?;
    if tags.is_empty() {
        writeln!(writer, "(no tagged usage)")?;
        return Ok(());
    }
    let max = tags.iter().map(|t| t.total_secs).max().unwrap_or(0);
    for tag in tags {
        writeln!(
            writer,
            "{:<24}{:>8}  {}  {:>3.0}%",
            tag.tag_name,
            format_duration(tag.total_secs),
            progress_bar(tag.total_secs, max),
            tag.percentage
        )?;
    }
    Ok(())
}

fn write_hourly<W: Write>(writer: &mut W, date: NaiveDate, buckets: &[HourlyBucket]) -> Result<()> {
    heading(writer, &format!("BY HOUR: {date}"))?;
    let max = buckets.iter().map(|b| b.total_secs).max().unwrap_or(0);
    if max == 0 {
        writeln!(writer, "No usage recorded.")?;
        return Ok(());
    }
    for bucket in buckets.iter().filter(|b| b.session_count > 0) {
        writeln!(
            writer,
            "{:02}:00  {:>8}  {}",
            bucket.hour,
            format_duration(bucket.total_secs),
            progress_bar(bucket.total_secs, max)
        )?;
    }
    Ok(())
}

fn write_weekly<W: Write>(
    writer: &mut W,
    date: NaiveDate,
    comparison: &WeeklyComparison,
) -> Result<()> {
    heading(writer, &format!("WEEKDAY VS WEEKEND: 14 days to {date}"))?;
    writeln!(
        writer,
        "Weekdays ({}):  {} per day, {:.0}% productive",
        comparison.weekday_days,
        format_duration(secs(comparison.weekday_average_secs)),
        comparison.weekday_productivity_ratio * 100.0
    )?;
    writeln!(
        writer,
        "Weekends ({}):  {} per day, {:.0}% productive",
        comparison.weekend_days,
        format_duration(secs(comparison.weekend_average_secs)),
        comparison.weekend_productivity_ratio * 100.0
    )?;
    writeln!(writer, "Change:        {:+.1}%", comparison.change_percentage)?;
    Ok(())
}

fn write_trend<W: Write>(writer: &mut W, points: &[TrendPoint]) -> Result<()> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Ok(());
    };
    heading(writer, &format!("TREND: {} to {}", first.date, last.date))?;
    let max = points
        .iter()
        .map(|p| p.statistics.total_usage_secs)
        .max()
        .unwrap_or(0);
    for point in points {
        let top: Vec<&str> = point.top_apps.iter().map(|a| a.app_name.as_str()).collect();
        writeln!(
            writer,
            "{}  {:>8}  {}  {}",
            point.date.format("%a %m-%d"),
            format_duration(point.statistics.total_usage_secs),
            progress_bar(point.statistics.total_usage_secs, max),
            top.join(", ")
        )?;
    }
    Ok(())
}

const fn direction_label(direction: TrendDirection) -> &'static str {
    match direction {
        TrendDirection::Increasing => "up",
        TrendDirection::Decreasing => "down",
        TrendDirection::Stable => "stable",
    }
}

fn write_tag_report<W: Write>(writer: &mut W, report: &TagUsageReport) -> Result<()> {
    heading(
        writer,
        &format!("TAG REPORT: {} ending {}", report.period.as_str(), report.end_date),
    )?;
    if report.trends.is_empty() {
        writeln!(writer, "(no tagged usage)")?;
        return Ok(());
    }
    for trend in &report.trends {
        writeln!(
            writer,
            "{:<24}{:>8}  {:>3.0}%  {:+.1}pp {}",
            trend.tag_name,
            format_duration(trend.total_secs),
            trend.percentage,
            trend.change_pp,
            direction_label(trend.direction)
        )?;
    }
    Ok(())
}

fn write_focus<W: Write>(writer: &mut W, summary: &FocusSummary) -> Result<()> {
    heading(writer, &format!("FOCUS: {}", summary.date))?;
    writeln!(
        writer,
        "Focused:   {} of {}  {}  {:.0}%",
        format_duration(summary.total_focus_secs),
        format_duration(summary.goal_secs),
        progress_bar(summary.total_focus_secs, summary.goal_secs),
        summary.goal_progress * 100.0
    )?;
    writeln!(writer, "Sessions:  {}", summary.session_count)?;
    writeln!(
        writer,
        "Longest:   {}",
        format_duration(summary.longest_focus_secs)
    )?;
    Ok(())
}
