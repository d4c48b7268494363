//! Status command: detector state and today's totals.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use fl_core::stats::{FocusSummary, UsageStatistics};
use fl_core::{
    DetectorSnapshot, FocusMonitor, StatisticsService, StatsCache, Store, TracingSink, Validator,
};
use serde::Serialize;

use super::lifecycle::rfc3339;
use super::util::{format_duration, progress_bar, write_json};
use crate::Config;

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    database: &'a Path,
    detector: DetectorSnapshot,
    today: UsageStatistics,
    focus: FocusSummary,
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), rfc3339)
}

pub fn run<W: Write, S: Store + ?Sized>(
    writer: &mut W,
    store: &S,
    config: &Config,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let detector = FocusMonitor::new(store, &TracingSink, Validator::default()).status()?;
    let cache = StatsCache::new(config.cache_ttl());
    let service = StatisticsService::new(store, &cache).as_of(now);
    let date = service.today();
    let report = StatusReport {
        database: &config.database_path,
        detector,
        today: service.usage_statistics(date),
        focus: service.focus_summary(date),
    };

    if json {
        return write_json(writer, &report);
    }

    writeln!(writer, "FOCUSLOG STATUS")?;
    writeln!(writer, "Database: {}", report.database.display())?;
    writeln!(writer, "Monitor:  {}", report.detector.state)?;
    writeln!(
        writer,
        "  Last active:   {}",
        timestamp(report.detector.last_active_at)
    )?;
    writeln!(
        writer,
        "  Last inactive: {}",
        timestamp(report.detector.last_inactive_at)
    )?;
    writeln!(
        writer,
        "  Next tick:     {}",
        timestamp(report.detector.next_tick_at)
    )?;

    writeln!(writer)?;
    writeln!(writer, "TODAY ({date})")?;
    writeln!(
        writer,
        "Usage: {} in {} sessions",
        format_duration(report.today.total_usage_secs),
        report.today.session_count
    )?;
    writeln!(
        writer,
        "Focus: {} of {}  {}",
        format_duration(report.focus.total_focus_secs),
        format_duration(report.focus.goal_secs),
        progress_bar(report.focus.total_focus_secs, report.focus.goal_secs)
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::{Duration, TimeZone};
    use fl_core::{
        AppId, FocusCandidate, FocusSession, MemoryStore, Settings, TimezoneMode, UsageEvent,
        UsageRecorder,
    };

    use insta::assert_snapshot;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn config() -> Config {
        Config {
            database_path: PathBuf::from("/data/focuslog.db"),
            ..Config::default()
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .save_settings(&Settings {
                timezone: TimezoneMode::FixedOffset { seconds: 0 },
                ..Settings::default()
            })
            .unwrap();
        store
    }

    #[test]
    fn status_on_empty_store() {
        let mut output = Vec::new();
        run(&mut output, &store(), &config(), ts(0), false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        FOCUSLOG STATUS
        Database: /data/focuslog.db
        Monitor:  idle
          Last active:   never
          Last inactive: never
          Next tick:     never

        TODAY (2025-03-10)
        Usage: 0m in 0 sessions
        Focus: 0m of 4h 0m  ░░░░░░░░░░
        ");
    }

    #[test]
    fn status_shows_usage_and_focus_progress() {
        let store = store();
        FocusMonitor::new(&store, &TracingSink, Validator::default())
            .start(ts(-60))
            .unwrap();
        UsageRecorder::new(&store, &TracingSink)
            .record(UsageEvent {
                app_id: AppId::new("com.apple.dt.Xcode").unwrap(),
                app_name: "Xcode".to_string(),
                category_id: Some("developer_tools".to_string()),
                started_at: ts(-60),
                ended_at: ts(0),
                interruption_count: 0,
            })
            .unwrap();
        store
            .insert_focus_session(&FocusSession::accepted(FocusCandidate::new(
                ts(10),
                ts(130),
            )))
            .unwrap();

        let mut output = Vec::new();
        run(&mut output, &store, &config(), ts(180), false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        FOCUSLOG STATUS
        Database: /data/focuslog.db
        Monitor:  active
          Last active:   2025-03-10T08:00:00Z
          Last inactive: never
          Next tick:     never

        TODAY (2025-03-10)
        Usage: 1h 0m in 1 sessions
        Focus: 2h 0m of 4h 0m  █████░░░░░
        ");
    }

    #[test]
    fn status_json_includes_detector_and_totals() {
        let mut output = Vec::new();
        run(&mut output, &store(), &config(), ts(0), true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["database"], "/data/focuslog.db");
        assert_eq!(value["detector"]["state"], "idle");
        assert_eq!(value["today"]["session_count"], 0);
        assert_eq!(value["focus"]["goal_secs"], 14_400);
    }
}
