//! Lifecycle hooks: `fl start`, `fl stop` and `fl signal`.
//!
//! Each invocation loads the persisted detector snapshot, applies one
//! transition and writes it back, so a process woken after suspension picks
//! up where the previous one left off.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use fl_core::{
    BackgroundTicker, FocusMonitor, LifecycleSignal, StartOutcome, Store, TracingSink, Validator,
    Verdict,
};

use super::tick::TimerRuntime;
use super::util::format_duration;
use crate::Config;

fn monitor<'a, S: Store + ?Sized>(
    store: &'a S,
    config: &Config,
) -> FocusMonitor<'a, S, TracingSink> {
    FocusMonitor::new(store, &TracingSink, Validator::new(config.validation_rules()))
        .with_capabilities(config.capabilities())
}

pub(crate) fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Begins monitoring and requests the first background tick.
pub fn start<W: Write, S: Store + ?Sized>(
    writer: &mut W,
    store: &S,
    config: &Config,
    at: DateTime<Utc>,
) -> Result<()> {
    match monitor(store, config).start(at)? {
        StartOutcome::Started => {
            writeln!(writer, "Monitoring started at {}", rfc3339(at))?;
        }
        StartOutcome::AlreadyRunning => {
            writeln!(writer, "Already monitoring.")?;
            return Ok(());
        }
        StartOutcome::PermissionDenied => {
            writeln!(
                writer,
                "Monitoring is not permitted on this host; detector stays idle."
            )?;
            return Ok(());
        }
    }

    let mut runtime = TimerRuntime::default();
    let ticker = BackgroundTicker::new(store, &TracingSink, Validator::new(config.validation_rules()))
        .with_interval(config.tick_interval())
        .with_budget(config.tick_budget());
    match ticker.install(&mut runtime, at) {
        Ok(next) => writeln!(writer, "Next tick due at {}", rfc3339(next))?,
        Err(err) => {
            tracing::warn!(error = %err, "failed to schedule first tick");
            writeln!(writer, "Warning: {err}")?;
        }
    }
    Ok(())
}

/// Stops monitoring.
pub fn stop<W: Write, S: Store + ?Sized>(writer: &mut W, store: &S, config: &Config) -> Result<()> {
    let transition = monitor(store, config).stop()?;
    if transition.is_noop() {
        writeln!(writer, "Not monitoring.")?;
    } else {
        writeln!(writer, "Monitoring stopped.")?;
    }
    Ok(())
}

/// Applies one lifecycle signal and reports any focus session it finalized.
pub fn signal<W: Write, S: Store + ?Sized>(
    writer: &mut W,
    store: &S,
    config: &Config,
    signal: LifecycleSignal,
    at: DateTime<Utc>,
) -> Result<()> {
    let outcome = monitor(store, config)
        .handle_signal(signal, at)
        .with_context(|| format!("failed to apply {signal}"))?;

    let transition = outcome.transition;
    if transition.from == transition.to {
        writeln!(writer, "{signal}: state {}", transition.to)?;
    } else {
        writeln!(writer, "{signal}: {} -> {}", transition.from, transition.to)?;
    }

    match outcome.verdict {
        Some(Verdict::Accepted(session)) => writeln!(
            writer,
            "Focus session recorded: {} to {} ({})",
            rfc3339(session.start_time),
            rfc3339(session.end_time),
            format_duration(session.duration_secs)
        )?,
        Some(Verdict::Rejected(rejection)) => {
            writeln!(writer, "Focus candidate discarded: {rejection}")?;
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fl_core::{MemoryStore, Settings, TimezoneMode};

    use insta::assert_snapshot;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        let mut settings = Settings {
            timezone: TimezoneMode::FixedOffset { seconds: 0 },
            ..Settings::default()
        };
        settings.lunch_window = None;
        store.save_settings(&settings).unwrap();
        store
    }

    fn run_all(store: &MemoryStore, config: &Config) -> String {
        let mut output = Vec::new();
        start(&mut output, store, config, ts(0)).unwrap();
        signal(&mut output, store, config, LifecycleSignal::WillResignActive, ts(5)).unwrap();
        signal(&mut output, store, config, LifecycleSignal::BecameActive, ts(50)).unwrap();
        signal(&mut output, store, config, LifecycleSignal::WillResignActive, ts(60)).unwrap();
        signal(&mut output, store, config, LifecycleSignal::BecameActive, ts(70)).unwrap();
        stop(&mut output, store, config).unwrap();
        stop(&mut output, store, config).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn lifecycle_session_flow() {
        let store = store();
        let output = run_all(&store, &Config::default());
        assert_snapshot!(output, @r"
        Monitoring started at 2025-03-10T09:00:00Z
        Next tick due at 2025-03-10T09:15:00Z
        will_resign_active: active -> inactive
        became_active: inactive -> active
        Focus session recorded: 2025-03-10T09:05:00Z to 2025-03-10T09:50:00Z (45m)
        will_resign_active: active -> inactive
        became_active: inactive -> active
        Monitoring stopped.
        Not monitoring.
        ");
    }

    #[test]
    fn candidate_touching_lunch_is_discarded() {
        let store = store();
        let mut settings = store.load_settings().unwrap();
        settings.lunch_window = Some("12:00-13:00".parse().unwrap());
        store.save_settings(&settings).unwrap();
        let config = Config::default();

        let mut output = Vec::new();
        start(&mut output, &store, &config, ts(120)).unwrap();
        output.clear();
        signal(&mut output, &store, &config, LifecycleSignal::EnteredBackground, ts(170)).unwrap();
        signal(&mut output, &store, &config, LifecycleSignal::BecameActive, ts(220)).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        entered_background: active -> inactive
        became_active: inactive -> active
        Focus candidate discarded: touches lunch window at 2025-03-10T12:40:00+00:00
        ");
        assert!(
            store
                .focus_sessions_in_range(ts(0), ts(600), false)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn start_without_permission_stays_idle() {
        let store = store();
        let config = Config {
            monitoring_permitted: false,
            ..Config::default()
        };
        let mut output = Vec::new();
        start(&mut output, &store, &config, ts(0)).unwrap();
        signal(&mut output, &store, &config, LifecycleSignal::WillResignActive, ts(5)).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Monitoring is not permitted on this host; detector stays idle.
        will_resign_active: state idle
        ");
    }

    #[test]
    fn start_twice_reports_already_running() {
        let store = store();
        let config = Config::default();
        let mut output = Vec::new();
        start(&mut output, &store, &config, ts(0)).unwrap();
        output.clear();
        start(&mut output, &store, &config, ts(1)).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "Already monitoring.\n");
        let snapshot = store.load_detector().unwrap().unwrap();
        assert_eq!(snapshot.next_tick_at, Some(ts(15)));
    }
}
