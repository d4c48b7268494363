//! Shared utilities for CLI commands.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use fl_core::TimezoneMode;
use fs2::FileExt;
use regex::Regex;
use serde::Serialize;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(second|minute|hour|day|week)s?\s+ago$")
        .expect("relative time pattern is valid")
});

/// Pre-compiled regex for fixed UTC offsets such as `+02:00` or `-0530`.
static OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])(\d{2}):?(\d{2})$")
        .expect("offset pattern is valid")
});

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a datetime string as either RFC 3339 or relative to `now`.
///
/// Supports:
/// - RFC 3339: "2026-01-15T10:30:00Z"
/// - Relative: "now", "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_datetime(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if s.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use RFC 3339 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '20 minutes ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, seconds_per_unit) = match &caps[2] {
        "second" => (MAX_RELATIVE_MINUTES * 60, 1),
        "minute" => (MAX_RELATIVE_MINUTES, 60),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60 * 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 60 * 24 * 7),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    Ok(now - Duration::seconds(n * seconds_per_unit))
}

/// Resolves an optional `--at` argument, defaulting to `now`.
pub fn resolve_at(at: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    at.map_or(Ok(now), |s| parse_datetime(s, now))
}

/// Parses "local", "utc" or a fixed offset like `+02:00`.
pub fn parse_timezone(s: &str) -> Result<TimezoneMode> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("local") {
        return Ok(TimezoneMode::Local);
    }
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return Ok(TimezoneMode::FixedOffset { seconds: 0 });
    }
    let Some(caps) = OFFSET_RE.captures(s) else {
        anyhow::bail!("Invalid timezone: {s}. Use 'local', 'utc' or an offset like +02:00");
    };
    let hours: i32 = caps[2].parse().context("invalid offset hours")?;
    let minutes: i32 = caps[3].parse().context("invalid offset minutes")?;
    if hours > 18 || minutes > 59 {
        anyhow::bail!("Offset out of range: {s}");
    }
    let seconds = hours * 3600 + minutes * 60;
    let seconds = if &caps[1] == "-" { -seconds } else { seconds };
    Ok(TimezoneMode::FixedOffset { seconds })
}

/// Describes a timezone mode for display.
pub fn describe_timezone(mode: TimezoneMode) -> String {
    match mode {
        TimezoneMode::Local => {
            let name = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());
            format!("local ({name})")
        }
        TimezoneMode::FixedOffset { seconds: 0 } => "UTC".to_string(),
        TimezoneMode::FixedOffset { seconds } => {
            let sign = if seconds < 0 { '-' } else { '+' };
            let abs = seconds.unsigned_abs();
            format!("UTC{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
        }
    }
}

/// Formats whole seconds as `1h 5m` or `25m`.
pub fn format_duration(secs: i64) -> String {
    if secs < 0 {
        return "0m".to_string();
    }
    let total_minutes = secs / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().clamp(0.0, 10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value).context("failed to serialize output")?;
    writeln!(writer)?;
    Ok(())
}

/// An exclusive advisory lock serializing hook invocations.
///
/// Released when dropped.
#[derive(Debug)]
pub struct WriteLock {
    _file: File,
}

impl WriteLock {
    /// Blocks until the lock at `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to create lock file {}", path.display()))?;
        file.lock_exclusive().context("failed to acquire lock")?;
        tracing::debug!(path = %path.display(), "acquired write lock");
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_datetime_rfc3339() {
        let parsed = parse_datetime("2025-03-10T09:30:00+01:00", now()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_datetime_relative() {
        assert_eq!(
            parse_datetime("20 minutes ago", now()).unwrap(),
            now() - Duration::minutes(20)
        );
        assert_eq!(
            parse_datetime("1 hour ago", now()).unwrap(),
            now() - Duration::hours(1)
        );
        assert_eq!(parse_datetime("now", now()).unwrap(), now());
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(parse_datetime("yesterday-ish", now()).is_err());
        assert!(parse_datetime("99999999999 weeks ago", now()).is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("local").unwrap(), TimezoneMode::Local);
        assert_eq!(
            parse_timezone("UTC").unwrap(),
            TimezoneMode::FixedOffset { seconds: 0 }
        );
        assert_eq!(
            parse_timezone("+02:00").unwrap(),
            TimezoneMode::FixedOffset { seconds: 7200 }
        );
        assert_eq!(
            parse_timezone("-0530").unwrap(),
            TimezoneMode::FixedOffset { seconds: -19800 }
        );
        assert!(parse_timezone("+25:00").is_err());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_describe_fixed_offsets() {
        assert_eq!(
            describe_timezone(TimezoneMode::FixedOffset { seconds: -19800 }),
            "UTC-05:30"
        );
        assert_eq!(describe_timezone(TimezoneMode::FixedOffset { seconds: 0 }), "UTC");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0m");
        assert_eq!(format_duration(25 * 60 + 59), "25m");
        assert_eq!(format_duration(3 * 3600 + 5 * 60), "3h 5m");
        assert_eq!(format_duration(-5), "0m");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(50, 100), "█████░░░░░");
        assert_eq!(progress_bar(100, 100), "██████████");
    }

    #[test]
    fn test_write_lock_can_be_reacquired_after_drop() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("db.lock");
        drop(WriteLock::acquire(&path).unwrap());
        assert!(WriteLock::acquire(&path).is_ok());
    }
}
