//! Import command for recording app usage from a JSONL export.
//!
//! Each line is one [`UsageEvent`]:
//!
//! ```json
//! {"app_id":"com.apple.dt.Xcode","app_name":"Xcode","category_id":"developer_tools",
//!  "started_at":"2025-03-10T09:00:00Z","ended_at":"2025-03-10T10:00:00Z"}
//! ```
//!
//! Blank lines are ignored. Malformed lines are counted and skipped so one
//! bad record does not lose the rest of the export.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use fl_core::{Store, TracingSink, UsageEvent, UsageEventSource, UsageRecorder};

/// A [`UsageEventSource`] reading one JSON event per line.
#[derive(Debug)]
pub struct JsonlSource<R> {
    reader: R,
    line: usize,
    malformed: usize,
}

impl<R: BufRead> JsonlSource<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            malformed: 0,
        }
    }

    /// Lines that could not be parsed so far.
    pub const fn malformed(&self) -> usize {
        self.malformed
    }
}

impl JsonlSource<BufReader<File>> {
    /// Opens a JSONL file.
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> UsageEventSource for JsonlSource<R> {
    fn next_event(&mut self) -> Option<UsageEvent> {
        let mut buf = String::new();
        loop {
            buf.clear();
            self.line += 1;
            match self.reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(line = self.line, error = %err, "failed to read usage events");
                    return None;
                }
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(event) => return Some(event),
                Err(err) => {
                    self.malformed += 1;
                    tracing::warn!(line = self.line, error = %err, "skipping malformed usage event");
                }
            }
        }
    }
}

/// Records every event in `path` ("-" reads stdin).
pub fn run<W: Write, S: Store + ?Sized>(
    writer: &mut W,
    store: &S,
    path: &Path,
    auto_tag: bool,
) -> Result<()> {
    if path == Path::new("-") {
        let stdin = io::stdin();
        let mut source = JsonlSource::new(stdin.lock());
        record_all(writer, store, &mut source, auto_tag)
    } else {
        let mut source = JsonlSource::open(path)?;
        record_all(writer, store, &mut source, auto_tag)
    }
}

fn record_all<W: Write, S: Store + ?Sized, R: BufRead>(
    writer: &mut W,
    store: &S,
    source: &mut JsonlSource<R>,
    auto_tag: bool,
) -> Result<()> {
    let summary = UsageRecorder::new(store, &TracingSink)
        .with_auto_tag(auto_tag)
        .drain(source)
        .context("failed to record usage")?;
    writeln!(
        writer,
        "Recorded {} sessions ({} skipped, {} malformed)",
        summary.recorded,
        summary.skipped,
        source.malformed()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use chrono::{TimeZone, Utc};
    use fl_core::MemoryStore;

    const EVENTS: &str = r#"{"app_id":"com.apple.dt.Xcode","app_name":"Xcode","category_id":"developer_tools","started_at":"2025-03-10T09:00:00Z","ended_at":"2025-03-10T10:00:00Z"}

not json
{"app_id":"com.netflix.Netflix","app_name":"Netflix","started_at":"2025-03-10T20:00:00Z","ended_at":"2025-03-10T19:00:00Z"}
{"app_id":"com.apple.mobilesafari","app_name":"Safari","started_at":"2025-03-10T11:00:00Z","ended_at":"2025-03-10T11:02:00Z","interruption_count":3}
"#;

    #[test]
    fn jsonl_source_skips_blank_and_malformed_lines() {
        let mut source = JsonlSource::new(Cursor::new(EVENTS));
        let mut apps = Vec::new();
        while let Some(event) = source.next_event() {
            apps.push(event.app_id.to_string());
        }
        assert_eq!(
            apps,
            [
                "com.apple.dt.Xcode",
                "com.netflix.Netflix",
                "com.apple.mobilesafari"
            ]
        );
        assert_eq!(source.malformed(), 1);
    }

    #[test]
    fn import_records_sessions_and_reports_counts() {
        let store = MemoryStore::new();
        let mut source = JsonlSource::new(Cursor::new(EVENTS));
        let mut output = Vec::new();
        record_all(&mut output, &store, &mut source, true).unwrap();

        insta::assert_snapshot!(String::from_utf8(output).unwrap(), @"Recorded 2 sessions (1 skipped, 1 malformed)");

        let day_start = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let sessions = store
            .app_sessions_in_range(day_start, day_start + chrono::Duration::days(1))
            .unwrap();
        assert_eq!(sessions.len(), 2);
        let xcode = &sessions[0];
        assert_eq!(xcode.duration_secs, 3600);
        assert!(xcode.is_productive);
        assert!(xcode.scene_tag_id.is_some());
        assert_eq!(sessions[1].interruption_count, 3);
    }

    #[test]
    fn import_without_auto_tag_leaves_sessions_untagged() {
        let store = MemoryStore::new();
        let mut source = JsonlSource::new(Cursor::new(EVENTS));
        record_all(&mut Vec::new(), &store, &mut source, false).unwrap();

        let day_start = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let sessions = store
            .app_sessions_in_range(day_start, day_start + chrono::Duration::days(1))
            .unwrap();
        assert!(sessions.iter().all(|s| s.scene_tag_id.is_none()));
    }
}
