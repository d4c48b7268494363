//! End-to-end tests driving the `fl` binary against a temporary database.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn fl_binary() -> &'static str {
    env!("CARGO_BIN_EXE_fl")
}

/// A command isolated from the user's config and data directories.
fn fl(temp: &Path) -> Command {
    let mut command = Command::new(fl_binary());
    command
        .env("HOME", temp)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("XDG_DATA_HOME")
        .env("FL_DATABASE_PATH", temp.join("data/focuslog.db"));
    command
}

fn run(temp: &Path, args: &[&str]) -> String {
    let output = fl(temp).args(args).output().expect("failed to run fl");
    stdout(&output, args)
}

fn stdout(output: &Output, args: &[&str]) -> String {
    assert!(
        output.status.success(),
        "fl {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn test_signals_record_focus_session() {
    let temp = TempDir::new().unwrap();
    let temp = temp.path();

    run(temp, &["settings", "set", "--timezone", "utc", "--lunch", "none"]);

    let output = run(temp, &["start", "--at", "2025-03-10T09:00:00Z"]);
    assert_eq!(
        output,
        "Monitoring started at 2025-03-10T09:00:00Z\nNext tick due at 2025-03-10T09:15:00Z\n"
    );

    run(
        temp,
        &["signal", "resign-active", "--at", "2025-03-10T09:05:00Z"],
    );
    let output = run(
        temp,
        &["signal", "became-active", "--at", "2025-03-10T09:50:00Z"],
    );
    assert_eq!(
        output,
        "became_active: inactive -> active\n\
         Focus session recorded: 2025-03-10T09:05:00Z to 2025-03-10T09:50:00Z (45m)\n"
    );

    let output = run(temp, &["stats", "focus", "--date", "2025-03-10", "--json"]);
    let focus: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(focus["total_focus_secs"], 2700);
    assert_eq!(focus["session_count"], 1);

    assert_eq!(run(temp, &["stop"]), "Monitoring stopped.\n");
    assert_eq!(run(temp, &["stop"]), "Not monitoring.\n");
}

#[test]
fn test_import_from_stdin_feeds_statistics() {
    let temp = TempDir::new().unwrap();
    let temp = temp.path();
    run(temp, &["settings", "set", "--timezone", "utc"]);

    let events = r#"{"app_id":"com.apple.dt.Xcode","app_name":"Xcode","category_id":"developer_tools","started_at":"2025-03-10T09:00:00Z","ended_at":"2025-03-10T10:00:00Z"}
{"app_id":"com.netflix.Netflix","app_name":"Netflix","started_at":"2025-03-10T20:00:00Z","ended_at":"2025-03-10T20:30:00Z"}
garbage
"#;
    let mut child = fl(temp)
        .args(["import", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn fl import");
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(events.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert_eq!(
        stdout(&output, &["import", "-"]),
        "Recorded 2 sessions (0 skipped, 1 malformed)\n"
    );

    let output = run(temp, &["stats", "day", "--date", "2025-03-10", "--json"]);
    let day: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(day["total_usage_secs"], 5400);
    assert_eq!(day["productive_secs"], 3600);
    assert_eq!(day["most_used_app"], "com.apple.dt.Xcode");

    let output = run(temp, &["tags", "list", "--json"]);
    let tags: serde_json::Value = serde_json::from_str(&output).unwrap();
    let work = tags
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "Work")
        .unwrap();
    assert_eq!(work["usage_count"], 1);
}

#[test]
fn test_invalid_settings_fail_without_changes() {
    let temp = TempDir::new().unwrap();
    let temp = temp.path();

    let output = fl(temp)
        .args(["settings", "set", "--sleep", "late"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid sleep window: late"));

    let output = run(temp, &["settings", "show"]);
    assert!(output.contains("Sleep window:      23:00-07:00"));
}
