//! Storage layer for focuslog.
//!
//! Provides a [`Store`] implementation backed by `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization. Background ticks open
//! their own connection instead of borrowing the foreground one.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with nanosecond precision
//! and a `Z` suffix (e.g., `2025-03-10T09:00:00.000000000Z`). The fixed width
//! keeps lexicographic ordering equal to chronological ordering, so range
//! queries compare strings directly.
//!
//! ## Single-row Tables
//!
//! `settings` and `detector_state` hold at most one row (`id = 1`). Settings
//! are stored as a JSON document so new fields with serde defaults need no
//! migration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use fl_core::detector::{DetectorState, UnknownDetectorState};
use fl_core::{
    AppId, AppSession, DetectorSnapshot, FocusSession, SceneTag, SessionId, Settings, Store,
    StoreError, TagAssociation, TagId, ValidationError,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A JSON column could not be encoded or decoded.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {column}: {value}")]
    TimestampParse {
        column: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value failed domain validation.
    #[error("invalid stored value: {0}")]
    Invalid(#[from] ValidationError),
    /// A stored detector state is unknown.
    #[error(transparent)]
    DetectorState(#[from] UnknownDetectorState),
    /// A stored integer is out of range.
    #[error("{column} out of range: {value}")]
    OutOfRange { column: &'static str, value: i64 },
    /// The addressed row does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// The row exists but is not in a state that allows the write.
    #[error("{0}")]
    Conflict(String),
}

impl DbError {
    fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation
        )
    }

    /// Converts into the engine-facing error for a read.
    fn into_read(self) -> StoreError {
        match self {
            Self::NotFound { kind, id } => StoreError::NotFound { kind, id },
            other => {
                tracing::warn!(error = %other, "database read failed");
                StoreError::Read(other.to_string())
            }
        }
    }

    /// Converts into the engine-facing error for a write.
    fn into_write(self) -> StoreError {
        if self.is_constraint_violation() {
            return StoreError::Conflict(self.to_string());
        }
        match self {
            Self::NotFound { kind, id } => StoreError::NotFound { kind, id },
            Self::Conflict(message) => StoreError::Conflict(message),
            other => {
                tracing::warn!(error = %other, "database write failed");
                StoreError::Write(other.to_string())
            }
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema and seeds the default tags.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            -- name: unique and case-sensitive (BINARY collation)
            CREATE TABLE IF NOT EXISTS scene_tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                color TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                usage_count INTEGER NOT NULL DEFAULT 0
            );

            -- end_time and duration are written by the same statement
            CREATE TABLE IF NOT EXISTS app_sessions (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                app_name TEXT NOT NULL,
                category_id TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration INTEGER NOT NULL DEFAULT 0,
                interruption_count INTEGER NOT NULL DEFAULT 0,
                is_productive INTEGER NOT NULL DEFAULT 0,
                scene_tag_id TEXT,
                FOREIGN KEY (scene_tag_id) REFERENCES scene_tags(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_app_sessions_start ON app_sessions(start_time);
            CREATE INDEX IF NOT EXISTS idx_app_sessions_app ON app_sessions(app_id, start_time);

            CREATE TABLE IF NOT EXISTS focus_sessions (
                id TEXT PRIMARY KEY,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration INTEGER NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_focus_sessions_start ON focus_sessions(start_time);

            CREATE TABLE IF NOT EXISTS tag_apps (
                tag_id TEXT NOT NULL,
                app_id TEXT NOT NULL,
                PRIMARY KEY (tag_id, app_id),
                FOREIGN KEY (tag_id) REFERENCES scene_tags(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tag_apps_app ON tag_apps(app_id);

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detector_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL,
                last_active_at TEXT,
                last_inactive_at TEXT,
                next_tick_at TEXT
            );
            ",
        )?;

        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO scene_tags (id, name, color, is_default, usage_count)
             VALUES (?, ?, ?, 1, 0)",
        )?;
        for tag in fl_core::tag::default_tags() {
            stmt.execute(params![tag.id.as_str(), tag.name, tag.color])?;
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T, DbError>) -> Result<T, StoreError> {
        f(&self.conn).map_err(DbError::into_read)
    }

    fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T, DbError>) -> Result<T, StoreError> {
        f(&self.conn).map_err(DbError::into_write)
    }
}

const APP_SESSION_COLUMNS: &str = "id, app_id, app_name, category_id, start_time, end_time, \
     duration, interruption_count, is_productive, scene_tag_id";

const FOCUS_SESSION_COLUMNS: &str = "id, start_time, end_time, duration, is_valid";

/// Raw `app_sessions` row before validation.
struct AppSessionRow {
    id: String,
    app_id: String,
    app_name: String,
    category_id: Option<String>,
    start_time: String,
    end_time: Option<String>,
    duration: i64,
    interruption_count: i64,
    is_productive: bool,
    scene_tag_id: Option<String>,
}

impl AppSessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            app_id: row.get(1)?,
            app_name: row.get(2)?,
            category_id: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            duration: row.get(6)?,
            interruption_count: row.get(7)?,
            is_productive: row.get(8)?,
            scene_tag_id: row.get(9)?,
        })
    }

    fn into_session(self) -> Result<AppSession, DbError> {
        Ok(AppSession {
            id: SessionId::new(self.id)?,
            app_id: AppId::new(self.app_id)?,
            app_name: self.app_name,
            category_id: self.category_id,
            start_time: parse_timestamp(&self.start_time, "start_time")?,
            end_time: self
                .end_time
                .as_deref()
                .map(|value| parse_timestamp(value, "end_time"))
                .transpose()?,
            duration_secs: self.duration,
            interruption_count: u32::try_from(self.interruption_count).map_err(|_| {
                DbError::OutOfRange {
                    column: "interruption_count",
                    value: self.interruption_count,
                }
            })?,
            is_productive: self.is_productive,
            scene_tag_id: self.scene_tag_id.map(TagId::new).transpose()?,
        })
    }
}

/// Raw `focus_sessions` row before validation.
struct FocusSessionRow {
    id: String,
    start_time: String,
    end_time: String,
    duration: i64,
    is_valid: bool,
}

impl FocusSessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            duration: row.get(3)?,
            is_valid: row.get(4)?,
        })
    }

    fn into_session(self) -> Result<FocusSession, DbError> {
        Ok(FocusSession {
            id: SessionId::new(self.id)?,
            start_time: parse_timestamp(&self.start_time, "start_time")?,
            end_time: parse_timestamp(&self.end_time, "end_time")?,
            duration_secs: self.duration,
            is_valid: self.is_valid,
        })
    }
}

/// Raw `scene_tags` row before validation.
struct TagRow {
    id: String,
    name: String,
    color: String,
    is_default: bool,
    usage_count: i64,
}

impl TagRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
            is_default: row.get(3)?,
            usage_count: row.get(4)?,
        })
    }

    fn into_tag(self) -> Result<SceneTag, DbError> {
        Ok(SceneTag {
            id: TagId::new(self.id)?,
            name: self.name,
            color: self.color,
            is_default: self.is_default,
            usage_count: u64::try_from(self.usage_count).map_err(|_| DbError::OutOfRange {
                column: "usage_count",
                value: self.usage_count,
            })?,
        })
    }
}

fn query_app_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<AppSession>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, AppSessionRow::from_row)?;
    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?.into_session()?);
    }
    Ok(sessions)
}

fn query_focus_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<FocusSession>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, FocusSessionRow::from_row)?;
    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?.into_session()?);
    }
    Ok(sessions)
}

fn load_app_session(conn: &Connection, id: &SessionId) -> Result<Option<AppSession>, DbError> {
    conn.query_row(
        &format!("SELECT {APP_SESSION_COLUMNS} FROM app_sessions WHERE id = ?"),
        [id.as_str()],
        AppSessionRow::from_row,
    )
    .optional()?
    .map(AppSessionRow::into_session)
    .transpose()
}

fn tag_exists(conn: &Connection, id: &TagId) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM scene_tags WHERE id = ?", [id.as_str()], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn ensure_changed(changed: usize, kind: &'static str, id: &str) -> Result<(), DbError> {
    if changed == 0 {
        return Err(DbError::NotFound {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn parse_timestamp(value: &str, column: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            column,
            value: value.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl Store for Database {
    fn insert_app_session(&self, session: &AppSession) -> Result<(), StoreError> {
        self.write(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO app_sessions ({APP_SESSION_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    session.id.as_str(),
                    session.app_id.as_str(),
                    session.app_name,
                    session.category_id,
                    format_timestamp(session.start_time),
                    session.end_time.map(format_timestamp),
                    session.duration_secs,
                    session.interruption_count,
                    session.is_productive,
                    session.scene_tag_id.as_ref().map(TagId::as_str),
                ],
            )?;
            Ok(())
        })
    }

    fn end_app_session(
        &self,
        id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<AppSession, StoreError> {
        self.write(|conn| {
            let mut session = load_app_session(conn, id)?.ok_or_else(|| DbError::NotFound {
                kind: "session",
                id: id.to_string(),
            })?;
            if !session.is_open() {
                return Err(DbError::Conflict(format!("session {id} already ended")));
            }
            session.end(end_time);
            let changed = conn.execute(
                "UPDATE app_sessions SET end_time = ?, duration = ? WHERE id = ? AND end_time IS NULL",
                params![
                    session.end_time.map(format_timestamp),
                    session.duration_secs,
                    id.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(DbError::Conflict(format!("session {id} already ended")));
            }
            Ok(session)
        })
    }

    fn set_session_tag(&self, id: &SessionId, tag_id: Option<&TagId>) -> Result<(), StoreError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE app_sessions SET scene_tag_id = ? WHERE id = ?",
                params![tag_id.map(TagId::as_str), id.as_str()],
            )?;
            ensure_changed(changed, "session", id.as_str())
        })
    }

    fn set_session_productive(&self, id: &SessionId, productive: bool) -> Result<(), StoreError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE app_sessions SET is_productive = ? WHERE id = ?",
                params![productive, id.as_str()],
            )?;
            ensure_changed(changed, "session", id.as_str())
        })
    }

    fn get_app_session(&self, id: &SessionId) -> Result<Option<AppSession>, StoreError> {
        self.read(|conn| load_app_session(conn, id))
    }

    fn app_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>, StoreError> {
        if end <= start {
            return Ok(Vec::new());
        }
        self.read(|conn| {
            query_app_sessions(
                conn,
                &format!(
                    "SELECT {APP_SESSION_COLUMNS} FROM app_sessions
                     WHERE start_time >= ? AND start_time < ?
                     ORDER BY start_time ASC, id ASC"
                ),
                [format_timestamp(start), format_timestamp(end)],
            )
        })
    }

    fn recent_app_sessions(
        &self,
        app_id: &AppId,
        limit: usize,
    ) -> Result<Vec<AppSession>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|conn| {
            query_app_sessions(
                conn,
                &format!(
                    "SELECT {APP_SESSION_COLUMNS} FROM app_sessions
                     WHERE app_id = ? AND end_time IS NOT NULL
                     ORDER BY start_time DESC, id ASC
                     LIMIT ?"
                ),
                params![app_id.as_str(), limit],
            )
        })
    }

    fn insert_focus_session(&self, session: &FocusSession) -> Result<(), StoreError> {
        self.write(|conn| {
            conn.execute(
                &format!("INSERT INTO focus_sessions ({FOCUS_SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?)"),
                params![
                    session.id.as_str(),
                    format_timestamp(session.start_time),
                    format_timestamp(session.end_time),
                    session.duration_secs,
                    session.is_valid,
                ],
            )?;
            Ok(())
        })
    }

    fn focus_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        valid_only: bool,
    ) -> Result<Vec<FocusSession>, StoreError> {
        if end <= start {
            return Ok(Vec::new());
        }
        self.read(|conn| {
            query_focus_sessions(
                conn,
                &format!(
                    "SELECT {FOCUS_SESSION_COLUMNS} FROM focus_sessions
                     WHERE start_time >= ? AND start_time < ? AND (is_valid = 1 OR ? = 0)
                     ORDER BY start_time ASC, id ASC"
                ),
                params![format_timestamp(start), format_timestamp(end), valid_only],
            )
        })
    }

    fn overlapping_focus_sessions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusSession>, StoreError> {
        self.read(|conn| {
            query_focus_sessions(
                conn,
                &format!(
                    "SELECT {FOCUS_SESSION_COLUMNS} FROM focus_sessions
                     WHERE is_valid = 1 AND start_time <= ? AND end_time >= ?
                     ORDER BY start_time ASC, id ASC"
                ),
                [format_timestamp(end), format_timestamp(start)],
            )
        })
    }

    fn list_tags(&self) -> Result<Vec<SceneTag>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT id, name, color, is_default, usage_count
                FROM scene_tags
                ORDER BY is_default DESC, name ASC
                ",
            )?;
            let rows = stmt.query_map([], TagRow::from_row)?;
            let mut tags = Vec::new();
            for row in rows {
                tags.push(row?.into_tag()?);
            }
            Ok(tags)
        })
    }

    fn get_tag(&self, id: &TagId) -> Result<Option<SceneTag>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT id, name, color, is_default, usage_count FROM scene_tags WHERE id = ?",
                [id.as_str()],
                TagRow::from_row,
            )
            .optional()?
            .map(TagRow::into_tag)
            .transpose()
        })
    }

    fn insert_tag(&self, tag: &SceneTag) -> Result<(), StoreError> {
        self.write(|conn| {
            let usage_count = i64::try_from(tag.usage_count).unwrap_or(i64::MAX);
            conn.execute(
                "INSERT INTO scene_tags (id, name, color, is_default, usage_count)
                 VALUES (?, ?, ?, ?, ?)",
                params![tag.id.as_str(), tag.name, tag.color, tag.is_default, usage_count],
            )?;
            Ok(())
        })
    }

    fn rename_tag(&self, id: &TagId, name: &str) -> Result<(), StoreError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE scene_tags SET name = ? WHERE id = ?",
                params![name, id.as_str()],
            )?;
            ensure_changed(changed, "tag", id.as_str())
        })
    }

    fn delete_tag(&self, id: &TagId) -> Result<(), StoreError> {
        // Associations cascade and session references are nulled by the
        // foreign keys.
        self.write(|conn| {
            let changed = conn.execute("DELETE FROM scene_tags WHERE id = ?", [id.as_str()])?;
            ensure_changed(changed, "tag", id.as_str())
        })
    }

    fn increment_tag_usage(&self, id: &TagId) -> Result<(), StoreError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE scene_tags SET usage_count = usage_count + 1 WHERE id = ?",
                [id.as_str()],
            )?;
            ensure_changed(changed, "tag", id.as_str())
        })
    }

    fn add_association(&self, tag_id: &TagId, app_id: &AppId) -> Result<(), StoreError> {
        self.write(|conn| {
            if !tag_exists(conn, tag_id)? {
                return Err(DbError::NotFound {
                    kind: "tag",
                    id: tag_id.to_string(),
                });
            }
            conn.execute(
                "INSERT OR IGNORE INTO tag_apps (tag_id, app_id) VALUES (?, ?)",
                params![tag_id.as_str(), app_id.as_str()],
            )?;
            Ok(())
        })
    }

    fn associations(&self) -> Result<Vec<TagAssociation>, StoreError> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT tag_id, app_id FROM tag_apps ORDER BY tag_id ASC, app_id ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut associations = Vec::new();
            for row in rows {
                let (tag_id, app_id) = row?;
                associations.push(TagAssociation {
                    tag_id: TagId::new(tag_id)?,
                    app_id: AppId::new(app_id)?,
                });
            }
            Ok(associations)
        })
    }

    fn tags_for_app(&self, app_id: &AppId) -> Result<Vec<TagId>, StoreError> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT tag_id FROM tag_apps WHERE app_id = ? ORDER BY tag_id ASC")?;
            let rows = stmt.query_map([app_id.as_str()], |row| row.get::<_, String>(0))?;
            let mut tags = Vec::new();
            for row in rows {
                tags.push(TagId::new(row?)?);
            }
            Ok(tags)
        })
    }

    fn load_settings(&self) -> Result<Settings, StoreError> {
        self.read(|conn| {
            let data: Option<String> = conn
                .query_row("SELECT data FROM settings WHERE id = 1", [], |row| row.get(0))
                .optional()?;
            if let Some(data) = data {
                return Ok(serde_json::from_str(&data)?);
            }
            let settings = Settings::default();
            conn.execute(
                "INSERT OR IGNORE INTO settings (id, data) VALUES (1, ?)",
                [serde_json::to_string(&settings)?],
            )?;
            tracing::debug!("created default settings");
            Ok(settings)
        })
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO settings (id, data) VALUES (1, ?)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                [serde_json::to_string(settings)?],
            )?;
            Ok(())
        })
    }

    fn load_detector(&self) -> Result<Option<DetectorSnapshot>, StoreError> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT state, last_active_at, last_inactive_at, next_tick_at
                     FROM detector_state WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()?;
            let Some((state, last_active, last_inactive, next_tick)) = row else {
                return Ok(None);
            };
            let parse = |value: Option<String>, column| {
                value
                    .as_deref()
                    .map(|value| parse_timestamp(value, column))
                    .transpose()
            };
            Ok(Some(DetectorSnapshot {
                state: DetectorState::from_str(&state)?,
                last_active_at: parse(last_active, "last_active_at")?,
                last_inactive_at: parse(last_inactive, "last_inactive_at")?,
                next_tick_at: parse(next_tick, "next_tick_at")?,
            }))
        })
    }

    fn save_detector(&self, snapshot: &DetectorSnapshot) -> Result<(), StoreError> {
        self.write(|conn| {
            conn.execute(
                "
                INSERT INTO detector_state (id, state, last_active_at, last_inactive_at, next_tick_at)
                VALUES (1, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    last_active_at = excluded.last_active_at,
                    last_inactive_at = excluded.last_inactive_at,
                    next_tick_at = excluded.next_tick_at
                ",
                params![
                    snapshot.state.as_str(),
                    snapshot.last_active_at.map(format_timestamp),
                    snapshot.last_inactive_at.map(format_timestamp),
                    snapshot.next_tick_at.map(format_timestamp),
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::TimeZone;
    use fl_core::FocusCandidate;
    use fl_core::tag::names;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn completed(app: &str, start: i64, end: i64) -> AppSession {
        let mut session = AppSession::begin(AppId::new(app).unwrap(), app, None, ts(start));
        session.end(ts(end));
        session
    }

    fn tag_named(db: &Database, name: &str) -> SceneTag {
        db.list_tags()
            .unwrap()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");

        assert_eq!(
            table_columns(&db.conn, "app_sessions"),
            vec![
                "id",
                "app_id",
                "app_name",
                "category_id",
                "start_time",
                "end_time",
                "duration",
                "interruption_count",
                "is_productive",
                "scene_tag_id",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "focus_sessions"),
            vec!["id", "start_time", "end_time", "duration", "is_valid"]
        );
        assert_eq!(
            table_columns(&db.conn, "scene_tags"),
            vec!["id", "name", "color", "is_default", "usage_count"]
        );
        assert_eq!(table_columns(&db.conn, "tag_apps"), vec!["tag_id", "app_id"]);

        let indexes = index_names(&db.conn, "app_sessions");
        assert!(indexes.contains("idx_app_sessions_start"));
        assert!(indexes.contains("idx_app_sessions_app"));
        assert!(index_names(&db.conn, "focus_sessions").contains("idx_focus_sessions_start"));
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .expect("prepare index_list");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query index_list");
        rows.map(|row| row.expect("index_list row")).collect()
    }

    #[test]
    fn default_tags_are_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focuslog.db");
        {
            let db = Database::open(&path).unwrap();
            assert_eq!(db.list_tags().unwrap().len(), 6);
        }
        let db = Database::open(&path).unwrap();
        let tags = db.list_tags().unwrap();
        assert_eq!(tags.len(), 6);
        assert!(tags.iter().all(|t| t.is_default));
    }

    #[test]
    fn app_session_roundtrip_preserves_fields() {
        let db = Database::open_in_memory().unwrap();
        let work = tag_named(&db, names::WORK);
        let mut session = completed("com.microsoft.VSCode", 0, 45);
        session.category_id = Some("developer_tools".into());
        session.interruption_count = 3;
        session.is_productive = true;
        session.scene_tag_id = Some(work.id);
        db.insert_app_session(&session).unwrap();

        assert_eq!(db.get_app_session(&session.id).unwrap(), Some(session));
    }

    #[test]
    fn sub_second_timestamps_keep_duration_consistent() {
        let db = Database::open_in_memory().unwrap();
        let start = ts(0) + chrono::Duration::nanoseconds(500_000);
        let mut session = AppSession::begin(AppId::new("x").unwrap(), "X", None, start);
        session.end(ts(10) + chrono::Duration::nanoseconds(400_000));
        db.insert_app_session(&session).unwrap();

        let stored = db.get_app_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.completed_duration(), Some(599));
    }

    #[test]
    fn duplicate_session_id_is_a_conflict() {
        let db = Database::open_in_memory().unwrap();
        let session = completed("x", 0, 10);
        db.insert_app_session(&session).unwrap();
        assert!(matches!(
            db.insert_app_session(&session),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn end_app_session_sets_both_fields() {
        let db = Database::open_in_memory().unwrap();
        let open = AppSession::begin(AppId::new("x").unwrap(), "X", None, ts(0));
        db.insert_app_session(&open).unwrap();
        assert_eq!(db.get_app_session(&open.id).unwrap().unwrap().end_time, None);

        let ended = db.end_app_session(&open.id, ts(30)).unwrap();
        assert_eq!(ended.duration_secs, 1800);
        let stored = db.get_app_session(&open.id).unwrap().unwrap();
        assert_eq!(stored.end_time, Some(ts(30)));
        assert_eq!(stored.completed_duration(), Some(1800));

        let missing = SessionId::new("missing").unwrap();
        assert!(matches!(
            db.end_app_session(&missing, ts(30)),
            Err(StoreError::NotFound { kind: "session", .. })
        ));
    }

    #[test]
    fn ended_session_cannot_be_ended_again() {
        let db = Database::open_in_memory().unwrap();
        let open = AppSession::begin(AppId::new("x").unwrap(), "X", None, ts(0));
        db.insert_app_session(&open).unwrap();
        db.end_app_session(&open.id, ts(10)).unwrap();

        assert!(matches!(
            db.end_app_session(&open.id, ts(90)),
            Err(StoreError::Conflict(_))
        ));
        let stored = db.get_app_session(&open.id).unwrap().unwrap();
        assert_eq!(stored.end_time, Some(ts(10)));
        assert_eq!(stored.duration_secs, 600);
    }

    #[test]
    fn range_query_is_half_open_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        for (start, end) in [(30, 40), (0, 10), (60, 70)] {
            db.insert_app_session(&completed("x", start, end)).unwrap();
        }
        let sessions = db.app_sessions_in_range(ts(0), ts(60)).unwrap();
        let starts: Vec<_> = sessions.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![ts(0), ts(30)]);
        assert!(db.app_sessions_in_range(ts(60), ts(0)).unwrap().is_empty());
    }

    #[test]
    fn recent_sessions_skip_open_and_limit() {
        let db = Database::open_in_memory().unwrap();
        for start in [0, 20, 40] {
            db.insert_app_session(&completed("x", start, start + 10)).unwrap();
        }
        db.insert_app_session(&completed("y", 50, 60)).unwrap();
        let open = AppSession::begin(AppId::new("x").unwrap(), "x", None, ts(70));
        db.insert_app_session(&open).unwrap();

        let recent = db.recent_app_sessions(&AppId::new("x").unwrap(), 2).unwrap();
        let starts: Vec<_> = recent.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![ts(40), ts(20)]);
    }

    #[test]
    fn focus_sessions_range_and_overlap() {
        let db = Database::open_in_memory().unwrap();
        let first = FocusSession::accepted(FocusCandidate::new(ts(0), ts(40)));
        let second = FocusSession::accepted(FocusCandidate::new(ts(100), ts(140)));
        db.insert_focus_session(&first).unwrap();
        db.insert_focus_session(&second).unwrap();

        let in_range = db.focus_sessions_in_range(ts(0), ts(100), true).unwrap();
        assert_eq!(in_range, vec![first.clone()]);

        // The overlap interval is closed on both ends.
        let touching = db.overlapping_focus_sessions(ts(40), ts(60)).unwrap();
        assert_eq!(touching, vec![first]);
        assert!(db.overlapping_focus_sessions(ts(41), ts(99)).unwrap().is_empty());
    }

    #[test]
    fn tag_names_are_unique_and_case_sensitive() {
        let db = Database::open_in_memory().unwrap();
        let lower = SceneTag::custom("work", "#000000").unwrap();
        db.insert_tag(&lower).unwrap();
        let dup = SceneTag::custom(names::WORK, "#000000").unwrap();
        assert!(matches!(db.insert_tag(&dup), Err(StoreError::Conflict(_))));
        assert!(matches!(
            db.rename_tag(&lower.id, names::WORK),
            Err(StoreError::Conflict(_))
        ));
        db.rename_tag(&lower.id, "Chores").unwrap();
        assert_eq!(db.get_tag(&lower.id).unwrap().unwrap().name, "Chores");
    }

    #[test]
    fn listing_puts_defaults_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_tag(&SceneTag::custom("Admin", "#123456").unwrap()).unwrap();
        let names: Vec<_> = db.list_tags().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["Entertainment", "Health", "Reading", "Social", "Study", "Work", "Admin"]
        );
    }

    #[test]
    fn delete_tag_clears_relations() {
        let db = Database::open_in_memory().unwrap();
        let tag = SceneTag::custom("Errands", "#abcdef").unwrap();
        db.insert_tag(&tag).unwrap();
        let app = AppId::new("com.example.todo").unwrap();
        db.add_association(&tag.id, &app).unwrap();
        db.add_association(&tag.id, &app).unwrap();
        assert_eq!(db.tags_for_app(&app).unwrap(), vec![tag.id.clone()]);

        let mut session = completed("com.example.todo", 0, 10);
        session.scene_tag_id = Some(tag.id.clone());
        db.insert_app_session(&session).unwrap();

        db.delete_tag(&tag.id).unwrap();
        assert!(db.tags_for_app(&app).unwrap().is_empty());
        assert!(db.associations().unwrap().is_empty());
        assert_eq!(
            db.get_app_session(&session.id).unwrap().unwrap().scene_tag_id,
            None
        );
        assert!(matches!(
            db.delete_tag(&tag.id),
            Err(StoreError::NotFound { kind: "tag", .. })
        ));
    }

    #[test]
    fn association_requires_existing_tag() {
        let db = Database::open_in_memory().unwrap();
        let missing = TagId::new("missing").unwrap();
        assert!(matches!(
            db.add_association(&missing, &AppId::new("x").unwrap()),
            Err(StoreError::NotFound { kind: "tag", .. })
        ));
    }

    #[test]
    fn usage_count_increments() {
        let db = Database::open_in_memory().unwrap();
        let work = tag_named(&db, names::WORK);
        db.increment_tag_usage(&work.id).unwrap();
        db.increment_tag_usage(&work.id).unwrap();
        assert_eq!(db.get_tag(&work.id).unwrap().unwrap().usage_count, 2);
    }

    #[test]
    fn settings_created_on_first_access_and_saved() {
        let db = Database::open_in_memory().unwrap();
        let mut settings = db.load_settings().unwrap();
        assert_eq!(settings, Settings::default());

        settings.daily_focus_goal_secs = 7200;
        settings.lunch_window = None;
        db.save_settings(&settings).unwrap();
        assert_eq!(db.load_settings().unwrap(), settings);
    }

    #[test]
    fn detector_snapshot_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focuslog.db");
        let snapshot = DetectorSnapshot {
            state: DetectorState::Inactive,
            last_active_at: Some(ts(0)),
            last_inactive_at: Some(ts(5)),
            next_tick_at: Some(ts(20)),
        };
        {
            let db = Database::open(&path).unwrap();
            assert_eq!(db.load_detector().unwrap(), None);
            db.save_detector(&snapshot).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.load_detector().unwrap(), Some(snapshot));
    }

    #[test]
    fn corrupt_rows_surface_as_read_errors() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO focus_sessions (id, start_time, end_time, duration, is_valid)
                 VALUES ('bad', '2025-03-10Tbad', 'today', 60, 1)",
                [],
            )
            .unwrap();
        assert!(matches!(
            db.overlapping_focus_sessions(ts(-100_000), ts(100_000)),
            Err(StoreError::Read(_))
        ));
    }
}
