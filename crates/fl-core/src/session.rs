//! App usage sessions and focus sessions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AppId, SessionId, TagId};

/// A span of foreground usage of one app.
///
/// `end_time` and `duration_secs` are only authoritative once the session has
/// been ended; both are written together by [`AppSession::end`] and by the
/// store's `end_app_session`, so readers never observe one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSession {
    pub id: SessionId,
    pub app_id: AppId,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: i64,
    #[serde(default)]
    pub interruption_count: u32,
    #[serde(default)]
    pub is_productive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_tag_id: Option<TagId>,
}

impl AppSession {
    /// Starts a new, still-open session.
    pub fn begin(
        app_id: AppId,
        app_name: impl Into<String>,
        category_id: Option<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            app_id,
            app_name: app_name.into(),
            category_id,
            start_time,
            end_time: None,
            duration_secs: 0,
            interruption_count: 0,
            is_productive: false,
            scene_tag_id: None,
        }
    }

    /// Ends the session, setting end time and duration together.
    ///
    /// An end before the start is clamped to the start.
    pub fn end(&mut self, end_time: DateTime<Utc>) {
        let end_time = end_time.max(self.start_time);
        self.duration_secs = (end_time - self.start_time).num_seconds();
        self.end_time = Some(end_time);
    }

    /// Returns the duration if this session is completed and consistent.
    ///
    /// Open sessions and records with a negative duration, an end before the
    /// start, or a duration that disagrees with the timestamps return `None`
    /// and must be excluded from aggregates.
    pub fn completed_duration(&self) -> Option<i64> {
        let end = self.end_time?;
        if end < self.start_time || self.duration_secs < 0 {
            return None;
        }
        if (end - self.start_time).num_seconds() != self.duration_secs {
            return None;
        }
        Some(self.duration_secs)
    }

    /// Returns whether the record is open (no end yet).
    pub const fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// An unvalidated `(start, end)` pair proposed by the detector.
///
/// Candidates are never persisted as-is; the validator either turns one into
/// a [`FocusSession`] or discards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusCandidate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FocusCandidate {
    /// Creates a candidate.
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Length of the candidate (negative if `end < start`).
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// A validated focus period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: SessionId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
    /// The validator's verdict. Rejected candidates are discarded rather than
    /// stored, so persisted rows are always `true`.
    pub is_valid: bool,
}

impl FocusSession {
    /// Builds an accepted session from a candidate.
    pub fn accepted(candidate: FocusCandidate) -> Self {
        Self {
            id: SessionId::generate(),
            start_time: candidate.start,
            end_time: candidate.end,
            duration_secs: candidate.duration().num_seconds(),
            is_valid: true,
        }
    }

    /// Returns whether this session overlaps `[start, end]` widened by `buffer` on both sides.
    pub fn overlaps_within(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        buffer: Duration,
    ) -> bool {
        self.start_time <= end + buffer && self.end_time >= start - buffer
    }
}
