//! App usage recording.
//!
//! Device activity arrives through a [`UsageEventSource`]. Each event becomes
//! one completed [`AppSession`] written in a single insert, so an interrupted
//! drain never leaves a half-recorded session.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::events::EventSink;
use crate::recommend::TagRecommender;
use crate::session::AppSession;
use crate::store::Store;
use crate::types::{AppId, SessionId, TagId};

/// Categories whose time counts as productive.
pub const PRODUCTIVE_CATEGORIES: &[&str] = &[
    "productivity",
    "developer_tools",
    "education",
    "business",
    "reference",
    "finance",
];

/// Shortest session that can count as productive.
pub const MIN_PRODUCTIVE: Duration = Duration::minutes(5);

/// One observed span of foreground app usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub app_id: AppId,
    pub app_name: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub interruption_count: u32,
}

/// A pluggable supplier of usage events.
pub trait UsageEventSource {
    /// Returns the next pending event, or `None` when drained.
    fn next_event(&mut self) -> Option<UsageEvent>;
}

impl UsageEventSource for VecDeque<UsageEvent> {
    fn next_event(&mut self) -> Option<UsageEvent> {
        self.pop_front()
    }
}

/// Returns whether a session in `category` lasting `duration` is productive.
pub fn is_productive(category: Option<&str>, duration: Duration) -> bool {
    category.is_some_and(|c| PRODUCTIVE_CATEGORIES.contains(&c)) && duration >= MIN_PRODUCTIVE
}

/// Counts from draining a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub recorded: usize,
    pub skipped: usize,
}

/// Turns usage events into stored, tagged app sessions.
pub struct UsageRecorder<'a, S: Store + ?Sized, E: EventSink + ?Sized> {
    store: &'a S,
    sink: &'a E,
    auto_tag: bool,
}

impl<'a, S: Store + ?Sized, E: EventSink + ?Sized> UsageRecorder<'a, S, E> {
    /// Creates a recorder that auto-tags new sessions.
    pub const fn new(store: &'a S, sink: &'a E) -> Self {
        Self {
            store,
            sink,
            auto_tag: true,
        }
    }

    /// Enables or disables automatic tagging.
    #[must_use]
    pub const fn with_auto_tag(mut self, auto_tag: bool) -> Self {
        self.auto_tag = auto_tag;
        self
    }

    /// Records one event as a completed session.
    ///
    /// Returns `None` for an event that ends before it starts.
    pub fn record(&self, event: UsageEvent) -> Result<Option<AppSession>, StoreError> {
        if event.ended_at < event.started_at {
            tracing::warn!(
                app_id = %event.app_id,
                started_at = %event.started_at,
                ended_at = %event.ended_at,
                "skipping usage event that ends before it starts"
            );
            return Ok(None);
        }

        let mut session =
            AppSession::begin(event.app_id, event.app_name, event.category_id, event.started_at);
        session.end(event.ended_at);
        session.interruption_count = event.interruption_count;
        session.is_productive = is_productive(
            session.category_id.as_deref(),
            Duration::seconds(session.duration_secs),
        );
        let suggested = self.suggest(&session)?;
        session.scene_tag_id.clone_from(&suggested);

        self.store.insert_app_session(&session)?;
        if let Some(tag_id) = &suggested {
            self.store.increment_tag_usage(tag_id)?;
        }
        self.sink.on_app_usage_detected(&session);
        Ok(Some(session))
    }

    /// Records every event from `source`.
    ///
    /// Stops at the first store failure; events already recorded stay.
    pub fn drain(&self, source: &mut dyn UsageEventSource) -> Result<DrainSummary, StoreError> {
        let mut summary = DrainSummary::default();
        while let Some(event) = source.next_event() {
            match self.record(event)? {
                Some(_) => summary.recorded += 1,
                None => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    /// Opens a session for an app that just came to the foreground.
    pub fn begin(
        &self,
        app_id: AppId,
        app_name: &str,
        category_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<AppSession, StoreError> {
        let session = AppSession::begin(app_id, app_name, category_id, at);
        self.store.insert_app_session(&session)?;
        tracing::debug!(id = %session.id, app_id = %session.app_id, "app session opened");
        Ok(session)
    }

    /// Closes an open session, then derives productivity and the tag.
    ///
    /// `end_time` and `duration` are written together by the store.
    pub fn end(&self, id: &SessionId, at: DateTime<Utc>) -> Result<AppSession, StoreError> {
        let mut session = self.store.end_app_session(id, at)?;
        let productive = is_productive(
            session.category_id.as_deref(),
            Duration::seconds(session.duration_secs),
        );
        if productive != session.is_productive {
            self.store.set_session_productive(id, productive)?;
            session.is_productive = productive;
        }
        if session.scene_tag_id.is_none() {
            if let Some(tag_id) = self.suggest(&session)? {
                self.store.set_session_tag(id, Some(&tag_id))?;
                self.store.increment_tag_usage(&tag_id)?;
                session.scene_tag_id = Some(tag_id);
            }
        }
        self.sink.on_app_usage_detected(&session);
        Ok(session)
    }

    fn suggest(&self, session: &AppSession) -> Result<Option<TagId>, StoreError> {
        if !self.auto_tag {
            return Ok(None);
        }
        let recommendation = TagRecommender::new(self.store)
            .recommend(&session.app_id, session.category_id.as_deref())?;
        Ok(recommendation.map(|r| r.tag_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::events::TracingSink;
    use crate::settings::{Settings, TimezoneMode};
    use crate::store::MemoryStore;
    use crate::tag::{find_tag, names};

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap() + Duration::minutes(minutes)
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

    fn event(app: &str, category: Option<&str>, start: i64, end: i64) -> UsageEvent {
        UsageEvent {
            app_id: AppId::new(app).unwrap(),
            app_name: app.to_string(),
            category_id: category.map(str::to_string),
            started_at: ts(start),
            ended_at: ts(end),
            interruption_count: 0,
        }
    }

    #[test]
    fn productivity_needs_category_and_minimum() {
        assert!(is_productive(Some("developer_tools"), Duration::minutes(5)));
        assert!(!is_productive(Some("developer_tools"), Duration::minutes(4)));
        assert!(!is_productive(Some("games"), Duration::minutes(50)));
        assert!(!is_productive(None, Duration::minutes(50)));
    }

    #[test]
    fn adjacent_events_become_distinct_sessions() {
        let store = store();
        let sink = TracingSink;
        let recorder = UsageRecorder::new(&store, &sink);
        let mut source: VecDeque<_> =
            [event("x", None, 0, 10), event("x", None, 12, 20)].into_iter().collect();

        let summary = recorder.drain(&mut source).unwrap();
        assert_eq!(summary.recorded, 2);
        let sessions = store.app_sessions_in_range(ts(0), ts(60)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].duration_secs, 600);
        assert_eq!(sessions[1].duration_secs, 480);
    }

    #[test]
    fn recorded_sessions_are_auto_tagged() {
        let store = store();
        let sink = TracingSink;
        let session = UsageRecorder::new(&store, &sink)
            .record(event("com.microsoft.VSCode", Some("developer_tools"), 0, 30))
            .unwrap()
            .unwrap();

        let work = find_tag(&store, names::WORK).unwrap().unwrap();
        assert_eq!(session.scene_tag_id, Some(work.id.clone()));
        assert!(session.is_productive);
        assert_eq!(store.get_tag(&work.id).unwrap().unwrap().usage_count, 1);
        // Auto-tagging is not a confirmation.
        assert!(store.tags_for_app(&session.app_id).unwrap().is_empty());
    }

    #[test]
    fn backwards_events_are_skipped() {
        let store = store();
        let sink = TracingSink;
        let mut source: VecDeque<_> = [event("x", None, 10, 0)].into_iter().collect();
        let summary = UsageRecorder::new(&store, &sink).drain(&mut source).unwrap();
        assert_eq!(summary, DrainSummary { recorded: 0, skipped: 1 });
    }

    #[test]
    fn begin_then_end_completes_in_one_update() {
        let store = store();
        let sink = TracingSink;
        let recorder = UsageRecorder::new(&store, &sink).with_auto_tag(false);
        let open = recorder
            .begin(AppId::new("x").unwrap(), "X", Some("productivity".into()), ts(0))
            .unwrap();
        let stored = store.get_app_session(&open.id).unwrap().unwrap();
        assert_eq!(stored.completed_duration(), None);

        let ended = recorder.end(&open.id, ts(25)).unwrap();
        assert_eq!(ended.duration_secs, 1500);
        assert!(ended.is_productive);
        assert_eq!(ended.scene_tag_id, None);
        let stored = store.get_app_session(&open.id).unwrap().unwrap();
        assert_eq!(stored.completed_duration(), Some(1500));
        assert!(stored.is_productive);
    }

    #[test]
    fn ending_twice_is_a_conflict() {
        let store = store();
        let sink = TracingSink;
        let recorder = UsageRecorder::new(&store, &sink).with_auto_tag(false);
        let open = recorder
            .begin(AppId::new("x").unwrap(), "X", None, ts(0))
            .unwrap();
        recorder.end(&open.id, ts(10)).unwrap();

        assert!(matches!(
            recorder.end(&open.id, ts(90)),
            Err(StoreError::Conflict(_))
        ));
        let stored = store.get_app_session(&open.id).unwrap().unwrap();
        assert_eq!(stored.duration_secs, 600);
    }

    #[test]
    fn usage_event_parses_from_json() {
        let json = r#"{"app_id":"com.spotify.client","app_name":"Spotify",
            "started_at":"2025-03-10T09:00:00Z","ended_at":"2025-03-10T09:30:00Z"}"#;
        let event: UsageEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.category_id, None);
        assert_eq!(event.interruption_count, 0);
        assert_eq!(event.ended_at - event.started_at, Duration::minutes(30));
    }
}
