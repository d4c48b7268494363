//! The persistence contract.
//!
//! Every engine reaches storage only through [`Store`]. Each write method
//! touches a single record so an interrupted caller can never leave a
//! half-written session behind.
//!
//! [`MemoryStore`] is a complete in-process implementation, used by tests
//! and by embedders that persist elsewhere.

use std::collections::BTreeSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::detector::DetectorSnapshot;
use crate::error::StoreError;
use crate::session::{AppSession, FocusSession};
use crate::settings::Settings;
use crate::tag::{SceneTag, TagAssociation, default_tags};
use crate::types::{AppId, SessionId, TagId};

/// Queryable storage for sessions, tags, settings and detector state.
pub trait Store {
    /// Inserts an app session (open or completed).
    fn insert_app_session(&self, session: &AppSession) -> Result<(), StoreError>;

    /// Sets `end_time` and `duration` of an open session in one write.
    ///
    /// Returns the updated session. Fails with [`StoreError::Conflict`] if
    /// the session already ended.
    fn end_app_session(
        &self,
        id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<AppSession, StoreError>;

    /// Sets or clears the scene tag of a session.
    fn set_session_tag(&self, id: &SessionId, tag_id: Option<&TagId>) -> Result<(), StoreError>;

    /// Recomputes the productivity flag of a session.
    fn set_session_productive(&self, id: &SessionId, productive: bool) -> Result<(), StoreError>;

    /// Fetches one app session.
    fn get_app_session(&self, id: &SessionId) -> Result<Option<AppSession>, StoreError>;

    /// App sessions whose `start_time` is in `[start, end)`, ordered by start time.
    fn app_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>, StoreError>;

    /// The most recent completed sessions of one app, newest first.
    fn recent_app_sessions(
        &self,
        app_id: &AppId,
        limit: usize,
    ) -> Result<Vec<AppSession>, StoreError>;

    /// Inserts a focus session.
    fn insert_focus_session(&self, session: &FocusSession) -> Result<(), StoreError>;

    /// Focus sessions whose `start_time` is in `[start, end)`, ordered by start time.
    fn focus_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        valid_only: bool,
    ) -> Result<Vec<FocusSession>, StoreError>;

    /// Valid focus sessions intersecting the closed interval `[start, end]`.
    fn overlapping_focus_sessions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusSession>, StoreError>;

    /// All tags, defaults first, then by name.
    fn list_tags(&self) -> Result<Vec<SceneTag>, StoreError>;

    /// Fetches one tag.
    fn get_tag(&self, id: &TagId) -> Result<Option<SceneTag>, StoreError>;

    /// Inserts a tag. Fails with [`StoreError::Conflict`] on a duplicate name.
    fn insert_tag(&self, tag: &SceneTag) -> Result<(), StoreError>;

    /// Renames a tag. Fails with [`StoreError::Conflict`] on a duplicate name.
    fn rename_tag(&self, id: &TagId, name: &str) -> Result<(), StoreError>;

    /// Deletes a tag, its associations, and clears it from sessions.
    fn delete_tag(&self, id: &TagId) -> Result<(), StoreError>;

    /// Increments a tag's usage counter.
    fn increment_tag_usage(&self, id: &TagId) -> Result<(), StoreError>;

    /// Records a `(tag, app)` association, ignoring duplicates.
    fn add_association(&self, tag_id: &TagId, app_id: &AppId) -> Result<(), StoreError>;

    /// All associations ordered by tag then app.
    fn associations(&self) -> Result<Vec<TagAssociation>, StoreError>;

    /// Tags explicitly associated with an app.
    fn tags_for_app(&self, app_id: &AppId) -> Result<Vec<TagId>, StoreError>;

    /// Loads settings, creating the default record on first access.
    fn load_settings(&self) -> Result<Settings, StoreError>;

    /// Replaces the settings record.
    fn save_settings(&self, settings: &Settings) -> Result<(), StoreError>;

    /// Loads the persisted detector snapshot, if any.
    fn load_detector(&self) -> Result<Option<DetectorSnapshot>, StoreError>;

    /// Replaces the persisted detector snapshot.
    fn save_detector(&self, snapshot: &DetectorSnapshot) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    app_sessions: Vec<AppSession>,
    focus_sessions: Vec<FocusSession>,
    tags: Vec<SceneTag>,
    associations: BTreeSet<(TagId, AppId)>,
    settings: Option<Settings>,
    detector: Option<DetectorSnapshot>,
}

/// An in-memory [`Store`] seeded with the default tags.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the default tags.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                tags: default_tags(),
                ..MemoryState::default()
            }),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes subsequent reads fail, simulating an unavailable store.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes fail, simulating an unavailable store.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> Result<T, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("memory store unavailable".to_string()));
        }
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Read("memory store lock poisoned".to_string()))?;
        Ok(f(&state))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("memory store unavailable".to_string()));
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Write("memory store lock poisoned".to_string()))?;
        f(&mut state)
    }
}

fn session_not_found(id: &SessionId) -> StoreError {
    StoreError::NotFound {
        kind: "session",
        id: id.to_string(),
    }
}

fn tag_not_found(id: &TagId) -> StoreError {
    StoreError::NotFound {
        kind: "tag",
        id: id.to_string(),
    }
}

fn app_session_mut<'a>(
    state: &'a mut MemoryState,
    id: &SessionId,
) -> Result<&'a mut AppSession, StoreError> {
    state
        .app_sessions
        .iter_mut()
        .find(|s| &s.id == id)
        .ok_or_else(|| session_not_found(id))
}

fn tag_mut<'a>(state: &'a mut MemoryState, id: &TagId) -> Result<&'a mut SceneTag, StoreError> {
    state
        .tags
        .iter_mut()
        .find(|t| &t.id == id)
        .ok_or_else(|| tag_not_found(id))
}

impl Store for MemoryStore {
    fn insert_app_session(&self, session: &AppSession) -> Result<(), StoreError> {
        self.write(|state| {
            if state.app_sessions.iter().any(|s| s.id == session.id) {
                return Err(StoreError::Conflict(format!(
                    "session {} already exists",
                    session.id
                )));
            }
            state.app_sessions.push(session.clone());
            Ok(())
        })
    }

    fn end_app_session(
        &self,
        id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<AppSession, StoreError> {
        self.write(|state| {
            let session = app_session_mut(state, id)?;
            if !session.is_open() {
                return Err(StoreError::Conflict(format!("session {id} already ended")));
            }
            session.end(end_time);
            Ok(session.clone())
        })
    }

    fn set_session_tag(&self, id: &SessionId, tag_id: Option<&TagId>) -> Result<(), StoreError> {
        self.write(|state| {
            app_session_mut(state, id)?.scene_tag_id = tag_id.cloned();
            Ok(())
        })
    }

    fn set_session_productive(&self, id: &SessionId, productive: bool) -> Result<(), StoreError> {
        self.write(|state| {
            app_session_mut(state, id)?.is_productive = productive;
            Ok(())
        })
    }

    fn get_app_session(&self, id: &SessionId) -> Result<Option<AppSession>, StoreError> {
        self.read(|state| state.app_sessions.iter().find(|s| &s.id == id).cloned())
    }

    fn app_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>, StoreError> {
        self.read(|state| {
            let mut sessions: Vec<_> = state
                .app_sessions
                .iter()
                .filter(|s| s.start_time >= start && s.start_time < end)
                .cloned()
                .collect();
            sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
            sessions
        })
    }

    fn recent_app_sessions(
        &self,
        app_id: &AppId,
        limit: usize,
    ) -> Result<Vec<AppSession>, StoreError> {
        self.read(|state| {
            let mut sessions: Vec<_> = state
                .app_sessions
                .iter()
                .filter(|s| &s.app_id == app_id && s.end_time.is_some())
                .cloned()
                .collect();
            sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            sessions.truncate(limit);
            sessions
        })
    }

    fn insert_focus_session(&self, session: &FocusSession) -> Result<(), StoreError> {
        self.write(|state| {
            state.focus_sessions.push(session.clone());
            Ok(())
        })
    }

    fn focus_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        valid_only: bool,
    ) -> Result<Vec<FocusSession>, StoreError> {
        self.read(|state| {
            let mut sessions: Vec<_> = state
                .focus_sessions
                .iter()
                .filter(|s| s.start_time >= start && s.start_time < end)
                .filter(|s| !valid_only || s.is_valid)
                .cloned()
                .collect();
            sessions.sort_by_key(|s| s.start_time);
            sessions
        })
    }

    fn overlapping_focus_sessions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusSession>, StoreError> {
        self.read(|state| {
            state
                .focus_sessions
                .iter()
                .filter(|s| s.is_valid && s.start_time <= end && s.end_time >= start)
                .cloned()
                .collect()
        })
    }

    fn list_tags(&self) -> Result<Vec<SceneTag>, StoreError> {
        self.read(|state| {
            let mut tags = state.tags.clone();
            tags.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
            tags
        })
    }

    fn get_tag(&self, id: &TagId) -> Result<Option<SceneTag>, StoreError> {
        self.read(|state| state.tags.iter().find(|t| &t.id == id).cloned())
    }

    fn insert_tag(&self, tag: &SceneTag) -> Result<(), StoreError> {
        self.write(|state| {
            if state.tags.iter().any(|t| t.name == tag.name || t.id == tag.id) {
                return Err(StoreError::Conflict(format!("tag {} already exists", tag.name)));
            }
            state.tags.push(tag.clone());
            Ok(())
        })
    }

    fn rename_tag(&self, id: &TagId, name: &str) -> Result<(), StoreError> {
        self.write(|state| {
            if state.tags.iter().any(|t| t.name == name && &t.id != id) {
                return Err(StoreError::Conflict(format!("tag {name} already exists")));
            }
            tag_mut(state, id)?.name = name.to_string();
            Ok(())
        })
    }

    fn delete_tag(&self, id: &TagId) -> Result<(), StoreError> {
        self.write(|state| {
            let before = state.tags.len();
            state.tags.retain(|t| &t.id != id);
            if state.tags.len() == before {
                return Err(tag_not_found(id));
            }
            state.associations.retain(|(tag_id, _)| tag_id != id);
            for session in &mut state.app_sessions {
                if session.scene_tag_id.as_ref() == Some(id) {
                    session.scene_tag_id = None;
                }
            }
            Ok(())
        })
    }

    fn increment_tag_usage(&self, id: &TagId) -> Result<(), StoreError> {
        self.write(|state| {
            let tag = tag_mut(state, id)?;
            tag.usage_count = tag.usage_count.saturating_add(1);
            Ok(())
        })
    }

    fn add_association(&self, tag_id: &TagId, app_id: &AppId) -> Result<(), StoreError> {
        self.write(|state| {
            if !state.tags.iter().any(|t| &t.id == tag_id) {
                return Err(tag_not_found(tag_id));
            }
            state.associations.insert((tag_id.clone(), app_id.clone()));
            Ok(())
        })
    }

    fn associations(&self) -> Result<Vec<TagAssociation>, StoreError> {
        self.read(|state| {
            state
                .associations
                .iter()
                .map(|(tag_id, app_id)| TagAssociation {
                    tag_id: tag_id.clone(),
                    app_id: app_id.clone(),
                })
                .collect()
        })
    }

    fn tags_for_app(&self, app_id: &AppId) -> Result<Vec<TagId>, StoreError> {
        self.read(|state| {
            state
                .associations
                .iter()
                .filter(|(_, a)| a == app_id)
                .map(|(t, _)| t.clone())
                .collect()
        })
    }

    fn load_settings(&self) -> Result<Settings, StoreError> {
        if let Some(settings) = self.read(|state| state.settings.clone())? {
            return Ok(settings);
        }
        self.write(|state| Ok(state.settings.get_or_insert_with(Settings::default).clone()))
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.write(|state| {
            state.settings = Some(settings.clone());
            Ok(())
        })
    }

    fn load_detector(&self) -> Result<Option<DetectorSnapshot>, StoreError> {
        self.read(|state| state.detector.clone())
    }

    fn save_detector(&self, snapshot: &DetectorSnapshot) -> Result<(), StoreError> {
        self.write(|state| {
            state.detector = Some(snapshot.clone());
            Ok(())
        })
    }
}
