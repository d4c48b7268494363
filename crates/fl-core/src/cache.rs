//! Memoization of statistics results.
//!
//! Entries are keyed by `(operation, date key)` and stamped with the epoch
//! current when their computation started. An entry is fresh iff it is
//! younger than the TTL and its epoch matches the current one. Any write to
//! session or tag data bumps the epoch, which invalidates every entry at
//! once without touching the map.
//!
//! Stale entries are kept and served as *last known good* values when the
//! store cannot be read.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::detector::DetectorSnapshot;
use crate::error::StoreError;
use crate::session::{AppSession, FocusSession};
use crate::settings::Settings;
use crate::store::Store;
use crate::tag::{SceneTag, TagAssociation};
use crate::types::{AppId, SessionId, TagId};

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::minutes(5);

/// Identifies one cached computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    date_key: String,
}

impl CacheKey {
    /// Creates a key for `operation` over `date_key`.
    pub fn new(operation: &'static str, date_key: impl fmt::Display) -> Self {
        Self {
            operation,
            date_key: date_key.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.date_key)
    }
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: DateTime<Utc>,
    epoch: u64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    /// Stale values served because the store could not be read.
    pub stale_served: u64,
    pub entries: usize,
    pub epoch: u64,
}

/// Thread-safe TTL cache with wholesale epoch invalidation.
pub struct StatsCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Entry>>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    stale_served: AtomicU64,
}

impl fmt::Debug for StatsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsCache")
            .field("ttl", &self.ttl)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl StatsCache {
    /// Creates an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    /// Returns the configured TTL.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidates every entry.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a fresh cached value, or computes and caches a new one.
    ///
    /// The epoch is captured before computing, so a write that lands during
    /// the computation leaves the stored entry already stale.
    pub fn get_or_compute<T, F>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
        compute: F,
    ) -> Result<T, StoreError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, StoreError>,
    {
        let epoch = self.epoch();
        if let Some(value) = self.fresh(key, now, epoch) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%key, "stats cache hit");
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%key, "stats cache miss");

        let value = compute()?;
        self.store(key.clone(), value.clone(), now, epoch);
        Ok(value)
    }

    /// Returns the last stored value for `key`, fresh or not.
    pub fn last_known_good<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        let entries = self.entries.read().ok()?;
        let value = entries.get(key)?.value.downcast_ref::<T>().cloned();
        if value.is_some() {
            self.stale_served.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Returns a snapshot of the counters.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            entries: self.entries.read().map_or(0, |e| e.len()),
            epoch: self.epoch(),
        }
    }

    fn fresh<T: Clone + 'static>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
        epoch: u64,
    ) -> Option<T> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        if entry.epoch != epoch || now - entry.stored_at >= self.ttl {
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    fn store<T: Send + Sync + 'static>(
        &self,
        key: CacheKey,
        value: T,
        now: DateTime<Utc>,
        epoch: u64,
    ) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(
                    key,
                    Entry {
                        value: Arc::new(value),
                        stored_at: now,
                        epoch,
                    },
                );
            }
            Err(_) => tracing::warn!(%key, "stats cache lock poisoned; result not cached"),
        }
    }
}

/// A [`Store`] decorator that invalidates a [`StatsCache`] after every
/// successful write to session, tag or settings data.
pub struct InvalidatingStore<'a, S: Store + ?Sized> {
    inner: &'a S,
    cache: &'a StatsCache,
}

impl<'a, S: Store + ?Sized> InvalidatingStore<'a, S> {
    /// Wraps `inner` so its writes invalidate `cache`.
    pub const fn new(inner: &'a S, cache: &'a StatsCache) -> Self {
        Self { inner, cache }
    }

    /// Returns the wrapped store.
    pub const fn inner(&self) -> &'a S {
        self.inner
    }

    fn written<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if result.is_ok() {
            self.cache.invalidate();
        }
        result
    }
}

impl<S: Store + ?Sized> Store for InvalidatingStore<'_, S> {
    fn insert_app_session(&self, session: &AppSession) -> Result<(), StoreError> {
        self.written(self.inner.insert_app_session(session))
    }

    fn end_app_session(
        &self,
        id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<AppSession, StoreError> {
        self.written(self.inner.end_app_session(id, end_time))
    }

    fn set_session_tag(&self, id: &SessionId, tag_id: Option<&TagId>) -> Result<(), StoreError> {
        self.written(self.inner.set_session_tag(id, tag_id))
    }

    fn set_session_productive(&self, id: &SessionId, productive: bool) -> Result<(), StoreError> {
        self.written(self.inner.set_session_productive(id, productive))
    }

    fn get_app_session(&self, id: &SessionId) -> Result<Option<AppSession>, StoreError> {
        self.inner.get_app_session(id)
    }

    fn app_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>, StoreError> {
        self.inner.app_sessions_in_range(start, end)
    }

    fn recent_app_sessions(
        &self,
        app_id: &AppId,
        limit: usize,
    ) -> Result<Vec<AppSession>, StoreError> {
        self.inner.recent_app_sessions(app_id, limit)
    }

    fn insert_focus_session(&self, session: &FocusSession) -> Result<(), StoreError> {
        self.written(self.inner.insert_focus_session(session))
    }

    fn focus_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        valid_only: bool,
    ) -> Result<Vec<FocusSession>, StoreError> {
        self.inner.focus_sessions_in_range(start, end, valid_only)
    }

    fn overlapping_focus_sessions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FocusSession>, StoreError> {
        self.inner.overlapping_focus_sessions(start, end)
    }

    fn list_tags(&self) -> Result<Vec<SceneTag>, StoreError> {
        self.inner.list_tags()
    }

    fn get_tag(&self, id: &TagId) -> Result<Option<SceneTag>, StoreError> {
        self.inner.get_tag(id)
    }

    fn insert_tag(&self, tag: &SceneTag) -> Result<(), StoreError> {
        self.written(self.inner.insert_tag(tag))
    }

    fn rename_tag(&self, id: &TagId, name: &str) -> Result<(), StoreError> {
        self.written(self.inner.rename_tag(id, name))
    }

    fn delete_tag(&self, id: &TagId) -> Result<(), StoreError> {
        self.written(self.inner.delete_tag(id))
    }

    fn increment_tag_usage(&self, id: &TagId) -> Result<(), StoreError> {
        self.written(self.inner.increment_tag_usage(id))
    }

    fn add_association(&self, tag_id: &TagId, app_id: &AppId) -> Result<(), StoreError> {
        self.written(self.inner.add_association(tag_id, app_id))
    }

    fn associations(&self) -> Result<Vec<TagAssociation>, StoreError> {
        self.inner.associations()
    }

    fn tags_for_app(&self, app_id: &AppId) -> Result<Vec<TagId>, StoreError> {
        self.inner.tags_for_app(app_id)
    }

    fn load_settings(&self) -> Result<Settings, StoreError> {
        self.inner.load_settings()
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.written(self.inner.save_settings(settings))
    }

    fn load_detector(&self) -> Result<Option<DetectorSnapshot>, StoreError> {
        self.inner.load_detector()
    }

    // Detector state feeds no statistic.
    fn save_detector(&self, snapshot: &DetectorSnapshot) -> Result<(), StoreError> {
        self.inner.save_detector(snapshot)
    }
}
