//! Scene tag recommendation.
//!
//! A priority cascade classifies an app:
//!
//! | level | source                         | confidence |
//! |-------|--------------------------------|------------|
//! | 1     | explicit (tag, app) association | 1.0       |
//! | 2     | static app table               | 0.9        |
//! | 3     | static category table          | 0.7        |
//! | 4     | recent usage pattern           | 0.4 – 0.6  |
//!
//! [`TagRecommender::recommend`] returns the first level that matches.
//! [`TagRecommender::recommend_top`] collects every level, keeps the best
//! confidence per tag and ranks the result.

use std::collections::HashMap;

use chrono::Duration;
use serde::Serialize;

use crate::calendar::Calendar;
use crate::error::{StoreError, TagError};
use crate::session::AppSession;
use crate::store::Store;
use crate::tag::{DEFAULT_TAGS, SceneTag, names};
use crate::types::{AppId, Confidence, SessionId, TagId};

/// Number of recent sessions the usage heuristic looks at.
pub const PATTERN_WINDOW: usize = 20;

/// Apps with a well-known purpose.
pub const APP_TABLE: &[(&str, &str)] = &[
    ("com.microsoft.VSCode", names::WORK),
    ("com.apple.dt.Xcode", names::WORK),
    ("com.jetbrains.intellij", names::WORK),
    ("com.tinyspeck.slackmacgap", names::WORK),
    ("notion.id", names::WORK),
    ("com.microsoft.teams", names::WORK),
    ("com.google.Gmail", names::WORK),
    ("com.duolingo.DuolingoMobile", names::STUDY),
    ("org.coursera.ios", names::STUDY),
    ("com.khanacademy.Khan-Academy", names::STUDY),
    ("com.ankiapp.client", names::STUDY),
    ("com.netflix.Netflix", names::ENTERTAINMENT),
    ("com.google.ios.youtube", names::ENTERTAINMENT),
    ("com.spotify.client", names::ENTERTAINMENT),
    ("tv.twitch", names::ENTERTAINMENT),
    ("com.facebook.Facebook", names::SOCIAL),
    ("com.burbn.instagram", names::SOCIAL),
    ("com.atebits.Tweetie2", names::SOCIAL),
    ("net.whatsapp.WhatsApp", names::SOCIAL),
    ("com.apple.Health", names::HEALTH),
    ("com.strava.stravaride", names::HEALTH),
    ("com.amazon.Lassen", names::READING),
    ("com.apple.iBooks", names::READING),
    ("com.medium.reader", names::READING),
];

/// System app categories with an obvious tag.
pub const CATEGORY_TABLE: &[(&str, &str)] = &[
    ("productivity", names::WORK),
    ("developer_tools", names::WORK),
    ("business", names::WORK),
    ("education", names::STUDY),
    ("reference", names::STUDY),
    ("entertainment", names::ENTERTAINMENT),
    ("games", names::ENTERTAINMENT),
    ("music", names::ENTERTAINMENT),
    ("video", names::ENTERTAINMENT),
    ("social_networking", names::SOCIAL),
    ("health_fitness", names::HEALTH),
    ("books", names::READING),
    ("news", names::READING),
];

const ASSOCIATION_CONFIDENCE: Confidence = Confidence::MAX;
const APP_TABLE_CONFIDENCE: Confidence = Confidence::clamped(0.9);
const CATEGORY_CONFIDENCE: Confidence = Confidence::clamped(0.7);
const WORK_HOURS_CONFIDENCE: Confidence = Confidence::clamped(0.6);
const EVENING_CONFIDENCE: Confidence = Confidence::clamped(0.5);
const WEEKEND_CONFIDENCE: Confidence = Confidence::clamped(0.4);
const LONG_SESSIONS_CONFIDENCE: Confidence = Confidence::clamped(0.5);

const LONG_SESSION: Duration = Duration::minutes(45);

/// Which cascade level produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Association,
    AppTable,
    CategoryTable,
    WorkHours,
    EveningHours,
    Weekend,
    LongSessions,
}

/// A suggested tag for an app.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub tag_id: TagId,
    pub tag_name: String,
    pub confidence: Confidence,
    pub source: RecommendationSource,
}

/// Usage heuristics over an app's recent sessions.
///
/// Rules are checked in order and only the first satisfied one is returned.
/// "Majority" means strictly more than half of the sessions.
pub fn usage_pattern(
    sessions: &[AppSession],
    calendar: &Calendar,
) -> Option<(&'static str, Confidence, RecommendationSource)> {
    let completed: Vec<(&AppSession, i64)> = sessions
        .iter()
        .filter_map(|s| s.completed_duration().map(|d| (s, d)))
        .collect();
    if completed.is_empty() {
        return None;
    }
    let total = completed.len();
    let majority = |count: usize| count * 2 > total;
    let count_where = |pred: &dyn Fn(&AppSession, i64) -> bool| {
        completed.iter().filter(|(s, d)| pred(*s, *d)).count()
    };

    let work = count_where(&|s, _| (9..=17).contains(&calendar.hour_of(s.start_time)));
    if majority(work) {
        return Some((names::WORK, WORK_HOURS_CONFIDENCE, RecommendationSource::WorkHours));
    }

    let evening = count_where(&|s, _| (18..=22).contains(&calendar.hour_of(s.start_time)));
    if majority(evening) {
        return Some((
            names::ENTERTAINMENT,
            EVENING_CONFIDENCE,
            RecommendationSource::EveningHours,
        ));
    }

    let weekend = count_where(&|s, _| calendar.is_weekend(s.start_time));
    if majority(weekend) {
        return Some((names::ENTERTAINMENT, WEEKEND_CONFIDENCE, RecommendationSource::Weekend));
    }

    let long_secs = LONG_SESSION.num_seconds();
    let long = count_where(&|_, d| d >= long_secs);
    let total_secs: i64 = completed.iter().map(|(_, d)| d).sum();
    #[allow(clippy::cast_possible_wrap)]
    let average_secs = total_secs / total as i64;
    if majority(long) && average_secs >= long_secs {
        return Some((
            names::STUDY,
            LONG_SESSIONS_CONFIDENCE,
            RecommendationSource::LongSessions,
        ));
    }

    None
}

fn table_lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, name)| *name)
}

/// Resolves a tag by name, falling back to the seeded id when a default
/// tag has been renamed.
fn resolve<'t>(tags: &'t [SceneTag], name: &str) -> Option<&'t SceneTag> {
    tags.iter().find(|t| t.name == name).or_else(|| {
        let (id, _, _) = DEFAULT_TAGS.iter().find(|(_, n, _)| *n == name)?;
        tags.iter().find(|t| t.id.as_str() == *id)
    })
}

fn recommendation(
    tag: &SceneTag,
    confidence: Confidence,
    source: RecommendationSource,
) -> Recommendation {
    Recommendation {
        tag_id: tag.id.clone(),
        tag_name: tag.name.clone(),
        confidence,
        source,
    }
}

/// Classifies apps into scene tags and records applied tags.
pub struct TagRecommender<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> TagRecommender<'a, S> {
    /// Creates a recommender over `store`.
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Returns the highest-priority recommendation for an app.
    pub fn recommend(
        &self,
        app_id: &AppId,
        category_id: Option<&str>,
    ) -> Result<Option<Recommendation>, StoreError> {
        let tags = self.store.list_tags()?;

        // Several associations: prefer the most used, then the name.
        let mut associated: Vec<&SceneTag> = self.associated(app_id, &tags)?;
        associated.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        if let Some(tag) = associated.first() {
            return Ok(Some(recommendation(
                tag,
                ASSOCIATION_CONFIDENCE,
                RecommendationSource::Association,
            )));
        }

        if let Some(tag) = table_lookup(APP_TABLE, app_id.as_str()).and_then(|n| resolve(&tags, n)) {
            return Ok(Some(recommendation(
                tag,
                APP_TABLE_CONFIDENCE,
                RecommendationSource::AppTable,
            )));
        }

        if let Some(tag) = category_id
            .and_then(|c| table_lookup(CATEGORY_TABLE, c))
            .and_then(|n| resolve(&tags, n))
        {
            return Ok(Some(recommendation(
                tag,
                CATEGORY_CONFIDENCE,
                RecommendationSource::CategoryTable,
            )));
        }

        self.pattern(app_id, &tags)
    }

    /// Returns up to `k` recommendations from every level, best first.
    ///
    /// Each tag appears once, with its highest confidence. Ties are broken
    /// by tag name.
    pub fn recommend_top(
        &self,
        app_id: &AppId,
        category_id: Option<&str>,
        k: usize,
    ) -> Result<Vec<Recommendation>, StoreError> {
        let tags = self.store.list_tags()?;
        let mut matches: Vec<Recommendation> = self
            .associated(app_id, &tags)?
            .into_iter()
            .map(|t| recommendation(t, ASSOCIATION_CONFIDENCE, RecommendationSource::Association))
            .collect();
        if let Some(tag) = table_lookup(APP_TABLE, app_id.as_str()).and_then(|n| resolve(&tags, n)) {
            matches.push(recommendation(tag, APP_TABLE_CONFIDENCE, RecommendationSource::AppTable));
        }
        if let Some(tag) = category_id
            .and_then(|c| table_lookup(CATEGORY_TABLE, c))
            .and_then(|n| resolve(&tags, n))
        {
            matches.push(recommendation(
                tag,
                CATEGORY_CONFIDENCE,
                RecommendationSource::CategoryTable,
            ));
        }
        matches.extend(self.pattern(app_id, &tags)?);

        let mut best: HashMap<TagId, Recommendation> = HashMap::new();
        for rec in matches {
            match best.get(&rec.tag_id) {
                Some(existing) if existing.confidence >= rec.confidence => {}
                _ => {
                    best.insert(rec.tag_id.clone(), rec);
                }
            }
        }
        let mut ranked: Vec<Recommendation> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .value()
                .total_cmp(&a.confidence.value())
                .then_with(|| a.tag_name.cmp(&b.tag_name))
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Tags a session and counts the use.
    ///
    /// Only a `confirmed` application records the `(tag, app)` association,
    /// which is what later recommendations learn from.
    pub fn apply(
        &self,
        session_id: &SessionId,
        tag_id: &TagId,
        confirmed: bool,
    ) -> Result<AppSession, TagError> {
        let mut session =
            self.store
                .get_app_session(session_id)?
                .ok_or_else(|| StoreError::NotFound {
                    kind: "session",
                    id: session_id.to_string(),
                })?;
        if self.store.get_tag(tag_id)?.is_none() {
            return Err(StoreError::NotFound {
                kind: "tag",
                id: tag_id.to_string(),
            }
            .into());
        }

        self.store.set_session_tag(session_id, Some(tag_id))?;
        self.store.increment_tag_usage(tag_id)?;
        if confirmed {
            self.store.add_association(tag_id, &session.app_id)?;
        }
        tracing::debug!(
            session = %session_id,
            tag = %tag_id,
            app_id = %session.app_id,
            confirmed,
            "tag applied"
        );

        session.scene_tag_id = Some(tag_id.clone());
        Ok(session)
    }

    fn associated<'t>(
        &self,
        app_id: &AppId,
        tags: &'t [SceneTag],
    ) -> Result<Vec<&'t SceneTag>, StoreError> {
        let ids = self.store.tags_for_app(app_id)?;
        Ok(tags.iter().filter(|t| ids.contains(&t.id)).collect())
    }

    fn pattern(
        &self,
        app_id: &AppId,
        tags: &[SceneTag],
    ) -> Result<Option<Recommendation>, StoreError> {
        let calendar = self.store.load_settings()?.calendar();
        let recent = self.store.recent_app_sessions(app_id, PATTERN_WINDOW)?;
        Ok(usage_pattern(&recent, &calendar).and_then(|(name, confidence, source)| {
            resolve(tags, name).map(|tag| recommendation(tag, confidence, source))
        }))
    }
}
