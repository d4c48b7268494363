//! Tag management and recommendation commands.

use std::io::Write;

use anyhow::{Context, Result};
use fl_core::tag::{self, find_tag};
use fl_core::{AppId, Recommendation, RecommendationSource, SceneTag, SessionId, Store, TagRecommender};

use super::util::write_json;
use crate::TagsAction;

/// Resolves a tag by ID or exact name.
fn resolve<S: Store + ?Sized>(store: &S, key: &str) -> Result<SceneTag> {
    find_tag(store, key)?.with_context(|| format!("Unknown tag: {key}"))
}

const fn source_label(source: RecommendationSource) -> &'static str {
    match source {
        RecommendationSource::Association => "confirmed before",
        RecommendationSource::AppTable => "known app",
        RecommendationSource::CategoryTable => "app category",
        RecommendationSource::WorkHours => "used in work hours",
        RecommendationSource::EveningHours => "used in the evening",
        RecommendationSource::Weekend => "used on weekends",
        RecommendationSource::LongSessions => "long sessions",
    }
}

fn write_recommendation<W: Write>(writer: &mut W, rec: &Recommendation) -> Result<()> {
    writeln!(
        writer,
        "{:<16}{}  ({})",
        rec.tag_name,
        rec.confidence,
        source_label(rec.source)
    )?;
    Ok(())
}

pub fn run<W: Write, S: Store + ?Sized>(writer: &mut W, store: &S, action: &TagsAction) -> Result<()> {
    match action {
        TagsAction::List { json } => list(writer, store, *json),
        TagsAction::Create { name, color } => {
            let tag = tag::create_tag(store, name, color)?;
            writeln!(writer, "Created tag {} ({})", tag.name, tag.id)?;
            Ok(())
        }
        TagsAction::Rename { tag: key, name } => {
            let existing = resolve(store, key)?;
            tag::rename_tag(store, &existing.id, name)?;
            writeln!(writer, "Renamed {} to {}", existing.name, name.trim())?;
            Ok(())
        }
        TagsAction::Delete { tag: key } => {
            let existing = resolve(store, key)?;
            tag::delete_tag(store, &existing.id)?;
            writeln!(writer, "Deleted tag {}", existing.name)?;
            Ok(())
        }
        TagsAction::Recommend {
            app_id,
            category,
            top,
            json,
        } => {
            let app_id = AppId::new(app_id.as_str())?;
            let recommender = TagRecommender::new(store);
            let recommendations = match top {
                Some(k) => recommender.recommend_top(&app_id, category.as_deref(), *k)?,
                None => recommender
                    .recommend(&app_id, category.as_deref())?
                    .into_iter()
                    .collect(),
            };
            if *json {
                return write_json(writer, &recommendations);
            }
            if recommendations.is_empty() {
                writeln!(writer, "No recommendation for {app_id}.")?;
            }
            for rec in &recommendations {
                write_recommendation(writer, rec)?;
            }
            Ok(())
        }
        TagsAction::Apply {
            session_id,
            tag: key,
            confirm,
        } => {
            let session_id = SessionId::new(session_id.as_str())?;
            let tag = resolve(store, key)?;
            let session = TagRecommender::new(store).apply(&session_id, &tag.id, *confirm)?;
            writeln!(writer, "Tagged {} session as {}", session.app_name, tag.name)?;
            if *confirm {
                writeln!(writer, "{} will be tagged {} from now on.", session.app_id, tag.name)?;
            }
            Ok(())
        }
    }
}

fn list<W: Write, S: Store + ?Sized>(writer: &mut W, store: &S, json: bool) -> Result<()> {
    let listings = tag::list_tags(store)?;
    if json {
        return write_json(writer, &listings);
    }
    writeln!(writer, "{:<24}{:<16}{:<9}{:>5}  APPS", "ID", "NAME", "COLOR", "USES")?;
    for listing in &listings {
        let apps: Vec<&str> = listing.apps.iter().map(AppId::as_str).collect();
        let line = format!(
            "{:<24}{:<16}{:<9}{:>5}  {}",
            listing.tag.id,
            listing.tag.name,
            listing.tag.color,
            listing.tag.usage_count,
            apps.join(", ")
        );
        writeln!(writer, "{}", line.trim_end())?;
    }
    Ok(())
}
