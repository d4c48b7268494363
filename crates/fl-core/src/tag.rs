//! Scene tags and their app associations.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, TagError};
use crate::store::Store;
use crate::types::{AppId, TagId, ValidationError};

/// A user-facing activity category (Work, Study, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTag {
    pub id: TagId,
    /// Unique, case-sensitive display name.
    pub name: String,
    /// `#RRGGBB` color.
    pub color: String,
    /// Seeded tags cannot be deleted.
    pub is_default: bool,
    /// Number of times the tag has been applied. Never decreases.
    #[serde(default)]
    pub usage_count: u64,
}

impl SceneTag {
    /// Creates a custom (non-default) tag after validating name and color.
    pub fn custom(name: &str, color: &str) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty { field: "tag name" });
        }
        validate_color(color)?;
        Ok(Self {
            id: TagId::generate(),
            name: name.to_string(),
            color: color.to_string(),
            is_default: false,
            usage_count: 0,
        })
    }
}

/// One row of the tag ↔ app many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagAssociation {
    pub tag_id: TagId,
    pub app_id: AppId,
}

/// Names of the tags the recommendation tables refer to.
pub mod names {
    pub const WORK: &str = "Work";
    pub const STUDY: &str = "Study";
    pub const ENTERTAINMENT: &str = "Entertainment";
    pub const SOCIAL: &str = "Social";
    pub const HEALTH: &str = "Health";
    pub const READING: &str = "Reading";
}

/// Seeded default tags as `(stable id, name, color)`.
pub const DEFAULT_TAGS: &[(&str, &str, &str)] = &[
    ("default-work", names::WORK, "#4A90D9"),
    ("default-study", names::STUDY, "#7B61FF"),
    ("default-entertainment", names::ENTERTAINMENT, "#F5A623"),
    ("default-social", names::SOCIAL, "#E94E77"),
    ("default-health", names::HEALTH, "#50C878"),
    ("default-reading", names::READING, "#8B5E3C"),
];

/// Builds the seeded default tags.
pub fn default_tags() -> Vec<SceneTag> {
    DEFAULT_TAGS
        .iter()
        .filter_map(|(id, name, color)| {
            TagId::new(*id).ok().map(|id| SceneTag {
                id,
                name: (*name).to_string(),
                color: (*color).to_string(),
                is_default: true,
                usage_count: 0,
            })
        })
        .collect()
}

/// Checks a `#RRGGBB` color string.
pub fn validate_color(color: &str) -> Result<(), ValidationError> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidColor {
            value: color.to_string(),
        })
    }
}

/// A tag together with the apps explicitly associated with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagListing {
    #[serde(flatten)]
    pub tag: SceneTag,
    pub apps: Vec<AppId>,
}

/// Creates a custom tag with a unique name.
pub fn create_tag<S: Store + ?Sized>(
    store: &S,
    name: &str,
    color: &str,
) -> Result<SceneTag, TagError> {
    let tag = SceneTag::custom(name, color)?;
    if store.list_tags()?.iter().any(|t| t.name == tag.name) {
        return Err(TagError::DuplicateName(tag.name));
    }
    store.insert_tag(&tag).map_err(|err| conflict_as_duplicate(err, &tag.name))?;
    tracing::info!(id = %tag.id, name = %tag.name, "tag created");
    Ok(tag)
}

/// Renames a tag, keeping names unique.
pub fn rename_tag<S: Store + ?Sized>(store: &S, id: &TagId, name: &str) -> Result<(), TagError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Empty { field: "tag name" }.into());
    }
    store
        .rename_tag(id, name)
        .map_err(|err| conflict_as_duplicate(err, name))?;
    tracing::info!(%id, name, "tag renamed");
    Ok(())
}

/// Deletes a custom tag. Default tags are protected.
pub fn delete_tag<S: Store + ?Sized>(store: &S, id: &TagId) -> Result<(), TagError> {
    let tag = store.get_tag(id)?.ok_or_else(|| StoreError::NotFound {
        kind: "tag",
        id: id.to_string(),
    })?;
    if tag.is_default {
        return Err(TagError::DefaultTagProtected(tag.name));
    }
    store.delete_tag(id)?;
    tracing::info!(%id, name = %tag.name, "tag deleted");
    Ok(())
}

/// Lists every tag with its associated apps.
pub fn list_tags<S: Store + ?Sized>(store: &S) -> Result<Vec<TagListing>, StoreError> {
    let associations = store.associations()?;
    Ok(store
        .list_tags()?
        .into_iter()
        .map(|tag| {
            let apps = associations
                .iter()
                .filter(|a| a.tag_id == tag.id)
                .map(|a| a.app_id.clone())
                .collect();
            TagListing { tag, apps }
        })
        .collect())
}

/// Finds a tag by id or exact name.
pub fn find_tag<S: Store + ?Sized>(store: &S, key: &str) -> Result<Option<SceneTag>, StoreError> {
    Ok(store
        .list_tags()?
        .into_iter()
        .find(|t| t.id.as_str() == key || t.name == key))
}

fn conflict_as_duplicate(err: StoreError, name: &str) -> TagError {
    match err {
        StoreError::Conflict(_) => TagError::DuplicateName(name.to_string()),
        other => TagError::Store(other),
    }
}
