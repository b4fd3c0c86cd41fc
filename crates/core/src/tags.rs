use crate::session::SessionHolder;
use photo_api::{ApiError, Photo, PhotoApi};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const MAX_TAGS: usize = 10;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Tag cannot be empty")]
    Empty,
    #[error("Tag already exists")]
    Duplicate,
    #[error("Maximum {} tags allowed", MAX_TAGS)]
    LimitReached,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Trims and lowercases a tag. Returns `None` for blank input.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().to_lowercase();
    (!tag.is_empty()).then_some(tag)
}

/// Checks a tag against the photo's current list before any request is sent.
pub fn validate_new_tag(existing: &[String], raw: &str) -> Result<String, TagError> {
    let tag = normalize_tag(raw).ok_or(TagError::Empty)?;
    if existing.iter().any(|t| t.to_lowercase() == tag) {
        return Err(TagError::Duplicate);
    }
    if existing.len() >= MAX_TAGS {
        return Err(TagError::LimitReached);
    }
    Ok(tag)
}

/// Drops repeated tags, keeping first occurrence order.
pub fn dedup_tags(tags: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    tags.retain(|t| seen.insert(t.clone()));
}

pub struct TagEditor {
    api: Arc<dyn PhotoApi>,
    session: Arc<SessionHolder>,
}

impl TagEditor {
    pub fn new(api: Arc<dyn PhotoApi>, session: Arc<SessionHolder>) -> Self {
        Self { api, session }
    }

    /// Adds a tag and updates `photo` in place from the backend response,
    /// or locally when the backend returns no body.
    pub async fn add_tag(&self, photo: &mut Photo, raw: &str) -> Result<(), TagError> {
        let tag = validate_new_tag(&photo.tags, raw)?;
        let token = self.session.token();
        let updated = self
            .session
            .guard(self.api.add_tag(token.as_deref(), &photo.id, &tag).await)
            .await?;
        match updated {
            Some(updated) => *photo = updated,
            None => photo.tags.push(tag.clone()),
        }
        dedup_tags(&mut photo.tags);
        info!(photo = %photo.id, %tag, "tag added");
        Ok(())
    }

    pub async fn remove_tag(&self, photo: &mut Photo, raw: &str) -> Result<(), TagError> {
        let tag = normalize_tag(raw).ok_or(TagError::Empty)?;
        let token = self.session.token();
        let updated = self
            .session
            .guard(self.api.remove_tag(token.as_deref(), &photo.id, &tag).await)
            .await?;
        match updated {
            Some(updated) => *photo = updated,
            None => photo.tags.retain(|t| t.to_lowercase() != tag),
        }
        dedup_tags(&mut photo.tags);
        info!(photo = %photo.id, %tag, "tag removed");
        Ok(())
    }

    /// Replaces the whole tag list. Blank entries are dropped and repeats
    /// collapsed before the limit is checked.
    pub async fn set_tags(&self, photo: &mut Photo, raw: &[String]) -> Result<(), TagError> {
        let mut tags: Vec<String> = raw.iter().filter_map(|t| normalize_tag(t)).collect();
        dedup_tags(&mut tags);
        if tags.len() > MAX_TAGS {
            return Err(TagError::LimitReached);
        }
        debug!(photo = %photo.id, "replacing tags with {:?}", tags);
        let token = self.session.token();
        let updated = self
            .session
            .guard(self.api.update_tags(token.as_deref(), &photo.id, &tags).await)
            .await?;
        match updated {
            Some(updated) => *photo = updated,
            None => photo.tags = tags,
        }
        dedup_tags(&mut photo.tags);
        Ok(())
    }
}
