//! Gallery listing, single-photo lookup and tag aggregation.

use crate::config::GalleryConfig;
use crate::session::SessionHolder;
use crate::tags::normalize_tag;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use photo_api::{ApiError, Photo, PhotoApi, PhotoQuery};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// Lifetime of the presigned thumbnail/download URLs in a listing.
pub const URL_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPage {
    pub photos: Vec<Photo>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u32,
    pub tag: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl GalleryPage {
    /// True once the presigned URLs in this page can no longer be used.
    pub fn urls_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at >= ChronoDuration::seconds(URL_TTL_SECS)
    }
}

/// Sorted, deduplicated union of the tags on `photos`.
pub fn aggregate_tags(photos: &[Photo]) -> Vec<String> {
    photos
        .iter()
        .flat_map(|p| p.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub struct Gallery {
    api: Arc<dyn PhotoApi>,
    session: Arc<SessionHolder>,
    cfg: GalleryConfig,
    tag_cache: Mutex<Option<(Instant, Vec<String>)>>,
}

impl Gallery {
    pub fn new(api: Arc<dyn PhotoApi>, session: Arc<SessionHolder>, cfg: GalleryConfig) -> Self {
        Self {
            api,
            session,
            cfg,
            tag_cache: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.cfg
    }

    /// Lists one page, optionally filtered by tag. A blank tag means no filter.
    pub async fn list(
        &self,
        tag: Option<&str>,
        page: u32,
        size: Option<u32>,
    ) -> Result<GalleryPage, ApiError> {
        let tag = tag.and_then(normalize_tag);
        let query = PhotoQuery {
            tag: tag.clone(),
            page: Some(page),
            size: Some(size.unwrap_or(self.cfg.page_size)),
        };
        let token = self.session.token();
        let listing = self
            .session
            .guard(self.api.list_photos(token.as_deref(), &query).await)
            .await?;
        debug!(
            tag = tag.as_deref().unwrap_or("-"),
            "fetched {} of {} photo(s)",
            listing.content.len(),
            listing.total_elements
        );
        Ok(GalleryPage {
            photos: listing.content,
            page: listing.page,
            size: listing.size,
            total_elements: listing.total_elements,
            total_pages: listing.total_pages,
            tag,
            fetched_at: Utc::now(),
        })
    }

    /// Fetches one photo with freshly signed URLs.
    pub async fn photo(&self, photo_id: &str) -> Result<Photo, ApiError> {
        let token = self.session.token();
        self.session
            .guard(self.api.get_photo(token.as_deref(), photo_id).await)
            .await
    }

    /// All tags in use, reusing the last aggregation while it is younger
    /// than the staleness window.
    pub async fn available_tags(&self) -> Result<Vec<String>, ApiError> {
        if let Some(tags) = self.cached_tags() {
            return Ok(tags);
        }
        let query = PhotoQuery {
            tag: None,
            page: Some(0),
            size: Some(self.cfg.tag_scan_size),
        };
        let token = self.session.token();
        let listing = self
            .session
            .guard(self.api.list_photos(token.as_deref(), &query).await)
            .await?;
        let tags = aggregate_tags(&listing.content);
        debug!("aggregated {} tag(s)", tags.len());
        *self.tag_cache.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((Instant::now(), tags.clone()));
        Ok(tags)
    }

    /// Forces the next `available_tags` call to refetch.
    pub fn invalidate_tags(&self) {
        *self.tag_cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn cached_tags(&self) -> Option<Vec<String>> {
        let cache = self.tag_cache.lock().unwrap_or_else(|e| e.into_inner());
        match &*cache {
            Some((at, tags)) if at.elapsed() < self.cfg.staleness() => Some(tags.clone()),
            _ => None,
        }
    }
}
