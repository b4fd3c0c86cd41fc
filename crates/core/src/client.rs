//! Wires the backend, the session store and the three feature areas
//! (uploads, gallery, tags) together from one `AppConfig`.

use crate::config::AppConfig;
use crate::gallery::Gallery;
use crate::session::{SessionHolder, SessionStore, SqliteSessionStore};
use crate::tags::TagEditor;
use crate::upload::Uploader;
use anyhow::Context;
use photo_api::http::{HttpBackend, HttpConfig};
use photo_api::PhotoApi;
use std::sync::Arc;

pub struct PhotoClient {
    api: Arc<dyn PhotoApi>,
    pub session: Arc<SessionHolder>,
    pub uploader: Uploader,
    pub gallery: Gallery,
    pub tags: TagEditor,
}

impl PhotoClient {
    /// HTTP backend plus a SQLite-backed session, restored from disk.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let api = HttpBackend::new(HttpConfig {
            base_url: config.api.base_url.clone(),
            timeout: config.api.timeout(),
        })
        .context("build http client")?;
        let pool = storage::connect(&config.storage.path)
            .await
            .context("db connect")?;
        storage::migrate(&pool).await.context("db migrate")?;
        let client = Self::new(
            Arc::new(api),
            Arc::new(SqliteSessionStore::new(pool)),
            config,
        );
        client.session.restore().await.context("restore session")?;
        tracing::debug!("client ready for {}", config.api.base_url);
        Ok(client)
    }

    pub fn new(api: Arc<dyn PhotoApi>, store: Arc<dyn SessionStore>, config: &AppConfig) -> Self {
        let session = Arc::new(SessionHolder::new(api.clone(), store));
        Self {
            uploader: Uploader::new(api.clone(), session.clone(), config.upload.clone()),
            gallery: Gallery::new(api.clone(), session.clone(), config.gallery.clone()),
            tags: TagEditor::new(api.clone(), session.clone()),
            session,
            api,
        }
    }

    pub fn api(&self) -> &Arc<dyn PhotoApi> {
        &self.api
    }
}
