//! Command handlers. Each one works against a `PhotoClient` and returns an
//! `Output` for `render` to print.

use anyhow::{bail, Context, Result};
use photo_api::Photo;
use serde::Serialize;
use std::path::PathBuf;
use uploader_core::gallery::GalleryPage;
use uploader_core::models::{UploadStats, UploadTask};
use uploader_core::selection::expand_paths;
use uploader_core::session::UserProfile;
use uploader_core::upload::UploadFile;
use uploader_core::PhotoClient;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub tasks: Vec<UploadTask>,
    pub stats: UploadStats,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Output {
    Signed(UserProfile),
    Message(String),
    Upload(UploadReport),
    Gallery(GalleryPage),
    Tags(Vec<String>),
    Photo(Photo),
}

fn require_session(client: &PhotoClient) -> Result<()> {
    if !client.session.is_authenticated() {
        bail!("not signed in; run `photoup login` first");
    }
    Ok(())
}

pub async fn register(
    client: &PhotoClient,
    email: &str,
    password: &str,
    full_name: &str,
) -> Result<Output> {
    let session = client
        .session
        .register(email, password, full_name)
        .await
        .context("registration failed")?;
    Ok(Output::Signed(session.user))
}

pub async fn login(client: &PhotoClient, email: &str, password: &str) -> Result<Output> {
    let session = client
        .session
        .login(email, password)
        .await
        .context("login failed")?;
    Ok(Output::Signed(session.user))
}

pub async fn logout(client: &PhotoClient) -> Result<Output> {
    client.session.logout().await;
    Ok(Output::Message("signed out".into()))
}

pub fn whoami(client: &PhotoClient) -> Result<Output> {
    Ok(match client.session.current() {
        Some(session) => Output::Signed(session.user),
        None => Output::Message("not signed in".into()),
    })
}

/// Expands `paths`, queues every acceptable image and uploads the batch.
pub async fn upload(client: &PhotoClient, paths: &[PathBuf], globs: &[String]) -> Result<Output> {
    require_session(client)?;
    let expanded = expand_paths(paths, globs).context("expand upload paths")?;
    if expanded.is_empty() {
        bail!("no files selected");
    }

    let mut skipped = Vec::new();
    let mut files = Vec::new();
    for path in &expanded {
        match UploadFile::from_path(path) {
            Ok(file) => files.push(file),
            Err(e) => skipped.push(e.to_string()),
        }
    }
    let outcome = client.uploader.add_files(files);
    skipped.extend(outcome.rejected.iter().map(|e| e.to_string()));

    client.uploader.run_pending().await;
    let tasks: Vec<UploadTask> = client
        .uploader
        .snapshot()
        .into_iter()
        .filter(|t| outcome.added.contains(&t.id))
        .collect();
    let stats = UploadStats::from_tasks(&tasks);
    if stats.complete > 0 {
        client.gallery.invalidate_tags();
    }
    Ok(Output::Upload(UploadReport {
        tasks,
        stats,
        skipped,
    }))
}

pub async fn gallery(
    client: &PhotoClient,
    tag: Option<&str>,
    page: u32,
    size: Option<u32>,
) -> Result<Output> {
    require_session(client)?;
    let listing = client
        .gallery
        .list(tag, page, size)
        .await
        .context("failed to load photos")?;
    Ok(Output::Gallery(listing))
}

pub async fn tags_list(client: &PhotoClient) -> Result<Output> {
    require_session(client)?;
    let tags = client
        .gallery
        .available_tags()
        .await
        .context("failed to load tags")?;
    Ok(Output::Tags(tags))
}

#[derive(Debug, Clone)]
pub enum TagChange {
    Add(String),
    Remove(String),
    Set(Vec<String>),
}

/// Loads the photo, applies the change and returns the updated copy.
pub async fn edit_tags(client: &PhotoClient, photo_id: &str, change: TagChange) -> Result<Output> {
    require_session(client)?;
    let mut photo = client
        .gallery
        .photo(photo_id)
        .await
        .with_context(|| format!("failed to load photo {}", photo_id))?;
    match &change {
        TagChange::Add(tag) => client.tags.add_tag(&mut photo, tag).await,
        TagChange::Remove(tag) => client.tags.remove_tag(&mut photo, tag).await,
        TagChange::Set(tags) => client.tags.set_tags(&mut photo, tags).await,
    }
    .context("tag update failed")?;
    client.gallery.invalidate_tags();
    Ok(Output::Photo(photo))
}
