//! In-process stand-in for the backend and its object store.
//!
//! Keeps users, tokens, photos and uploaded objects in memory, follows the
//! same status codes as the real service and lets callers inject failures
//! for a given upload step and filename.

use crate::types::{
    AuthResponse, InitiateUploadRequest, LoginRequest, Photo, PhotoPage, PhotoQuery, PhotoStatus,
    RegisterRequest, UploadTicket,
};
use crate::{ApiError, PhotoApi};
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upload steps a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Initiate,
    Transfer,
    Complete,
}

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    password: String,
    full_name: String,
}

#[derive(Debug, Clone)]
struct Job {
    photo_id: String,
    object_url: String,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    photos: Vec<Photo>,
    jobs: HashMap<String, Job>,
    objects: HashMap<String, (String, Bytes)>,
    failures: HashMap<(Step, String), ApiError>,
    calls: Vec<&'static str>,
    seq: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{}-{:04}", prefix, self.seq)
    }

    fn user_for(&self, token: Option<&str>) -> Result<String, ApiError> {
        token
            .and_then(|t| self.tokens.get(t))
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("authentication required".into()))
    }

    fn owned_photo(&mut self, user_id: &str, photo_id: &str) -> Result<&mut Photo, ApiError> {
        let photo = self
            .photos
            .iter_mut()
            .find(|p| p.id == photo_id)
            .ok_or_else(|| ApiError::NotFound(format!("Photo not found: {}", photo_id)))?;
        if photo.user_id != user_id {
            return Err(ApiError::Forbidden("photo belongs to another user".into()));
        }
        Ok(photo)
    }

    fn injected(&self, step: Step, filename: &str) -> Option<ApiError> {
        self.failures.get(&(step, filename.to_string())).cloned()
    }

    fn issue_session(&mut self, email: &str) -> AuthResponse {
        let token = self.next_id("token");
        let account = self.accounts[email].clone();
        self.tokens.insert(token.clone(), account.user_id.clone());
        AuthResponse {
            token,
            token_type: "Bearer".into(),
            user_id: account.user_id,
            email: email.to_string(),
            full_name: account.full_name,
            expires_in: Some(86_400_000),
        }
    }
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    transfer_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    /// Makes `step` fail with `error` for uploads of `filename`.
    pub fn fail_step(&self, step: Step, filename: &str, error: ApiError) {
        self.state()
            .failures
            .insert((step, filename.to_string()), error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Holds every storage PUT open for `delay`, so concurrency can be observed.
    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Highest number of simultaneous storage PUTs seen so far.
    pub fn max_concurrent_transfers(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Invalidates every issued token, as an expiry on the server would.
    pub fn revoke_tokens(&self) {
        self.state().tokens.clear();
    }

    /// Number of calls made to the named operation (e.g. `"add_tag"`).
    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.len()
    }

    /// Stored object bytes for a photo, if its transfer reached storage.
    pub fn object_for(&self, photo_id: &str) -> Option<Bytes> {
        let state = self.state();
        let job = state.jobs.values().find(|j| j.photo_id == photo_id)?;
        state.objects.get(&job.object_url).map(|(_, b)| b.clone())
    }

    /// Seeds a photo owned by the account registered under `email`.
    pub fn seed_photo(&self, email: &str, filename: &str, tags: &[&str]) -> Option<Photo> {
        let mut state = self.state();
        let user_id = state.accounts.get(email)?.user_id.clone();
        let id = state.next_id("photo");
        let now = Utc::now();
        let photo = Photo {
            id,
            filename: filename.to_string(),
            file_size: 1024,
            user_id,
            status: PhotoStatus::Complete,
            content_type: "image/jpeg".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: Some(now),
            updated_at: Some(now),
            thumbnail_url: None,
            download_url: None,
        };
        state.photos.push(photo.clone());
        Some(photo)
    }

    pub fn set_photo_status(&self, photo_id: &str, status: PhotoStatus) {
        let mut state = self.state();
        if let Some(photo) = state.photos.iter_mut().find(|p| p.id == photo_id) {
            photo.status = status;
            photo.updated_at = Some(Utc::now());
        }
    }

    fn with_urls(photo: &Photo) -> Photo {
        let mut photo = photo.clone();
        if photo.status == PhotoStatus::Complete {
            photo.thumbnail_url = Some(format!(
                "memory://bucket/thumbnails/{}?X-Amz-Expires=3600",
                photo.id
            ));
            photo.download_url = Some(format!(
                "memory://bucket/originals/{}?X-Amz-Expires=3600",
                photo.id
            ));
        }
        photo
    }
}

#[async_trait::async_trait]
impl PhotoApi for InMemoryBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let mut state = self.record("register");
        if !request.email.contains('@') {
            return Err(ApiError::Validation("Email should be valid".into()));
        }
        if request.password.len() < 6 {
            return Err(ApiError::Validation(
                "Password must be at least 6 characters".into(),
            ));
        }
        if state.accounts.contains_key(&request.email) {
            return Err(ApiError::Conflict("Email already registered".into()));
        }
        let user_id = state.next_id("user");
        state.accounts.insert(
            request.email.clone(),
            Account {
                user_id,
                password: request.password.clone(),
                full_name: request.full_name.clone(),
            },
        );
        Ok(state.issue_session(&request.email))
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        let mut state = self.record("login");
        let valid = state
            .accounts
            .get(&request.email)
            .map(|a| a.password == request.password)
            .unwrap_or(false);
        if !valid {
            return Err(ApiError::Unauthorized("Invalid email or password".into()));
        }
        Ok(state.issue_session(&request.email))
    }

    async fn list_photos(
        &self,
        token: Option<&str>,
        query: &PhotoQuery,
    ) -> Result<PhotoPage, ApiError> {
        let state = self.record("list_photos");
        let user_id = state.user_for(token)?;
        let matching: Vec<&Photo> = state
            .photos
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| match &query.tag {
                Some(tag) => p.tags.iter().any(|t| t == tag),
                None => true,
            })
            .collect();
        let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let page = query.page.unwrap_or(0);
        let total_elements = matching.len() as u64;
        let total_pages = ((total_elements + size as u64 - 1) / size as u64) as u32;
        let content: Vec<Photo> = matching
            .into_iter()
            .skip(page as usize * size as usize)
            .take(size as usize)
            .map(Self::with_urls)
            .collect();
        Ok(PhotoPage {
            content,
            page,
            size,
            total_elements,
            total_pages,
            last: Some(page + 1 >= total_pages),
        })
    }

    async fn get_photo(&self, token: Option<&str>, photo_id: &str) -> Result<Photo, ApiError> {
        let mut state = self.record("get_photo");
        let user_id = state.user_for(token)?;
        let photo = state.owned_photo(&user_id, photo_id)?;
        Ok(Self::with_urls(photo))
    }

    async fn initiate_upload(
        &self,
        token: Option<&str>,
        request: &InitiateUploadRequest,
    ) -> Result<UploadTicket, ApiError> {
        let mut state = self.record("initiate_upload");
        let user_id = state.user_for(token)?;
        if let Some(err) = state.injected(Step::Initiate, &request.filename) {
            return Err(err);
        }
        if request.filename.trim().is_empty() {
            return Err(ApiError::Validation("filename is required".into()));
        }
        if request.file_size == 0 {
            return Err(ApiError::Validation("fileSize must be positive".into()));
        }
        let photo_id = state.next_id("photo");
        let upload_job_id = state.next_id("job");
        let object_url = format!(
            "memory://bucket/{}/{}/{}?X-Amz-Expires=900",
            user_id, photo_id, request.filename
        );
        let now = Utc::now();
        state.photos.push(Photo {
            id: photo_id.clone(),
            filename: request.filename.clone(),
            file_size: request.file_size,
            user_id,
            status: PhotoStatus::Uploading,
            content_type: request.content_type.clone(),
            tags: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
            thumbnail_url: None,
            download_url: None,
        });
        state.jobs.insert(
            upload_job_id.clone(),
            Job {
                photo_id: photo_id.clone(),
                object_url: object_url.clone(),
            },
        );
        Ok(UploadTicket {
            presigned_url: object_url,
            photo_id,
            upload_job_id,
        })
    }

    async fn put_object(
        &self,
        presigned_url: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), ApiError> {
        let injected = {
            let state = self.record("put_object");
            let filename = presigned_url
                .split('?')
                .next()
                .and_then(|p| p.rsplit('/').next())
                .unwrap_or_default();
            state.injected(Step::Transfer, filename)
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.transfer_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = injected {
            return Err(err);
        }
        let mut state = self.state();
        if !state.jobs.values().any(|j| j.object_url == presigned_url) {
            return Err(ApiError::Forbidden(
                "SignatureDoesNotMatch: unknown presigned URL".into(),
            ));
        }
        state
            .objects
            .insert(presigned_url.to_string(), (content_type.to_string(), body));
        Ok(())
    }

    async fn complete_upload(
        &self,
        token: Option<&str>,
        upload_job_id: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.record("complete_upload");
        state.user_for(token)?;
        let job = state
            .jobs
            .get(upload_job_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Upload job not found: {}", upload_job_id)))?;
        let filename = state
            .photos
            .iter()
            .find(|p| p.id == job.photo_id)
            .map(|p| p.filename.clone())
            .unwrap_or_default();
        if let Some(err) = state.injected(Step::Complete, &filename) {
            return Err(err);
        }
        let stored = state.objects.contains_key(&job.object_url);
        if let Some(photo) = state.photos.iter_mut().find(|p| p.id == job.photo_id) {
            photo.status = if stored {
                PhotoStatus::Complete
            } else {
                PhotoStatus::Failed
            };
            photo.updated_at = Some(Utc::now());
        }
        if !stored {
            return Err(ApiError::Validation("object was not uploaded".into()));
        }
        Ok(())
    }

    async fn add_tag(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tag: &str,
    ) -> Result<Option<Photo>, ApiError> {
        let mut state = self.record("add_tag");
        let user_id = state.user_for(token)?;
        let photo = state.owned_photo(&user_id, photo_id)?;
        if !photo.tags.iter().any(|t| t == tag) {
            photo.tags.push(tag.to_string());
        }
        photo.updated_at = Some(Utc::now());
        Ok(Some(Self::with_urls(photo)))
    }

    async fn remove_tag(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tag: &str,
    ) -> Result<Option<Photo>, ApiError> {
        let mut state = self.record("remove_tag");
        let user_id = state.user_for(token)?;
        let photo = state.owned_photo(&user_id, photo_id)?;
        photo.tags.retain(|t| t != tag);
        photo.updated_at = Some(Utc::now());
        Ok(Some(Self::with_urls(photo)))
    }

    async fn update_tags(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tags: &[String],
    ) -> Result<Option<Photo>, ApiError> {
        let mut state = self.record("update_tags");
        let user_id = state.user_for(token)?;
        let photo = state.owned_photo(&user_id, photo_id)?;
        photo.tags.clear();
        for tag in tags {
            if !photo.tags.contains(tag) {
                photo.tags.push(tag.clone());
            }
        }
        photo.updated_at = Some(Utc::now());
        Ok(Some(Self::with_urls(photo)))
    }
}
