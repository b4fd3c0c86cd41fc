//! Client abstractions for the photo backend and its object storage.
//!
//! `PhotoApi` is the seam every caller goes through; `http::HttpBackend`
//! speaks to a real deployment and `memory::InMemoryBackend` simulates one.

use bytes::Bytes;
use thiserror::Error;

pub mod http;
pub mod memory;
pub mod types;

pub use types::{
    AuthResponse, InitiateUploadRequest, LoginRequest, Photo, PhotoPage, PhotoQuery, PhotoStatus,
    RegisterRequest, TagsUpdate, UploadTicket,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication rejected: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ApiError {
    /// Maps a non-success HTTP status and its body onto the error taxonomy.
    ///
    /// JSON bodies of the form `{"message": ..}` or `{"error": ..}` are
    /// reduced to that string; anything else is kept as the raw text.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body).unwrap_or_else(|| default_message(status).to_string());
        match status {
            400 | 422 => ApiError::Validation(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Status { status, message },
        }
    }

    /// True for 401-class rejections, which end the local session.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// Transport and server failures may succeed when the user retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Server { .. })
    }
}

fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error", "detail"] {
            if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    return Some(text.to_string());
                }
            }
        }
    }
    Some(trimmed.to_string())
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 | 422 => "request rejected",
        401 => "authentication required",
        403 => "access denied",
        404 => "resource not found",
        409 => "resource already exists",
        500..=599 => "backend unavailable",
        _ => "unexpected status",
    }
}

/// Operations offered by the photo backend.
///
/// Authenticated calls take the bearer token explicitly; `None` sends the
/// request without an `Authorization` header. Tag endpoints return the
/// updated photo when the backend echoes one.
#[async_trait::async_trait]
pub trait PhotoApi: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError>;

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError>;

    async fn list_photos(
        &self,
        token: Option<&str>,
        query: &PhotoQuery,
    ) -> Result<PhotoPage, ApiError>;

    async fn get_photo(&self, token: Option<&str>, photo_id: &str) -> Result<Photo, ApiError>;

    async fn initiate_upload(
        &self,
        token: Option<&str>,
        request: &InitiateUploadRequest,
    ) -> Result<UploadTicket, ApiError>;

    /// Direct PUT to a presigned storage URL. Never carries the bearer token.
    async fn put_object(
        &self,
        presigned_url: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), ApiError>;

    async fn complete_upload(&self, token: Option<&str>, upload_job_id: &str)
        -> Result<(), ApiError>;

    async fn add_tag(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tag: &str,
    ) -> Result<Option<Photo>, ApiError>;

    async fn remove_tag(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tag: &str,
    ) -> Result<Option<Photo>, ApiError>;

    async fn update_tags(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tags: &[String],
    ) -> Result<Option<Photo>, ApiError>;
}
