//! Wire types for the backend's JSON contract (camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoStatus {
    Uploading,
    Processing,
    Complete,
    Failed,
}

impl PhotoStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhotoStatus::Complete | PhotoStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhotoStatus::Uploading => "UPLOADING",
            PhotoStatus::Processing => "PROCESSING",
            PhotoStatus::Complete => "COMPLETE",
            PhotoStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub user_id: String,
    pub status: PhotoStatus,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Presigned, expires one hour after issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Presigned, expires one hour after issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPage {
    #[serde(default)]
    pub content: Vec<Photo>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoQuery {
    pub tag: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl PhotoQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(tag) = &self.tag {
            params.push(("tag", tag.clone()));
        }
        if let Some(size) = self.size {
            params.push(("size", size.to_string()));
        }
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    /// Milliseconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub file_size: u64,
    pub content_type: String,
}

/// Result of the initiate step with the presigned URL under one name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTicket", rename_all = "camelCase")]
pub struct UploadTicket {
    pub presigned_url: String,
    pub photo_id: String,
    pub upload_job_id: String,
}

// The backend has been seen spelling the URL key both ways.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicket {
    #[serde(default)]
    presigned_url: Option<String>,
    #[serde(default, rename = "preSignedUrl")]
    pre_signed_url: Option<String>,
    photo_id: String,
    upload_job_id: String,
}

impl TryFrom<RawTicket> for UploadTicket {
    type Error = String;

    fn try_from(raw: RawTicket) -> Result<Self, Self::Error> {
        let presigned_url = raw
            .presigned_url
            .or(raw.pre_signed_url)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| "no presigned URL received from backend".to_string())?;
        Ok(UploadTicket {
            presigned_url,
            photo_id: raw.photo_id,
            upload_job_id: raw.upload_job_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagsUpdate {
    pub tags: Vec<String>,
}
