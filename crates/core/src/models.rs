use serde::{Deserialize, Serialize};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        }
    }
}

/// Client-side view of one file in an upload batch. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub id: TaskId,
    pub filename: String,
    pub content_type: String,
    pub declared_size: Option<u64>,
    pub progress: u8,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// Set when the last failure was a transport or server error.
    #[serde(default)]
    pub transient: bool,
    pub photo_id: Option<String>,
    pub upload_job_id: Option<String>,
}

impl UploadTask {
    /// Raises progress; a lower checkpoint never moves it backwards.
    pub fn advance(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub complete: usize,
    pub error: usize,
}

impl UploadStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a UploadTask>) -> Self {
        let mut stats = UploadStats::default();
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Uploading => stats.uploading += 1,
                TaskStatus::Complete => stats.complete += 1,
                TaskStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}
