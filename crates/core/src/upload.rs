//! Upload orchestration: initiate, direct PUT to storage, completion notice.
//!
//! Each selected file becomes an `UploadTask` on a shared board keyed by
//! task id. Batches are driven through a fixed-size window; a failure only
//! touches the task it happened in.

use crate::config::UploadConfig;
use crate::models::{TaskId, TaskStatus, UploadStats, UploadTask};
use crate::session::SessionHolder;
use bytes::Bytes;
use photo_api::{ApiError, InitiateUploadRequest, PhotoApi};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_INITIATED: u8 = 30;
pub const PROGRESS_TRANSFERRED: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("{filename} is not an image file ({content_type})")]
    NotAnImage {
        filename: String,
        content_type: String,
    },
    #[error("{filename} is larger than {max} bytes ({size} bytes)")]
    TooLarge { filename: String, size: u64, max: u64 },
    #[error("{filename} is empty")]
    Empty { filename: String },
    #[error("maximum {max} files allowed")]
    TooManyFiles { max: usize },
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub enum UploadSource {
    Path(PathBuf),
    Bytes(Bytes),
}

/// A file chosen for upload. `size` is `None` when the source could not
/// report it up front; it is then measured from the bytes.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: String,
    pub size: Option<u64>,
    pub source: UploadSource,
}

impl UploadFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SelectionError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|source| SelectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            filename,
            content_type: content_type_for_path(path),
            size: Some(meta.len()),
            source: UploadSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            size: None,
            source: UploadSource::Bytes(bytes.into()),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    async fn read(&self) -> std::io::Result<Bytes> {
        match &self.source {
            UploadSource::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
            UploadSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    fn check(&self, limits: &UploadConfig) -> Result<(), SelectionError> {
        if !self.content_type.starts_with("image/") {
            return Err(SelectionError::NotAnImage {
                filename: self.filename.clone(),
                content_type: self.content_type.clone(),
            });
        }
        let size = match (&self.source, self.size) {
            (_, Some(size)) => size,
            (UploadSource::Bytes(b), None) => b.len() as u64,
            (UploadSource::Path(_), None) => return Ok(()),
        };
        if size == 0 {
            return Err(SelectionError::Empty {
                filename: self.filename.clone(),
            });
        }
        if size > limits.max_file_size {
            return Err(SelectionError::TooLarge {
                filename: self.filename.clone(),
                size,
                max: limits.max_file_size,
            });
        }
        Ok(())
    }
}

/// Content type from the file extension, falling back to magic bytes.
pub fn content_type_for_path(path: &Path) -> String {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| mime_for_extension(&e.to_ascii_lowercase()));
    if let Some(mime) = by_ext {
        return mime.to_string();
    }
    match infer::get_from_path(path) {
        Ok(Some(kind)) => kind.mime_type().to_string(),
        _ => FALLBACK_CONTENT_TYPE.to_string(),
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    })
}

/// File extension (without dot) for a MIME type.
pub fn extension_for_mime(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg".to_string(),
        "image/svg+xml" => "svg".to_string(),
        "image/tiff" => "tiff".to_string(),
        other => other
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .map(|s| s.split('+').next().unwrap_or(s).to_string())
            .unwrap_or_else(|| "jpg".to_string()),
    }
}

/// Guarantees a non-empty filename with an extension, deriving the
/// extension from `content_type` when the source name has none.
pub fn ensure_extension(filename: &str, content_type: &str, index: TaskId) -> String {
    let base = Path::new(filename.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = base.trim_end_matches('.');
    let ext = extension_for_mime(content_type);
    if base.is_empty() {
        let millis = chrono::Utc::now().timestamp_millis();
        return format!("image-{}-{}.{}", millis, index, ext);
    }
    let has_ext = Path::new(base)
        .extension()
        .map(|e| !e.is_empty())
        .unwrap_or(false);
    if has_ext {
        base.to_string()
    } else {
        format!("{}.{}", base, ext)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Read,
    Initiate,
    Transfer,
    Complete,
}

#[derive(Debug)]
struct StepFailure {
    step: Step,
    message: String,
    transient: bool,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Step::Read => write!(f, "Failed to read file: {}", self.message),
            Step::Initiate => write!(f, "Failed to initiate upload: {}", self.message),
            Step::Transfer => write!(f, "Storage upload failed: {}", self.message),
            Step::Complete => write!(
                f,
                "File stored but completion notice failed: {}",
                self.message
            ),
        }
    }
}

fn fail(step: Step, message: impl fmt::Display) -> StepFailure {
    StepFailure {
        step,
        message: message.to_string(),
        transient: false,
    }
}

fn api_fail(step: Step, err: ApiError) -> StepFailure {
    StepFailure {
        step,
        transient: err.is_retryable(),
        message: err.to_string(),
    }
}

struct Entry {
    task: UploadTask,
    file: Arc<UploadFile>,
}

#[derive(Default)]
struct Board {
    next_id: TaskId,
    order: Vec<TaskId>,
    entries: HashMap<TaskId, Entry>,
    /// Tasks owned by a running batch, queued or in flight.
    claimed: HashSet<TaskId>,
}

/// Result of adding a selection to the board.
#[derive(Debug, Default)]
pub struct AddOutcome {
    pub added: Vec<TaskId>,
    pub rejected: Vec<SelectionError>,
}

#[derive(Clone)]
struct TaskDriver {
    api: Arc<dyn PhotoApi>,
    session: Arc<SessionHolder>,
    board: Arc<Mutex<Board>>,
    /// Upload slots shared by every batch on this board.
    slots: Arc<Semaphore>,
}

impl TaskDriver {
    fn board(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `f` to the task with `id`. Updates for removed tasks are dropped.
    fn update(&self, id: TaskId, f: impl FnOnce(&mut UploadTask)) -> bool {
        match self.board().entries.get_mut(&id) {
            Some(entry) => {
                f(&mut entry.task);
                true
            }
            None => false,
        }
    }

    async fn drive(self, id: TaskId) -> (TaskId, TaskStatus) {
        let outcome = match self.slots.acquire().await {
            Ok(_slot) => self.drive_claimed(id).await,
            Err(_) => (id, TaskStatus::Error),
        };
        self.board().claimed.remove(&id);
        outcome
    }

    async fn drive_claimed(&self, id: TaskId) -> (TaskId, TaskStatus) {
        let file = match self.board().entries.get(&id) {
            Some(entry) => entry.file.clone(),
            None => return (id, TaskStatus::Error),
        };
        self.update(id, |t| {
            t.status = TaskStatus::Uploading;
            t.error = None;
            t.advance(PROGRESS_STARTED);
        });

        match self.run_steps(id, &file).await {
            Ok(()) => {
                info!(task = id, filename = %file.filename, "upload complete");
                self.update(id, |t| {
                    t.status = TaskStatus::Complete;
                    t.advance(PROGRESS_DONE);
                });
                (id, TaskStatus::Complete)
            }
            Err(failure) => {
                let message = failure.to_string();
                error!(task = id, filename = %file.filename, "{}", message);
                self.update(id, |t| {
                    t.status = TaskStatus::Error;
                    t.error = Some(message);
                    t.transient = failure.transient;
                });
                (id, TaskStatus::Error)
            }
        }
    }

    async fn run_steps(&self, id: TaskId, file: &UploadFile) -> Result<(), StepFailure> {
        let mut bytes: Option<Bytes> = None;
        let declared = match file.size.filter(|s| *s > 0) {
            Some(size) => size,
            None => {
                debug!(task = id, "file size unknown, reading file to measure it");
                let data = file.read().await.map_err(|e| fail(Step::Read, e))?;
                let size = data.len() as u64;
                bytes = Some(data);
                size
            }
        };
        if declared == 0 {
            return Err(fail(Step::Read, "file is empty"));
        }

        let filename = ensure_extension(&file.filename, &file.content_type, id);
        let request = InitiateUploadRequest {
            filename: filename.clone(),
            file_size: declared,
            content_type: file.content_type.clone(),
        };
        let token = self.session.token();
        debug!(task = id, %filename, size = declared, "initiating upload");
        let ticket = self
            .session
            .guard(self.api.initiate_upload(token.as_deref(), &request).await)
            .await
            .map_err(|e| api_fail(Step::Initiate, e))?;
        self.update(id, |t| {
            t.filename = filename.clone();
            t.declared_size = Some(declared);
            t.photo_id = Some(ticket.photo_id.clone());
            t.upload_job_id = Some(ticket.upload_job_id.clone());
            t.advance(PROGRESS_INITIATED);
        });

        let data = match bytes {
            Some(data) => data,
            None => file.read().await.map_err(|e| fail(Step::Read, e))?,
        };
        if data.len() as u64 != declared {
            warn!(
                task = id,
                "size mismatch: declared {} bytes, sending {}",
                declared,
                data.len()
            );
        }
        self.api
            .put_object(&ticket.presigned_url, &file.content_type, data)
            .await
            .map_err(|e| api_fail(Step::Transfer, e))?;
        self.update(id, |t| t.advance(PROGRESS_TRANSFERRED));

        if let Err(e) = self
            .session
            .guard(
                self.api
                    .complete_upload(token.as_deref(), &ticket.upload_job_id)
                    .await,
            )
            .await
        {
            // The object is already in storage; it is left there.
            warn!(
                task = id,
                job = %ticket.upload_job_id,
                "completion notice failed after transfer: {}", e
            );
            return Err(api_fail(Step::Complete, e));
        }
        Ok(())
    }
}

pub struct Uploader {
    driver: TaskDriver,
    limits: UploadConfig,
}

impl Uploader {
    pub fn new(api: Arc<dyn PhotoApi>, session: Arc<SessionHolder>, limits: UploadConfig) -> Self {
        Self {
            driver: TaskDriver {
                api,
                session,
                board: Arc::new(Mutex::new(Board::default())),
                slots: Arc::new(Semaphore::new(limits.concurrency.max(1))),
            },
            limits,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.limits.concurrency.max(1)
    }

    /// Registers files as `pending` tasks. Files failing the selection
    /// guards, or beyond the batch cap, are reported instead of added.
    pub fn add_files(&self, files: impl IntoIterator<Item = UploadFile>) -> AddOutcome {
        let mut outcome = AddOutcome::default();
        let mut board = self.driver.board();
        for file in files {
            if let Err(e) = file.check(&self.limits) {
                warn!("skipping selection: {}", e);
                outcome.rejected.push(e);
                continue;
            }
            if board.entries.len() >= self.limits.max_files {
                outcome.rejected.push(SelectionError::TooManyFiles {
                    max: self.limits.max_files,
                });
                continue;
            }
            board.next_id += 1;
            let id = board.next_id;
            let task = UploadTask {
                id,
                filename: file.filename.clone(),
                content_type: file.content_type.clone(),
                declared_size: file.size,
                progress: 0,
                status: TaskStatus::Pending,
                error: None,
                transient: false,
                photo_id: None,
                upload_job_id: None,
            };
            board.order.push(id);
            board.entries.insert(
                id,
                Entry {
                    task,
                    file: Arc::new(file),
                },
            );
            outcome.added.push(id);
        }
        outcome
    }

    /// Drives every `pending` or `error` task through the upload window.
    /// Tasks already claimed by a batch still running are left to it.
    pub async fn run_pending(&self) -> UploadStats {
        let ids: Vec<TaskId> = {
            let mut board = self.driver.board();
            let Board {
                order,
                entries,
                claimed,
                ..
            } = &mut *board;
            let mut ids = Vec::new();
            for id in order.iter() {
                if let Some(entry) = entries.get_mut(id) {
                    if entry.task.is_retryable() && claimed.insert(*id) {
                        reset(&mut entry.task);
                        ids.push(*id);
                    }
                }
            }
            ids
        };
        if ids.is_empty() {
            return self.stats();
        }
        info!(
            "uploading {} file(s), {} at a time",
            ids.len(),
            self.concurrency()
        );
        self.drive_all(ids).await;
        let stats = self.stats();
        info!(
            "batch finished: {} complete, {} failed",
            stats.complete, stats.error
        );
        stats
    }

    /// Restarts a failed task from the initiate step.
    pub async fn retry(&self, id: TaskId) -> Option<UploadTask> {
        let retryable = {
            let mut board = self.driver.board();
            let Board {
                entries, claimed, ..
            } = &mut *board;
            match entries.get_mut(&id) {
                Some(entry) if entry.task.status == TaskStatus::Error && claimed.insert(id) => {
                    reset(&mut entry.task);
                    true
                }
                Some(_) => false,
                None => return None,
            }
        };
        if retryable {
            info!(task = id, "retrying upload");
            self.drive_all(vec![id]).await;
        }
        self.task(id)
    }

    async fn drive_all(&self, ids: Vec<TaskId>) {
        let window = self.concurrency();
        let mut join_set = JoinSet::new();
        for id in ids {
            while join_set.len() >= window {
                if let Some(res) = join_set.join_next().await {
                    log_join(res);
                }
            }
            let driver = self.driver.clone();
            join_set.spawn(driver.drive(id));
        }
        while let Some(res) = join_set.join_next().await {
            log_join(res);
        }
    }

    /// Stops tracking a task. An in-flight transfer keeps running; its
    /// results are discarded.
    pub fn remove(&self, id: TaskId) -> bool {
        let mut board = self.driver.board();
        board.order.retain(|t| *t != id);
        board.entries.remove(&id).is_some()
    }

    pub fn clear(&self) {
        let mut board = self.driver.board();
        board.order.clear();
        board.entries.clear();
    }

    pub fn task(&self, id: TaskId) -> Option<UploadTask> {
        self.driver.board().entries.get(&id).map(|e| e.task.clone())
    }

    /// Tasks in the order they were added.
    pub fn snapshot(&self) -> Vec<UploadTask> {
        let board = self.driver.board();
        board
            .order
            .iter()
            .filter_map(|id| board.entries.get(id))
            .map(|e| e.task.clone())
            .collect()
    }

    pub fn stats(&self) -> UploadStats {
        let board = self.driver.board();
        UploadStats::from_tasks(board.entries.values().map(|e| &e.task))
    }
}

fn reset(task: &mut UploadTask) {
    task.status = TaskStatus::Pending;
    task.progress = 0;
    task.error = None;
    task.transient = false;
    task.photo_id = None;
    task.upload_job_id = None;
}

fn log_join(res: Result<(TaskId, TaskStatus), tokio::task::JoinError>) {
    match res {
        Ok((id, status)) => debug!(task = id, "finished as {}", status.as_str()),
        Err(e) => error!("upload worker panicked: {}", e),
    }
}
