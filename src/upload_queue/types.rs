//! Type definitions for the upload queue.
//!
//! Defines the task submitted by callers (payload, uploader, callbacks),
//! the normalized failure representation and the statistics snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type TaskId = String;

/// Opaque result handed back by an uploader (e.g. the stored image record)
pub type UploadResult = serde_json::Value;

pub type UploadFuture = Pin<Box<dyn Future<Output = anyhow::Result<UploadResult>> + Send>>;

/// A file-like blob to upload. Identified by task id only, never by content.
#[derive(Clone)]
pub struct UploadPayload {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: Option<String>,
    pub category: Option<String>,
    pub content: Arc<[u8]>,
}

impl UploadPayload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        let content = content.into();
        Self {
            file_name: file_name.into(),
            file_size: content.len() as u64,
            content_type: None,
            category: None,
            content,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPayload")
            .field("file_name", &self.file_name)
            .field("file_size", &self.file_size)
            .field("content_type", &self.content_type)
            .field("category", &self.category)
            .field("content", &"<bytes>")
            .finish()
    }
}

/// The upload capability supplied by the UI layer; the core never talks to the network itself
pub trait Uploader: Send + Sync {
    fn upload(&self, payload: UploadPayload) -> UploadFuture;
}

impl<F, Fut> Uploader for F
where
    F: Fn(UploadPayload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<UploadResult>> + Send + 'static,
{
    fn upload(&self, payload: UploadPayload) -> UploadFuture {
        Box::pin(self(payload))
    }
}

/// Return this from an uploader (via `anyhow::Error::new`) for failures retrying cannot fix
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UploadRejected(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Ordinary uploader failure, retried with backoff
    Transient,
    /// Uploader returned `UploadRejected`, never retried
    Rejected,
    /// Upload future panicked
    Unknown,
}

/// Uniform failure stored for tasks that exhausted their attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct TaskError {
    pub kind: ErrorType,
    pub message: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

impl TaskError {
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(&UploadResult) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// A unit of work submitted to the queue
#[derive(Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub payload: UploadPayload,
    pub(crate) uploader: Arc<dyn Uploader>,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_complete: Option<CompleteCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl UploadTask {
    pub fn new(id: impl Into<TaskId>, payload: UploadPayload, uploader: impl Uploader + 'static) -> Self {
        Self {
            id: id.into(),
            payload,
            uploader: Arc::new(uploader),
            on_progress: None,
            on_complete: None,
            on_error: None,
        }
    }

    pub fn on_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_complete(mut self, callback: impl Fn(&UploadResult) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&TaskError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("uploader", &"<uploader>")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Reasons `submit` refuses a task up front
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task '{0}' is already known to the queue")]
    DuplicateTask(TaskId),

    #[error("invalid payload for task '{task_id}': {reason}")]
    InvalidPayload { task_id: TaskId, reason: String },

    #[error("task '{0}' not found")]
    NotFound(TaskId),
}

/// Point-in-time counts; `total` is the sum of the other four
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub active: usize,
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStats {
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.queued == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: TaskId,
    pub error: TaskError,
}

/// Ids in each queue state, for expanded views
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueItems {
    pub pending: Vec<TaskId>,
    pub active: Vec<TaskId>,
    pub completed: Vec<TaskId>,
    pub failed: Vec<FailedItem>,
}
