use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Transient, fire-and-forget upload events meant for toast-style display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub notification_id: String,
    pub title: String,
    pub payload: UploadEventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEventPayload {
    /// Notification created directly in the uploading state
    UploadStarted,

    /// First transition into `completed`
    UploadCompleted,

    /// First transition into `error`
    UploadFailed { error: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// What the frontend renders for an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub description: String,
}

impl UploadEvent {
    pub fn payload_type(&self) -> &str {
        match &self.payload {
            UploadEventPayload::UploadStarted => "upload_started",
            UploadEventPayload::UploadCompleted => "upload_completed",
            UploadEventPayload::UploadFailed { .. } => "upload_failed",
        }
    }

    pub fn to_toast(&self) -> Toast {
        match &self.payload {
            UploadEventPayload::UploadStarted => Toast {
                level: ToastLevel::Info,
                title: "Upload started".to_string(),
                description: format!("Uploading {}", self.title),
            },
            UploadEventPayload::UploadCompleted => Toast {
                level: ToastLevel::Success,
                title: "Upload complete".to_string(),
                description: format!("{} has been uploaded successfully", self.title),
            },
            UploadEventPayload::UploadFailed { error } => Toast {
                level: ToastLevel::Error,
                title: "Upload failed".to_string(),
                description: match error {
                    Some(error) => format!("{}: {}", self.title, error),
                    None => format!("{} could not be uploaded", self.title),
                },
            },
        }
    }
}
