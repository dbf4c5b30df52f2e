use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type NotificationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Error,
}

impl NotificationStatus {
    /// Counted by `total_active_uploads`
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Uploading | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Uploading => 1,
            Self::Processing => 2,
            Self::Completed | Self::Error => 3,
        }
    }

    /// Forward moves only (skips allowed); any live status may fail; terminal states are absorbing.
    /// Re-applying the current status is always accepted.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == Self::Error || next.rank() > self.rank()
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Which rows `global_progress` averages over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressScope {
    /// Every row, finished ones included (they sit at 100 and pull the mean up)
    #[default]
    AllRows,
    /// Only pending, uploading and processing rows
    ActiveOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadNotification {
    pub id: NotificationId,
    pub title: String,
    pub progress: u8,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<NotificationMetadata>,
}

/// Caller-supplied fields for a new row; id and timestamp are assigned by the registry
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub title: String,
    pub progress: u8,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub metadata: Option<NotificationMetadata>,
}

impl NewNotification {
    pub fn new(title: impl Into<String>, status: NotificationStatus) -> Self {
        Self {
            title: title.into(),
            progress: 0,
            status,
            error: None,
            metadata: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_metadata(mut self, metadata: NotificationMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPatch {
    pub title: Option<String>,
    pub progress: Option<u8>,
    pub status: Option<NotificationStatus>,
    pub error: Option<String>,
    pub metadata: Option<NotificationMetadata>,
}

impl NotificationPatch {
    pub fn status(status: NotificationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(NotificationStatus::Completed),
            progress: Some(100),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(NotificationStatus::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Unknown id; nothing changed
    NotFound,
    /// Status change refused, remaining fields were still merged
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },
}

/// Everything an observer renders: rows (most recent first) plus derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub notifications: Vec<UploadNotification>,
    pub total_active_uploads: usize,
    pub global_progress: f64,
}
