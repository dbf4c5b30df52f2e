//! Retry logic with exponential backoff and error classification.
//!
//! Decides whether a failed attempt is retried, how long to wait before
//! the next one, and normalizes uploader failures into `TaskError`.

use super::types::{ErrorType, TaskError, UploadRejected};
use crate::config::QueueConfig;
use std::time::Duration;

/// Retry strategy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later one
    pub base_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay_base())
    }

    /// `attempt` is the 0-indexed attempt that just failed
    pub fn should_retry(&self, attempt: u32, error_type: ErrorType) -> bool {
        if error_type == ErrorType::Rejected {
            return false;
        }

        attempt < self.max_retries
    }

    /// Delay after failed attempt `attempt`: base * 2^attempt, saturating
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .map(|factor| self.base_delay.saturating_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

/// Classify an uploader error into an ErrorType
pub fn classify_error(error: &anyhow::Error) -> ErrorType {
    if error.downcast_ref::<UploadRejected>().is_some() {
        ErrorType::Rejected
    } else {
        ErrorType::Transient
    }
}

/// Normalize an uploader error into the stored representation
pub fn normalize_error(error: &anyhow::Error) -> TaskError {
    TaskError::new(classify_error(error), format!("{:#}", error))
}

/// Normalize a panic or cancellation of the upload future
pub fn normalize_join_error(error: &tokio::task::JoinError) -> TaskError {
    if error.is_panic() {
        TaskError::new(ErrorType::Unknown, "Unknown upload error")
    } else {
        TaskError::new(ErrorType::Unknown, "Upload was cancelled")
    }
}
