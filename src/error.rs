use thiserror::Error;

/// Upload core errors
#[derive(Debug, Error)]
pub enum UploadCoreError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue submission errors
    #[error("Queue error: {0}")]
    Queue(#[from] crate::upload_queue::QueueError),

    /// Validation errors (payload size, name, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convert UploadCoreError to String for the UI bridge,
/// which only passes string errors through to the frontend
impl From<UploadCoreError> for String {
    fn from(err: UploadCoreError) -> String {
        err.to_string()
    }
}

impl From<Box<dyn std::error::Error>> for UploadCoreError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        UploadCoreError::Other(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, UploadCoreError>;
}

impl<T, E: Into<UploadCoreError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, UploadCoreError> {
        self.map_err(|e| {
            let err: UploadCoreError = e.into();
            match err {
                UploadCoreError::Other(s) => UploadCoreError::Other(format!("{}: {}", msg, s)),
                UploadCoreError::Config(s) => UploadCoreError::Config(format!("{}: {}", msg, s)),
                UploadCoreError::Validation(s) => {
                    UploadCoreError::Validation(format!("{}: {}", msg, s))
                }
                UploadCoreError::Queue(e) => UploadCoreError::Queue(e),
                UploadCoreError::Io(e) => UploadCoreError::Io(e),
                UploadCoreError::Json(e) => UploadCoreError::Json(e),
            }
        })
    }
}
