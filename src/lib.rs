// Library exports for the demo binary and integration tests

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod notifications;
pub mod shutdown;
pub mod upload_queue;
pub mod validation;

pub use config::UploadCoreConfig;
pub use engine::{SessionSnapshot, UploadCore};
pub use error::UploadCoreError;
pub use notifications::NotificationRegistry;
pub use upload_queue::{UploadPayload, UploadQueue, UploadTask};
