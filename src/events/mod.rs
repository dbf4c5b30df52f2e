mod bus;
mod handlers;
mod types;

pub use bus::{EventBus, EventReceiver};
pub use handlers::{ActivityLogHandler, ToastForwarder, ToastSink};
pub use types::{EventSequence, Toast, ToastLevel, UploadEvent, UploadEventPayload};
