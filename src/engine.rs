//! Upload session: one queue driving one notification registry.
//!
//! `UploadCore` owns everything an upload screen needs for its lifetime.
//! Tasks enqueued through it get a notification that follows the task from
//! pending to completed or error without the caller correlating ids.

use crate::config::UploadCoreConfig;
use crate::error::UploadCoreError;
use crate::events::{ActivityLogHandler, ToastForwarder, ToastSink, UploadEventPayload};
use crate::logging::{log_debug, log_info, log_warn};
use crate::notifications::{
    NewNotification, NotificationId, NotificationMetadata, NotificationPatch, NotificationRegistry,
    NotificationStatus, NotificationSweeper, RegistrySnapshot,
};
use crate::shutdown::ShutdownCoordinator;
use crate::upload_queue::{
    QueueError, QueueObserver, QueueStats, TaskError, TaskId, UploadQueue, UploadResult, UploadTask,
    Uploader,
};
use crate::validation::load_payload;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Link {
    notification_id: NotificationId,
    title: String,
    metadata: NotificationMetadata,
}

/// Mirrors queue lifecycle into the registry
struct RegistryBridge {
    registry: NotificationRegistry,
    links: Mutex<HashMap<TaskId, Link>>,
}

impl RegistryBridge {
    fn new(registry: NotificationRegistry) -> Self {
        Self {
            registry,
            links: Mutex::new(HashMap::new()),
        }
    }

    fn lock_links(&self) -> MutexGuard<'_, HashMap<TaskId, Link>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if the task id is already linked
    fn link(&self, task_id: &str, link: Link) -> bool {
        let mut links = self.lock_links();
        if links.contains_key(task_id) {
            return false;
        }
        links.insert(task_id.to_string(), link);
        true
    }

    fn unlink(&self, task_id: &str) -> Option<Link> {
        self.lock_links().remove(task_id)
    }

    fn notification_for(&self, task_id: &str) -> Option<NotificationId> {
        self.lock_links()
            .get(task_id)
            .map(|link| link.notification_id.clone())
    }

    fn update(&self, task_id: &str, patch: NotificationPatch) {
        if let Some(notification_id) = self.notification_for(task_id) {
            self.registry.update_notification(&notification_id, patch);
        }
    }

    /// Remove the row unless it already shows an outcome the user should see
    fn discard_unfinished(&self, notification_id: &str) {
        let finished = self
            .registry
            .get(notification_id)
            .is_some_and(|n| n.status.is_terminal());
        if !finished {
            self.registry.remove_notification(notification_id);
        }
    }
}

impl QueueObserver for RegistryBridge {
    fn task_started(&self, task_id: &str, attempt: u32) {
        let Some(link) = self.lock_links().get(task_id).cloned() else {
            return;
        };

        self.registry.update_notification(
            &link.notification_id,
            NotificationPatch::status(NotificationStatus::Uploading).with_progress(0),
        );

        if attempt == 0 {
            self.registry.emit(
                &link.notification_id,
                &link.title,
                UploadEventPayload::UploadStarted,
            );
        }
    }

    fn task_progress(&self, task_id: &str, progress: u8) {
        self.update(task_id, NotificationPatch::progress(progress));
    }

    fn task_completed(&self, task_id: &str, _result: &UploadResult) {
        if let Some(link) = self.unlink(task_id) {
            self.registry
                .update_notification(&link.notification_id, NotificationPatch::completed());
        }
    }

    fn task_failed(&self, task_id: &str, error: &TaskError) {
        // Stay linked: the task can still be retried
        self.update(task_id, NotificationPatch::failed(error.message.clone()));
    }

    fn task_requeued(&self, task_id: &str) {
        let Some(old) = self.unlink(task_id) else {
            return;
        };

        // Error rows are final, so a retry gets a fresh row
        self.registry.remove_notification(&old.notification_id);
        let notification_id = self.registry.add_notification(
            NewNotification::new(old.title.clone(), NotificationStatus::Pending)
                .with_metadata(old.metadata.clone()),
        );

        self.link(
            task_id,
            Link {
                notification_id,
                ..old
            },
        );
    }

    fn task_removed(&self, task_id: &str) {
        if let Some(link) = self.unlink(task_id) {
            self.discard_unfinished(&link.notification_id);
        }
    }

    fn queue_cleared(&self) {
        let links: Vec<Link> = self.lock_links().drain().map(|(_, link)| link).collect();
        for link in &links {
            self.discard_unfinished(&link.notification_id);
        }
    }
}

/// Queue stats and registry view captured together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub stats: QueueStats,
    pub registry: RegistrySnapshot,
}

/// One upload session. Create it once per screen/app session, call `start`
/// for the background workers and `shutdown` when done.
pub struct UploadCore {
    config: UploadCoreConfig,
    queue: UploadQueue,
    registry: NotificationRegistry,
    bridge: Arc<RegistryBridge>,
    shutdown: ShutdownCoordinator,
    toast_sink: Option<Arc<dyn ToastSink>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for UploadCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCore")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("registry", &self.registry)
            .field("shutdown", &self.shutdown.is_shutdown())
            .finish()
    }
}

impl Default for UploadCore {
    fn default() -> Self {
        Self::new(UploadCoreConfig::default())
    }
}

impl UploadCore {
    pub fn new(config: UploadCoreConfig) -> Self {
        let registry = NotificationRegistry::new(config.registry.clone());
        let bridge = Arc::new(RegistryBridge::new(registry.clone()));
        let queue = UploadQueue::with_observer(
            config.queue.clone(),
            Arc::clone(&bridge) as Arc<dyn QueueObserver>,
        );

        Self {
            config,
            queue,
            registry,
            bridge,
            shutdown: ShutdownCoordinator::new(),
            toast_sink: None,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Render upload events as toasts once started
    pub fn with_toast_sink(mut self, sink: Arc<dyn ToastSink>) -> Self {
        self.toast_sink = Some(sink);
        self
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the sweeper and event handlers. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut workers = self.lock_workers();
        if !workers.is_empty() {
            log_warn("upload-core", "Upload session already started").unwrap_or_default();
            return;
        }

        workers.push(
            NotificationSweeper::new(self.registry.clone(), self.shutdown.clone()).start(),
        );
        workers.push(
            ActivityLogHandler::new(self.registry.event_bus().clone(), self.shutdown.clone())
                .start(),
        );
        if let Some(sink) = &self.toast_sink {
            workers.push(
                ToastForwarder::new(
                    self.registry.event_bus().clone(),
                    Arc::clone(sink),
                    self.shutdown.clone(),
                )
                .start(),
            );
        }

        log_info(
            "upload-core",
            &format!(
                "🚀 Upload session started (max {} concurrent uploads)",
                self.config.queue.max_concurrency
            ),
        )
        .unwrap_or_default();
    }

    /// Submit `task` with a notification titled `title`; returns the notification id
    pub fn enqueue(
        &self,
        task: UploadTask,
        title: impl Into<String>,
    ) -> Result<NotificationId, QueueError> {
        let title = title.into();
        let task_id = task.id.clone();
        let metadata = NotificationMetadata {
            file_name: Some(task.payload.file_name.clone()),
            file_size: Some(task.payload.file_size),
            category: task.payload.category.clone(),
        };

        if self.bridge.notification_for(&task_id).is_some() {
            return Err(QueueError::DuplicateTask(task_id));
        }

        let notification_id = self.registry.add_notification(
            NewNotification::new(title.clone(), NotificationStatus::Pending)
                .with_metadata(metadata.clone()),
        );

        let linked = self.bridge.link(
            &task_id,
            Link {
                notification_id: notification_id.clone(),
                title,
                metadata,
            },
        );
        if !linked {
            self.registry.remove_notification(&notification_id);
            return Err(QueueError::DuplicateTask(task_id));
        }

        if let Err(e) = self.queue.submit(task) {
            self.bridge.unlink(&task_id);
            self.registry.remove_notification(&notification_id);
            log_debug("upload-core", &format!("Rejected task {}: {}", task_id, e))
                .unwrap_or_default();
            return Err(e);
        }

        Ok(notification_id)
    }

    /// Read `path` from disk and enqueue it, titled with its file name
    pub fn enqueue_file(
        &self,
        task_id: impl Into<TaskId>,
        path: &Path,
        uploader: impl Uploader + 'static,
    ) -> Result<NotificationId, UploadCoreError> {
        let payload = load_payload(path, self.config.queue.max_payload_bytes)?;
        let title = payload.file_name.clone();

        Ok(self.enqueue(UploadTask::new(task_id, payload, uploader), title)?)
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn registry(&self) -> &NotificationRegistry {
        &self.registry
    }

    pub fn config(&self) -> &UploadCoreConfig {
        &self.config
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            stats: self.queue.stats(),
            registry: self.registry.snapshot(),
        }
    }

    /// Stop background workers and wait for them. Running uploads are not interrupted.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown();

        let workers: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                log_warn("upload-core", &format!("Worker ended abnormally: {}", e))
                    .unwrap_or_default();
            }
        }

        log_info("upload-core", "Upload session shut down").unwrap_or_default();
    }
}
