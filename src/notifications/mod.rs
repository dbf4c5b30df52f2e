//! Realtime upload notification registry.
//!
//! One shared table of notifications (most recent first) with metrics derived
//! on every read, toast events on the first transition into a terminal
//! status, and a sweep of finished rows.

mod sweeper;
mod types;

pub use sweeper::NotificationSweeper;
pub use types::*;

use crate::config::{RegistryConfig, DEFAULT_SWEEP_INTERVAL_MS};
use crate::events::{EventBus, EventReceiver, UploadEventPayload};
use crate::logging::{log_debug, log_info, log_warn};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

struct RegistryInner {
    config: RegistryConfig,
    table: Mutex<VecDeque<UploadNotification>>,
    events: EventBus,
    revision: watch::Sender<u64>,
}

/// Session-scoped notification table; clones share the same rows
#[derive(Clone)]
pub struct NotificationRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn count_active(rows: &VecDeque<UploadNotification>) -> usize {
    rows.iter().filter(|n| n.status.is_active()).count()
}

fn mean_progress(rows: &VecDeque<UploadNotification>, scope: ProgressScope) -> f64 {
    let (sum, count) = rows
        .iter()
        .filter(|n| scope == ProgressScope::AllRows || n.status.is_active())
        .fold((0u64, 0u64), |(sum, count), n| {
            (sum + u64::from(n.progress), count + 1)
        });

    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

impl NotificationRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let events = EventBus::new(config.event_capacity.max(1));
        Self::with_event_bus(config, events)
    }

    /// Share an existing bus, e.g. one the UI already listens on
    pub fn with_event_bus(mut config: RegistryConfig, events: EventBus) -> Self {
        if config.sweep_interval_ms == 0 {
            log_warn(
                "notifications",
                "sweepIntervalMs of 0 would spin the sweeper, using the default",
            )
            .unwrap_or_default();
            config.sweep_interval_ms = DEFAULT_SWEEP_INTERVAL_MS;
        }

        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                config,
                table: Mutex::new(VecDeque::new()),
                events,
                revision,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn lock_table(&self) -> MutexGuard<'_, VecDeque<UploadNotification>> {
        self.inner.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_revision(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    pub(crate) fn emit(&self, notification_id: &str, title: &str, payload: UploadEventPayload) {
        // Nobody listening is fine: toasts are fire-and-forget
        if let Err(e) = self.inner.events.publish(notification_id, title, payload) {
            log_debug("notifications", &format!("Event for {} dropped: {}", notification_id, e))
                .unwrap_or_default();
        }
    }

    pub fn add_notification(&self, new: NewNotification) -> NotificationId {
        let notification = UploadNotification {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            progress: new.progress.min(100),
            status: new.status,
            error: new.error,
            created_at: Utc::now(),
            metadata: new.metadata,
        };
        let id = notification.id.clone();
        let started = (notification.status == NotificationStatus::Uploading)
            .then(|| notification.title.clone());

        self.lock_table().push_front(notification);
        self.bump_revision();

        if let Some(title) = started {
            self.emit(&id, &title, UploadEventPayload::UploadStarted);
        }

        id
    }

    /// Merge `patch` into the row with `id`. Unknown ids are ignored.
    pub fn update_notification(&self, id: &str, patch: NotificationPatch) -> UpdateOutcome {
        let (outcome, event) = {
            let mut table = self.lock_table();
            let Some(notification) = table.iter_mut().find(|n| n.id == id) else {
                return UpdateOutcome::NotFound;
            };

            let previous = notification.status;
            let mut outcome = UpdateOutcome::Applied;

            if let Some(next) = patch.status {
                if previous.can_transition_to(next) {
                    notification.status = next;
                } else {
                    outcome = UpdateOutcome::InvalidTransition {
                        from: previous,
                        to: next,
                    };
                }
            }
            if let Some(title) = patch.title {
                notification.title = title;
            }
            if let Some(progress) = patch.progress {
                notification.progress = progress.min(100);
            }
            if let Some(error) = patch.error {
                notification.error = Some(error);
            }
            if let Some(metadata) = patch.metadata {
                notification.metadata = Some(metadata);
            }

            let event = if notification.status == previous {
                None
            } else {
                match notification.status {
                    NotificationStatus::Completed => Some(UploadEventPayload::UploadCompleted),
                    NotificationStatus::Error => Some(UploadEventPayload::UploadFailed {
                        error: notification.error.clone(),
                    }),
                    _ => None,
                }
            };

            (outcome, event.map(|payload| (notification.title.clone(), payload)))
        };

        self.bump_revision();

        if let UpdateOutcome::InvalidTransition { from, to } = outcome {
            log_warn(
                "notifications",
                &format!("Ignoring status change {} -> {} for notification {}", from, to, id),
            )
            .unwrap_or_default();
        }

        if let Some((title, payload)) = event {
            self.emit(id, &title, payload);
        }

        outcome
    }

    pub fn remove_notification(&self, id: &str) -> bool {
        let removed = {
            let mut table = self.lock_table();
            let before = table.len();
            table.retain(|n| n.id != id);
            table.len() != before
        };

        if removed {
            self.bump_revision();
        }
        removed
    }

    pub fn clear_all_notifications(&self) -> usize {
        let cleared = {
            let mut table = self.lock_table();
            let cleared = table.len();
            table.clear();
            cleared
        };

        self.bump_revision();
        cleared
    }

    pub fn get(&self, id: &str) -> Option<UploadNotification> {
        self.lock_table().iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_table().is_empty()
    }

    pub fn notifications(&self) -> Vec<UploadNotification> {
        self.lock_table().iter().cloned().collect()
    }

    pub fn total_active_uploads(&self) -> usize {
        count_active(&self.lock_table())
    }

    pub fn global_progress(&self) -> f64 {
        mean_progress(&self.lock_table(), self.inner.config.progress_scope)
    }

    /// Rows and metrics read under one lock, so they always agree
    pub fn snapshot(&self) -> RegistrySnapshot {
        let table = self.lock_table();
        RegistrySnapshot {
            notifications: table.iter().cloned().collect(),
            total_active_uploads: count_active(&table),
            global_progress: mean_progress(&table, self.inner.config.progress_scope),
        }
    }

    /// The `n` most recent rows
    pub fn recent(&self, n: usize) -> Vec<UploadNotification> {
        self.lock_table().iter().take(n).cloned().collect()
    }

    /// Prefix shown by the collapsed summary view
    pub fn summary(&self) -> Vec<UploadNotification> {
        self.recent(self.inner.config.summary_size)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Counter bumped on every mutation; observers re-read the snapshot when it changes
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Drop completed rows old enough at `now`; returns the removed ids
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<NotificationId> {
        let deadline = self.inner.config.sweep_deadline();

        let removed: Vec<NotificationId> = {
            let mut table = self.lock_table();
            let mut removed = Vec::new();
            table.retain(|n| {
                let expired = n.status == NotificationStatus::Completed
                    && now.signed_duration_since(n.created_at) >= deadline;
                if expired {
                    removed.push(n.id.clone());
                }
                !expired
            });
            removed
        };

        if !removed.is_empty() {
            self.bump_revision();
            log_info(
                "notifications",
                &format!("🧹 Swept {} completed notifications", removed.len()),
            )
            .unwrap_or_default();
        }

        removed
    }

    pub fn sweep(&self) -> Vec<NotificationId> {
        self.sweep_at(Utc::now())
    }
}
