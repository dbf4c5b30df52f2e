//! Upload execution with bounded admission.
//!
//! Admits pending tasks up to the concurrency limit, runs each attempt
//! alongside its progress reporter, and retries with backoff.

use crate::logging::{log_debug, log_error, log_info, log_warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::sleep;

use super::retry::{normalize_error, normalize_join_error};
use super::types::{TaskError, UploadResult, UploadTask};
use super::QueueShared;

/// Drives admission and execution for one queue
#[derive(Clone)]
pub(crate) struct UploadProcessor {
    shared: Arc<QueueShared>,
}

impl UploadProcessor {
    pub fn new(shared: Arc<QueueShared>) -> Self {
        Self { shared }
    }

    /// Admission attempt: start as many pending tasks as capacity allows
    pub fn pump(&self) {
        let (admitted, generation) = {
            let mut state = self.shared.lock_state();
            let admitted = state.admit(self.shared.config.max_concurrency);
            if !admitted.is_empty() {
                self.shared.publish_stats(&state);
            }
            (admitted, state.generation)
        };

        for task in admitted {
            self.spawn_upload_task(task, generation);
        }
    }

    fn spawn_upload_task(&self, task: UploadTask, generation: u64) {
        let processor = self.clone();

        tokio::spawn(async move {
            processor.execute(task, generation).await;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock_state().is_current(generation)
    }

    /// Run caller code; a panic is logged and swallowed so accounting and admission go on
    fn guarded(&self, task_id: &str, hook: &str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            log_error(
                "upload-queue",
                &format!("✗ {} panicked for task {}", hook, task_id),
            )
            .unwrap_or_default();
        }
    }

    async fn execute(&self, task: UploadTask, generation: u64) {
        let retry = self.shared.retry;
        let mut attempt = 0u32;

        loop {
            log_info(
                "upload-queue",
                &format!(
                    "📤 Uploading {} (task {}, attempt {})",
                    task.payload.file_name,
                    task.id,
                    attempt + 1
                ),
            )
            .unwrap_or_default();

            if let Some(observer) = &self.shared.observer {
                self.guarded(&task.id, "task_started", || {
                    observer.task_started(&task.id, attempt)
                });
            }

            let error = match self.run_attempt(&task, generation).await {
                Ok(result) => {
                    self.handle_upload_success(&task, result, generation);
                    break;
                }
                Err(error) => error,
            };

            if !self.is_current(generation) {
                log_debug(
                    "upload-queue",
                    &format!("Discarding failure of cleared task {}", task.id),
                )
                .unwrap_or_default();
                return;
            }

            if !retry.should_retry(attempt, error.kind) {
                let error = TaskError {
                    attempts: attempt + 1,
                    ..error
                };
                self.handle_upload_failure(task, error, generation);
                break;
            }

            let delay = retry.calculate_backoff(attempt);
            log_warn(
                "upload-queue",
                &format!(
                    "⚠ Upload failed, retrying {} in {}ms: {}",
                    task.payload.file_name,
                    delay.as_millis(),
                    error.message
                ),
            )
            .unwrap_or_default();

            if let Some(observer) = &self.shared.observer {
                self.guarded(&task.id, "task_retrying", || {
                    observer.task_retrying(&task.id, attempt + 1, delay)
                });
            }

            sleep(delay).await;

            if !self.is_current(generation) {
                log_debug(
                    "upload-queue",
                    &format!("Dropping retry of cleared task {}", task.id),
                )
                .unwrap_or_default();
                return;
            }

            attempt += 1;
        }

        self.pump();
    }

    /// One attempt: the upload and the progress reporter must both finish.
    /// A failed upload short-circuits and drops the reporter.
    async fn run_attempt(
        &self,
        task: &UploadTask,
        generation: u64,
    ) -> Result<UploadResult, TaskError> {
        // Own task so a panicking uploader is contained and normalized,
        // including one that panics before handing back its future
        let uploader = Arc::clone(&task.uploader);
        let payload = task.payload.clone();
        let handle = tokio::spawn(async move { uploader.upload(payload).await });

        let upload = async move {
            match handle.await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(error)) => Err(normalize_error(&error)),
                Err(join_error) => Err(normalize_join_error(&join_error)),
            }
        };

        let progress = async {
            self.shared
                .progress
                .run(|progress| self.report_progress(task, progress, generation))
                .await;
            Ok::<(), TaskError>(())
        };

        let (result, ()) = tokio::try_join!(upload, progress)?;
        Ok(result)
    }

    fn report_progress(&self, task: &UploadTask, progress: u8, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        if let Some(on_progress) = &task.on_progress {
            self.guarded(&task.id, "on_progress", || on_progress(progress));
        }
        if let Some(observer) = &self.shared.observer {
            self.guarded(&task.id, "task_progress", || {
                observer.task_progress(&task.id, progress)
            });
        }
    }

    fn handle_upload_success(&self, task: &UploadTask, result: UploadResult, generation: u64) {
        let recorded = {
            let mut state = self.shared.lock_state();
            let recorded = state.mark_completed(&task.id, generation);
            if recorded {
                self.shared.publish_stats(&state);
            }
            recorded
        };

        if !recorded {
            log_debug(
                "upload-queue",
                &format!("Discarding completion of cleared task {}", task.id),
            )
            .unwrap_or_default();
            return;
        }

        log_info(
            "upload-queue",
            &format!(
                "✓ Upload successful: {} (size: {} bytes)",
                task.payload.file_name, task.payload.file_size
            ),
        )
        .unwrap_or_default();

        if let Some(on_complete) = &task.on_complete {
            self.guarded(&task.id, "on_complete", || on_complete(&result));
        }
        if let Some(observer) = &self.shared.observer {
            self.guarded(&task.id, "task_completed", || {
                observer.task_completed(&task.id, &result)
            });
        }
    }

    fn handle_upload_failure(&self, task: UploadTask, error: TaskError, generation: u64) {
        let task_id = task.id.clone();
        let file_name = task.payload.file_name.clone();
        let on_error = task.on_error.clone();

        let recorded = {
            let mut state = self.shared.lock_state();
            let recorded = state.mark_failed(task, error.clone(), generation);
            if recorded {
                self.shared.publish_stats(&state);
            }
            recorded
        };

        if !recorded {
            return;
        }

        log_error(
            "upload-queue",
            &format!(
                "✗ Upload failed permanently: {} (after {} attempts): {}",
                file_name, error.attempts, error.message
            ),
        )
        .unwrap_or_default();

        if let Some(on_error) = on_error {
            self.guarded(&task_id, "on_error", || on_error(&error));
        }
        if let Some(observer) = &self.shared.observer {
            self.guarded(&task_id, "task_failed", || {
                observer.task_failed(&task_id, &error)
            });
        }
    }
}
