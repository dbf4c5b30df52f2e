// Module declarations
mod processor;
mod progress;
mod queue_manager;
mod retry;
mod types;

pub use progress::ProgressSimulator;
pub use retry::{classify_error, RetryStrategy};
pub use types::*;

use crate::config::QueueConfig;
use crate::logging::{log_debug, log_info, log_warn};
use crate::validation::validate_payload;
use processor::UploadProcessor;
use queue_manager::QueueState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle hooks the queue calls outside its lock; the session uses them to drive notifications
pub trait QueueObserver: Send + Sync {
    fn task_started(&self, _task_id: &str, _attempt: u32) {}
    fn task_progress(&self, _task_id: &str, _progress: u8) {}
    fn task_retrying(&self, _task_id: &str, _next_attempt: u32, _delay: Duration) {}
    fn task_completed(&self, _task_id: &str, _result: &UploadResult) {}
    fn task_failed(&self, _task_id: &str, _error: &TaskError) {}
    /// A failed task was moved back to pending
    fn task_requeued(&self, _task_id: &str) {}
    /// The task left the queue without finishing: withdrawn while pending or dropped from the failed set
    fn task_removed(&self, _task_id: &str) {}
    fn queue_cleared(&self) {}
}

pub(crate) struct QueueShared {
    config: QueueConfig,
    retry: RetryStrategy,
    progress: ProgressSimulator,
    state: Mutex<QueueState>,
    stats_tx: watch::Sender<QueueStats>,
    observer: Option<Arc<dyn QueueObserver>>,
}

impl QueueShared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // Callbacks never run under this lock, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_stats(&self, state: &QueueState) {
        self.stats_tx.send_replace(state.stats());
    }
}

/// Bounded concurrent upload queue
///
/// Cheap to clone; clones share the same state. `submit`, `resume` and the
/// retry operations spawn onto the current Tokio runtime.
#[derive(Clone)]
pub struct UploadQueue {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .field("paused", &self.is_paused())
            .field("observer", &self.shared.observer.is_some())
            .finish()
    }
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl UploadQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_observer(config: QueueConfig, observer: Arc<dyn QueueObserver>) -> Self {
        Self::build(config, Some(observer))
    }

    fn build(mut config: QueueConfig, observer: Option<Arc<dyn QueueObserver>>) -> Self {
        if config.max_concurrency == 0 {
            log_warn(
                "upload-queue",
                "maxConcurrency of 0 would never admit anything, using 1",
            )
            .unwrap_or_default();
            config.max_concurrency = 1;
        }

        let (stats_tx, _) = watch::channel(QueueStats::default());

        Self {
            shared: Arc::new(QueueShared {
                retry: RetryStrategy::from_config(&config),
                progress: ProgressSimulator::from_config(&config),
                config,
                state: Mutex::new(QueueState::new()),
                stats_tx,
                observer,
            }),
        }
    }

    fn processor(&self) -> UploadProcessor {
        UploadProcessor::new(Arc::clone(&self.shared))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Queue a task and trigger admission
    ///
    /// Only up-front problems are returned here; upload failures arrive
    /// through the task's callbacks and the stats.
    pub fn submit(&self, task: UploadTask) -> Result<(), QueueError> {
        validate_payload(&task.payload, self.shared.config.max_payload_bytes).map_err(|e| {
            QueueError::InvalidPayload {
                task_id: task.id.clone(),
                reason: e.to_string(),
            }
        })?;

        let task_id = task.id.clone();
        {
            let mut state = self.shared.lock_state();
            state.enqueue(task)?;
            self.shared.publish_stats(&state);
        }

        log_debug("upload-queue", &format!("Queued task {}", task_id)).unwrap_or_default();

        self.processor().pump();
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock_state().stats()
    }

    pub fn items(&self) -> QueueItems {
        self.shared.lock_state().items()
    }

    pub fn failed_error(&self, task_id: &str) -> Option<TaskError> {
        self.shared
            .lock_state()
            .failed
            .get(task_id)
            .map(|failed| failed.error.clone())
    }

    /// Drop all bookkeeping. Uploads already running finish in the
    /// background but no longer touch the queue or call their callbacks.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.shared.lock_state();
            let dropped = state.clear();
            self.shared.publish_stats(&state);
            dropped
        };

        log_info(
            "upload-queue",
            &format!("🧹 Cleared upload queue ({} tasks dropped)", dropped),
        )
        .unwrap_or_default();

        if let Some(observer) = &self.shared.observer {
            observer.queue_cleared();
        }
    }

    /// Stop admitting new tasks; running uploads continue
    pub fn pause(&self) {
        self.shared.lock_state().paused = true;
        log_info("upload-queue", "⏸ Upload queue paused").unwrap_or_default();
    }

    pub fn resume(&self) {
        self.shared.lock_state().paused = false;
        log_info("upload-queue", "▶ Upload queue resumed").unwrap_or_default();
        self.processor().pump();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock_state().paused
    }

    /// Move every failed task back to pending with a fresh retry budget
    pub fn retry_failed(&self) -> usize {
        let requeued: Vec<TaskId> = {
            let mut state = self.shared.lock_state();
            let ids: Vec<TaskId> = state.failed.keys().cloned().collect();
            state.requeue_failed();
            self.shared.publish_stats(&state);
            ids
        };

        if let Some(observer) = &self.shared.observer {
            for task_id in &requeued {
                observer.task_requeued(task_id);
            }
        }

        self.processor().pump();
        requeued.len()
    }

    pub fn retry_task(&self, task_id: &str) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock_state();
            state.requeue_task(task_id)?;
            self.shared.publish_stats(&state);
        }

        if let Some(observer) = &self.shared.observer {
            observer.task_requeued(task_id);
        }

        self.processor().pump();
        Ok(())
    }

    pub fn clear_failed(&self) -> usize {
        let cleared: Vec<TaskId> = {
            let mut state = self.shared.lock_state();
            let ids = state.failed.keys().cloned().collect();
            state.clear_failed();
            self.shared.publish_stats(&state);
            ids
        };

        if let Some(observer) = &self.shared.observer {
            for task_id in &cleared {
                observer.task_removed(task_id);
            }
        }
        cleared.len()
    }

    /// Withdraw a task that has not started yet
    pub fn remove_pending(&self, task_id: &str) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock_state();
            state.remove_pending(task_id)?;
            self.shared.publish_stats(&state);
        }

        if let Some(observer) = &self.shared.observer {
            observer.task_removed(task_id);
        }
        Ok(())
    }

    /// Receiver updated after every change to the queue
    pub fn subscribe_stats(&self) -> watch::Receiver<QueueStats> {
        self.shared.stats_tx.subscribe()
    }

    /// Resolves once nothing is pending or running. Never resolves while
    /// paused with pending work.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe_stats();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|stats| stats.is_idle()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn fast_config(max_concurrency: usize) -> QueueConfig {
        QueueConfig {
            max_concurrency,
            retry_attempts: 2,
            retry_delay_base_ms: 100,
            progress_tick_ms: 10,
            progress_step: 25,
            ..QueueConfig::default()
        }
    }

    fn payload(name: &str) -> UploadPayload {
        UploadPayload::new(name, vec![1u8; 32])
    }

    fn succeed() -> impl Uploader {
        |payload: UploadPayload| async move {
            Ok::<_, anyhow::Error>(json!({ "url": format!("https://cdn.example/{}", payload.file_name) }))
        }
    }

    fn always_fail(calls: Arc<AtomicUsize>) -> impl Uploader {
        move |_payload: UploadPayload| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<UploadResult, _>(anyhow::anyhow!("storage unavailable")) }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_creation() {
        let queue = UploadQueue::default();
        assert_eq!(queue.stats(), QueueStats::default());
        assert_eq!(queue.config().max_concurrency, 3);
        assert!(!queue.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_tasks_complete() {
        let queue = UploadQueue::new(fast_config(2));

        for i in 0..5 {
            queue
                .submit(UploadTask::new(format!("photo-{}", i), payload("a.jpg"), succeed()))
                .unwrap();
        }

        queue.wait_idle().await;

        assert_eq!(
            queue.stats(),
            QueueStats {
                active: 0,
                queued: 0,
                completed: 5,
                failed: 0,
                total: 5
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let queue = UploadQueue::new(fast_config(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let observed = queue.clone();
            let uploader = move |_payload: UploadPayload| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                let observed = observed.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(observed.stats().active <= 2);
                    tokio::time::sleep(Duration::from_millis(30 + i * 7)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(UploadResult::Null)
                }
            };
            queue
                .submit(UploadTask::new(format!("t{}", i), payload("b.jpg"), uploader))
                .unwrap();
            assert!(queue.stats().active <= 2);
        }

        queue.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats().completed, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_conservation_on_submit() {
        let queue = UploadQueue::new(fast_config(3));

        for i in 0..5 {
            queue
                .submit(UploadTask::new(format!("w{}", i), payload("c.jpg"), succeed()))
                .unwrap();
        }

        // Admission is synchronous with submit: capacity is filled immediately
        let stats = queue.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.queued, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_backoff() {
        let queue = UploadQueue::new(QueueConfig {
            progress_tick_ms: 0,
            ..fast_config(1)
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&errors);
        let task = UploadTask::new("broken", payload("d.jpg"), always_fail(Arc::clone(&calls)))
            .on_error(move |error| seen.lock().unwrap().push(error.clone()));

        let started = Instant::now();
        queue.submit(task).unwrap();
        queue.wait_idle().await;

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let error = queue.failed_error("broken").unwrap();
        assert_eq!(error.kind, ErrorType::Transient);
        assert_eq!(error.message, "storage unavailable");
        assert_eq!(error.attempts, 3);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0], error);
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.stats().completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_error_not_retried() {
        let queue = UploadQueue::new(fast_config(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let uploader = move |_payload: UploadPayload| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<UploadResult, _>(anyhow::Error::new(UploadRejected(
                    "unsupported format".to_string(),
                )))
            }
        };

        queue
            .submit(UploadTask::new("raw", payload("e.cr2"), uploader))
            .unwrap();
        queue.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.failed_error("raw").unwrap().kind, ErrorType::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_uploader_is_normalized() {
        let queue = UploadQueue::new(QueueConfig {
            retry_attempts: 0,
            ..fast_config(1)
        });

        let uploader = |_payload: UploadPayload| async {
            if true {
                panic!("uploader bug");
            }
            Ok::<_, anyhow::Error>(UploadResult::Null)
        };

        queue
            .submit(UploadTask::new("panics", payload("f.jpg"), uploader))
            .unwrap();
        queue.wait_idle().await;

        let error = queue.failed_error("panics").unwrap();
        assert_eq!(error.kind, ErrorType::Unknown);
        assert_eq!(error.message, "Unknown upload error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploader_panicking_before_future_frees_slot() {
        let queue = UploadQueue::new(QueueConfig {
            retry_attempts: 0,
            ..fast_config(1)
        });

        let eager_panic = |_payload: UploadPayload| -> std::future::Ready<anyhow::Result<UploadResult>> {
            panic!("uploader bug before any await")
        };

        queue
            .submit(UploadTask::new("eager", payload("r.jpg"), eager_panic))
            .unwrap();
        queue
            .submit(UploadTask::new("next", payload("s.jpg"), succeed()))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .expect("queue stalled after a panicking uploader");

        assert_eq!(queue.failed_error("eager").unwrap().kind, ErrorType::Unknown);
        assert_eq!(
            queue.stats(),
            QueueStats {
                active: 0,
                queued: 0,
                completed: 1,
                failed: 1,
                total: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callbacks_do_not_stall_queue() {
        let queue = UploadQueue::new(QueueConfig {
            retry_attempts: 0,
            ..fast_config(1)
        });

        queue
            .submit(
                UploadTask::new("ok", payload("t.jpg"), succeed())
                    .on_progress(|_| panic!("progress handler bug"))
                    .on_complete(|_| panic!("completion handler bug")),
            )
            .unwrap();
        queue
            .submit(
                UploadTask::new("bad", payload("u.jpg"), always_fail(Arc::new(AtomicUsize::new(0))))
                    .on_error(|_| panic!("error handler bug")),
            )
            .unwrap();
        queue
            .submit(UploadTask::new("last", payload("v.jpg"), succeed()))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .expect("queue stalled after a panicking callback");

        let stats = queue.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reaches_100_before_completion() {
        let queue = UploadQueue::new(fast_config(1));
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let progress_log = Arc::clone(&log);
        let complete_log = Arc::clone(&log);
        let task = UploadTask::new("p", payload("g.jpg"), succeed())
            .on_progress(move |p| progress_log.lock().unwrap().push(format!("progress:{}", p)))
            .on_complete(move |result| {
                complete_log
                    .lock()
                    .unwrap()
                    .push(format!("complete:{}", result["url"].as_str().unwrap_or_default()))
            });

        queue.submit(task).unwrap();
        queue.wait_idle().await;

        let log = log.lock().unwrap();
        assert_eq!(log.first().map(String::as_str), Some("progress:0"));
        assert_eq!(log[log.len() - 2], "progress:100");
        assert_eq!(log[log.len() - 1], "complete:https://cdn.example/g.jpg");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submit_rejected() {
        let queue = UploadQueue::new(fast_config(1));
        queue
            .submit(UploadTask::new("dup", payload("h.jpg"), succeed()))
            .unwrap();

        let err = queue
            .submit(UploadTask::new("dup", payload("h.jpg"), succeed()))
            .unwrap_err();
        assert_eq!(err, QueueError::DuplicateTask("dup".to_string()));
        assert_eq!(queue.stats().total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_rejected() {
        let queue = UploadQueue::new(QueueConfig {
            max_payload_bytes: 16,
            ..fast_config(1)
        });

        let err = queue
            .submit(UploadTask::new("big", payload("big.jpg"), succeed()))
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));
        assert_eq!(queue.stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_gates_admission() {
        let queue = UploadQueue::new(fast_config(2));
        queue.pause();

        for i in 0..3 {
            queue
                .submit(UploadTask::new(format!("z{}", i), payload("i.jpg"), succeed()))
                .unwrap();
        }
        assert_eq!(queue.stats().active, 0);
        assert_eq!(queue.stats().queued, 3);

        queue.resume();
        assert_eq!(queue.stats().active, 2);

        queue.wait_idle().await;
        assert_eq!(queue.stats().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_stale_results() {
        let queue = UploadQueue::new(fast_config(1));
        let completions = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&completions);
        let slow = |_payload: UploadPayload| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, anyhow::Error>(UploadResult::Null)
        };
        queue
            .submit(
                UploadTask::new("slow", payload("j.jpg"), slow)
                    .on_complete(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
        queue
            .submit(UploadTask::new("waiting", payload("k.jpg"), succeed()))
            .unwrap();

        queue.clear();
        assert_eq!(queue.stats(), QueueStats::default());

        // Let the in-flight upload finish in the background
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(queue.stats(), QueueStats::default());
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_total_after_clear() {
        let queue = UploadQueue::new(fast_config(2));
        for i in 0..3 {
            queue
                .submit(UploadTask::new(format!("a{}", i), payload("l.jpg"), succeed()))
                .unwrap();
        }
        queue.wait_idle().await;
        queue.clear();

        for i in 0..2 {
            queue
                .submit(UploadTask::new(format!("b{}", i), payload("m.jpg"), succeed()))
                .unwrap();
        }
        queue.wait_idle().await;
        assert_eq!(queue.stats().total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_tasks() {
        let queue = UploadQueue::new(QueueConfig {
            retry_attempts: 0,
            ..fast_config(2)
        });
        let calls = Arc::new(AtomicUsize::new(0));

        // Fails on the first call, succeeds afterwards
        let counter = Arc::clone(&calls);
        let flaky = move |_payload: UploadPayload| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(anyhow::anyhow!("timeout"))
                } else {
                    Ok(UploadResult::Null)
                }
            }
        };

        queue
            .submit(UploadTask::new("flaky", payload("n.jpg"), flaky))
            .unwrap();
        queue.wait_idle().await;
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.items().failed[0].id, "flaky");

        assert_eq!(queue.retry_failed(), 1);
        queue.wait_idle().await;

        assert_eq!(queue.stats().failed, 0);
        assert_eq!(queue.stats().completed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_pending_and_clear_failed() {
        let queue = UploadQueue::new(QueueConfig {
            retry_attempts: 0,
            ..fast_config(1)
        });
        queue.pause();
        queue
            .submit(UploadTask::new("keep", payload("o.jpg"), always_fail(Arc::new(AtomicUsize::new(0)))))
            .unwrap();
        queue
            .submit(UploadTask::new("drop", payload("p.jpg"), succeed()))
            .unwrap();

        queue.remove_pending("drop").unwrap();
        assert!(queue.remove_pending("drop").is_err());
        assert!(queue.retry_task("keep").is_err());

        queue.resume();
        queue.wait_idle().await;
        assert_eq!(queue.stats().failed, 1);

        assert_eq!(queue.clear_failed(), 1);
        assert_eq!(queue.stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_once_terminal_classification() {
        let queue = UploadQueue::new(QueueConfig {
            retry_attempts: 1,
            ..fast_config(3)
        });

        for i in 0..10 {
            let task = if i % 3 == 0 {
                UploadTask::new(format!("x{}", i), payload("q.jpg"), always_fail(Arc::new(AtomicUsize::new(0))))
            } else {
                UploadTask::new(format!("x{}", i), payload("q.jpg"), succeed())
            };
            queue.submit(task).unwrap();
        }
        queue.wait_idle().await;

        let items = queue.items();
        assert!(items.pending.is_empty());
        assert!(items.active.is_empty());
        assert_eq!(items.completed.len() + items.failed.len(), 10);
        for failed in &items.failed {
            assert!(!items.completed.contains(&failed.id));
        }
        assert_eq!(items.failed.len(), 4);
    }
}
