//! Queue bookkeeping: admission and terminal classification.
//!
//! Everything here is synchronous and runs under the queue's state lock,
//! so each operation is atomic with respect to the others.

use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

use super::types::{FailedItem, QueueError, QueueItems, QueueStats, TaskError, TaskId, UploadTask};

pub(crate) struct FailedTask {
    pub error: TaskError,
    /// Kept so the task can be retried on demand
    pub task: UploadTask,
}

/// Every submitted id lives in exactly one of `pending`, `active`, `completed`, `failed`
pub(crate) struct QueueState {
    pub pending: VecDeque<UploadTask>,
    pub active: HashSet<TaskId>,
    pub completed: HashSet<TaskId>,
    pub failed: IndexMap<TaskId, FailedTask>,
    pub paused: bool,
    /// Bumped by `clear`; executions started under an older generation are stale
    pub generation: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            active: HashSet::new(),
            completed: HashSet::new(),
            failed: IndexMap::new(),
            paused: false,
            generation: 0,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.active.contains(task_id)
            || self.completed.contains(task_id)
            || self.failed.contains_key(task_id)
            || self.pending.iter().any(|task| task.id == task_id)
    }

    pub fn enqueue(&mut self, task: UploadTask) -> Result<(), QueueError> {
        if self.contains(&task.id) {
            return Err(QueueError::DuplicateTask(task.id));
        }
        self.pending.push_back(task);
        Ok(())
    }

    /// Pop pending tasks into the active set until capacity is reached or the gate is closed
    pub fn admit(&mut self, max_concurrency: usize) -> Vec<UploadTask> {
        let mut admitted = Vec::new();

        while !self.paused && self.active.len() < max_concurrency {
            let Some(task) = self.pending.pop_front() else {
                break;
            };
            self.active.insert(task.id.clone());
            admitted.push(task);
        }

        admitted
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Returns false for stale executions, which must not touch anything else
    pub fn mark_completed(&mut self, task_id: &str, generation: u64) -> bool {
        if !self.is_current(generation) || !self.active.remove(task_id) {
            return false;
        }
        self.completed.insert(task_id.to_string());
        true
    }

    pub fn mark_failed(&mut self, task: UploadTask, error: TaskError, generation: u64) -> bool {
        if !self.is_current(generation) || !self.active.remove(&task.id) {
            return false;
        }
        self.failed.insert(task.id.clone(), FailedTask { error, task });
        true
    }

    pub fn stats(&self) -> QueueStats {
        let active = self.active.len();
        let queued = self.pending.len();
        let completed = self.completed.len();
        let failed = self.failed.len();

        QueueStats {
            active,
            queued,
            completed,
            failed,
            total: active + queued + completed + failed,
        }
    }

    pub fn items(&self) -> QueueItems {
        let mut active: Vec<TaskId> = self.active.iter().cloned().collect();
        active.sort();
        let mut completed: Vec<TaskId> = self.completed.iter().cloned().collect();
        completed.sort();

        QueueItems {
            pending: self.pending.iter().map(|task| task.id.clone()).collect(),
            active,
            completed,
            failed: self
                .failed
                .iter()
                .map(|(id, failed)| FailedItem {
                    id: id.clone(),
                    error: failed.error.clone(),
                })
                .collect(),
        }
    }

    /// Forget everything; returns how many ids were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.stats().total;
        self.pending.clear();
        self.active.clear();
        self.completed.clear();
        self.failed.clear();
        self.generation += 1;
        dropped
    }

    pub fn clear_failed(&mut self) -> usize {
        let count = self.failed.len();
        self.failed.clear();
        count
    }

    /// Move all failed tasks back to the pending tail, oldest failure first
    pub fn requeue_failed(&mut self) -> usize {
        let count = self.failed.len();
        for (_, failed) in self.failed.drain(..) {
            self.pending.push_back(failed.task);
        }
        count
    }

    pub fn requeue_task(&mut self, task_id: &str) -> Result<(), QueueError> {
        let failed = self
            .failed
            .shift_remove(task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;
        self.pending.push_back(failed.task);
        Ok(())
    }

    /// Withdraw a task that has not been admitted yet
    pub fn remove_pending(&mut self, task_id: &str) -> Result<UploadTask, QueueError> {
        let index = self
            .pending
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;

        self.pending
            .remove(index)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))
    }
}
