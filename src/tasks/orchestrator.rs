//! Task orchestrator — at most one unfinished task per user.
//!
//! Creating a task for a user who already has a pending or running one
//! cancels the previous task first. The cancel, the index update and the
//! spawn all happen under one registry lock, so no other caller can observe
//! two unfinished tasks for the same user.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::job::{Job, ProgressReporter};
use super::record::{TaskEvent, TaskId, TaskObserver, TaskRecord, TaskStats, TaskStatus};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Error recorded when a job panics.
pub const PANIC_MESSAGE: &str = "job panicked";

#[derive(Default)]
struct Registry {
    records: HashMap<TaskId, TaskRecord>,
    /// Latest task per user.
    by_user: HashMap<i64, TaskId>,
    handles: HashMap<TaskId, JoinHandle<()>>,
    observers: HashMap<TaskId, TaskObserver>,
}

struct Shared {
    registry: Mutex<Registry>,
    events: broadcast::Sender<TaskEvent>,
}

/// Schedules, tracks and cancels per-user background jobs.
#[derive(Clone)]
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOrchestrator {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                events,
            }),
        }
    }

    /// Subscribe to every task event.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }

    /// Schedule `job` for `user_id`, cancelling the user's unfinished task if any.
    pub async fn create_task<J: Job>(
        &self,
        user_id: i64,
        job: J,
        observer: Option<TaskObserver>,
    ) -> TaskId {
        self.create_boxed(user_id, Box::new(job), observer).await
    }

    pub async fn create_boxed(
        &self,
        user_id: i64,
        job: Box<dyn Job>,
        observer: Option<TaskObserver>,
    ) -> TaskId {
        let mut reg = self.shared.registry.lock().await;

        if let Some(previous) = reg.by_user.get(&user_id).copied() {
            let unfinished = reg
                .records
                .get(&previous)
                .is_some_and(|r| !r.status.is_terminal());
            if unfinished {
                info!(user_id, task_id = %previous, "Cancelling previous task for user");
                self.cancel_locked(&mut reg, previous, "superseded by a newer task");
            }
        }

        let record = TaskRecord::new(user_id, job.describe());
        let task_id = record.task_id;
        let event = TaskEvent {
            task_id,
            user_id,
            status: TaskStatus::Pending,
            message: None,
        };
        reg.records.insert(task_id, record);
        reg.by_user.insert(user_id, task_id);
        if let Some(observer) = observer {
            reg.observers.insert(task_id, observer);
        }
        self.publish_locked(&mut reg, event);

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(task_id, job).await });
        reg.handles.insert(task_id, handle);

        info!(user_id, task_id = %task_id, "Task created");
        task_id
    }

    async fn run(self, task_id: TaskId, job: Box<dyn Job>) {
        if !self.mark_running(task_id).await {
            return;
        }

        let progress = ProgressReporter::new(self.clone(), task_id);
        let outcome = AssertUnwindSafe(job.run(progress)).catch_unwind().await;

        match outcome {
            Ok(Ok(result)) => {
                self.finish(task_id, TaskStatus::Completed, Some(result), None)
                    .await
            }
            Ok(Err(e)) => {
                self.finish(task_id, TaskStatus::Failed, None, Some(format!("{e:#}")))
                    .await
            }
            Err(_) => {
                self.finish(
                    task_id,
                    TaskStatus::Failed,
                    None,
                    Some(PANIC_MESSAGE.to_string()),
                )
                .await
            }
        }
    }

    async fn mark_running(&self, task_id: TaskId) -> bool {
        let mut reg = self.shared.registry.lock().await;
        let Some(record) = reg.records.get_mut(&task_id) else {
            return false;
        };
        if !record.transition_to(TaskStatus::Running) {
            debug!(task_id = %task_id, status = %record.status, "Task not started");
            return false;
        }
        let event = TaskEvent {
            task_id,
            user_id: record.user_id,
            status: TaskStatus::Running,
            message: None,
        };
        self.publish_locked(&mut reg, event);
        true
    }

    /// Terminal transition for a job that ran to the end. Ignored if the task
    /// was cancelled in the meantime.
    async fn finish(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) {
        let mut reg = self.shared.registry.lock().await;
        reg.handles.remove(&task_id);
        let Some(record) = reg.records.get_mut(&task_id) else {
            return;
        };
        if !record.transition_to(status) {
            debug!(task_id = %task_id, status = %record.status, "Ignoring late task result");
            return;
        }
        record.result = result.clone();
        record.error = error.clone();

        match status {
            TaskStatus::Completed => info!(task_id = %task_id, user_id = record.user_id, "Task completed"),
            _ => warn!(
                task_id = %task_id,
                user_id = record.user_id,
                error = error.as_deref().unwrap_or(""),
                "Task failed"
            ),
        }

        let event = TaskEvent {
            task_id,
            user_id: record.user_id,
            status,
            message: result.or(error),
        };
        self.publish_locked(&mut reg, event);
    }

    pub(crate) async fn record_progress(&self, task_id: TaskId, message: String) {
        let mut reg = self.shared.registry.lock().await;
        let Some(record) = reg.records.get_mut(&task_id) else {
            return;
        };
        if record.status != TaskStatus::Running {
            return;
        }
        record.progress_message = Some(message.clone());
        debug!(task_id = %task_id, progress = %message, "Task progress");
        let event = TaskEvent {
            task_id,
            user_id: record.user_id,
            status: TaskStatus::Running,
            message: Some(message),
        };
        self.publish_locked(&mut reg, event);
    }

    /// Cancel an unfinished task. Returns false if unknown or already terminal.
    pub async fn cancel_task(&self, task_id: TaskId) -> bool {
        let mut reg = self.shared.registry.lock().await;
        let cancellable = reg
            .records
            .get(&task_id)
            .is_some_and(|r| !r.status.is_terminal());
        if !cancellable {
            return false;
        }
        self.cancel_locked(&mut reg, task_id, "cancelled by request");
        true
    }

    /// Cancel every unfinished task. Used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let mut reg = self.shared.registry.lock().await;
        let unfinished: Vec<TaskId> = reg
            .records
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.task_id)
            .collect();
        for task_id in &unfinished {
            self.cancel_locked(&mut reg, *task_id, "shutting down");
        }
        unfinished.len()
    }

    fn cancel_locked(&self, reg: &mut Registry, task_id: TaskId, reason: &str) {
        if let Some(handle) = reg.handles.remove(&task_id) {
            handle.abort();
        }
        let Some(record) = reg.records.get_mut(&task_id) else {
            return;
        };
        if !record.transition_to(TaskStatus::Cancelled) {
            return;
        }
        info!(task_id = %task_id, user_id = record.user_id, reason, "Task cancelled");
        let event = TaskEvent {
            task_id,
            user_id: record.user_id,
            status: TaskStatus::Cancelled,
            message: Some(reason.to_string()),
        };
        self.publish_locked(reg, event);
    }

    /// Deliver to the task's observer and the broadcast channel. Observers are
    /// dropped after the terminal event.
    fn publish_locked(&self, reg: &mut Registry, event: TaskEvent) {
        if event.is_terminal() {
            if let Some(observer) = reg.observers.remove(&event.task_id) {
                let _ = observer.send(event.clone());
            }
        } else if let Some(observer) = reg.observers.get(&event.task_id) {
            let _ = observer.send(event.clone());
        }
        // Ok if nobody is subscribed.
        let _ = self.shared.events.send(event);
    }

    pub async fn get_task_info(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.shared
            .registry
            .lock()
            .await
            .records
            .get(&task_id)
            .cloned()
    }

    /// The user's most recent task, finished or not.
    pub async fn get_user_task(&self, user_id: i64) -> Option<TaskRecord> {
        let reg = self.shared.registry.lock().await;
        let task_id = reg.by_user.get(&user_id)?;
        reg.records.get(task_id).cloned()
    }

    /// Remove terminal tasks that finished at least `max_age` ago.
    /// Returns the number removed. Unfinished tasks are never touched.
    pub async fn cleanup_completed_tasks(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut reg = self.shared.registry.lock().await;
        let before = reg.records.len();
        reg.records.retain(|_, r| {
            !(r.status.is_terminal() && r.completed_at.is_some_and(|done| done <= cutoff))
        });
        let removed = before - reg.records.len();

        if removed > 0 {
            let Registry {
                records, by_user, ..
            } = &mut *reg;
            by_user.retain(|_, task_id| records.contains_key(task_id));
            info!(count = removed, "Cleaned up finished tasks");
        }
        removed
    }

    pub async fn get_stats(&self) -> TaskStats {
        let reg = self.shared.registry.lock().await;
        let mut stats = TaskStats::default();
        for record in reg.records.values() {
            stats.record(record.status);
        }
        stats
    }
}

/// Spawn a background task that periodically drops old finished tasks.
pub fn spawn_cleanup_task(
    orchestrator: TaskOrchestrator,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            orchestrator.cleanup_completed_tasks(retention).await;
        }
    })
}
