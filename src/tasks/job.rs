//! The unit of background work scheduled by the orchestrator.

use std::future::Future;

use async_trait::async_trait;

use super::orchestrator::TaskOrchestrator;
use super::record::TaskId;

/// Background work tied to one user.
///
/// Closures `FnOnce(ProgressReporter) -> impl Future<Output = anyhow::Result<String>>`
/// implement this automatically.
#[async_trait]
pub trait Job: Send + 'static {
    /// Short label stored on the task record.
    fn describe(&self) -> String {
        "background job".to_string()
    }

    /// Run to completion. The returned string becomes the task result.
    async fn run(self: Box<Self>, progress: ProgressReporter) -> anyhow::Result<String>;
}

#[async_trait]
impl<F, Fut> Job for F
where
    F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn run(self: Box<Self>, progress: ProgressReporter) -> anyhow::Result<String> {
        (*self)(progress).await
    }
}

/// Handle a running job uses to publish intermediate progress.
#[derive(Clone)]
pub struct ProgressReporter {
    orchestrator: TaskOrchestrator,
    task_id: TaskId,
}

impl ProgressReporter {
    pub(crate) fn new(orchestrator: TaskOrchestrator, task_id: TaskId) -> Self {
        Self {
            orchestrator,
            task_id,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Record a progress message and notify observers.
    pub async fn report(&self, message: impl Into<String>) {
        self.orchestrator
            .record_progress(self.task_id, message.into())
            .await;
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}
