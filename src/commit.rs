//! Commit handoff — persist a confirmed wizard, then schedule the follow-up job.
//!
//! Persistence runs synchronously so a failure can be reported back to the
//! wizard. Analysis and notification run in a background task whose outcome
//! is only visible through task events.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::CommitError;
use crate::gateway::{AnalysisGateway, NotificationGateway, PersistenceGateway};
use crate::report::{Submission, Submitter};
use crate::tasks::{Job, ProgressReporter, TaskId, TaskObserver, TaskOrchestrator};
use crate::wizard::{FieldBuffer, FlowKind};

/// Annotation used when the analysis service cannot be reached.
pub const ANALYSIS_PLACEHOLDER: &str = "AI analysis is currently unavailable.";

/// What a successful commit produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub record_id: i64,
    pub task_id: TaskId,
}

/// Turns a confirmed field buffer into a stored record and a background task.
pub struct CommitHandoff {
    persistence: Arc<dyn PersistenceGateway>,
    analysis: Arc<dyn AnalysisGateway>,
    notifier: Arc<dyn NotificationGateway>,
    orchestrator: TaskOrchestrator,
    observer: Option<TaskObserver>,
}

impl CommitHandoff {
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        analysis: Arc<dyn AnalysisGateway>,
        notifier: Arc<dyn NotificationGateway>,
        orchestrator: TaskOrchestrator,
    ) -> Self {
        Self {
            persistence,
            analysis,
            notifier,
            orchestrator,
            observer: None,
        }
    }

    /// Send every scheduled task's events to `observer` as well.
    pub fn with_observer(mut self, observer: TaskObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub async fn commit(
        &self,
        kind: FlowKind,
        submitter: &Submitter,
        buffer: &FieldBuffer,
    ) -> Result<CommitReceipt, CommitError> {
        let submission = Submission::from_buffer(kind, submitter, buffer)?;
        let record_id = self.persistence.save(&submission).await?;
        info!(user_id = submitter.user_id, flow = %kind, record_id, "Submission saved");

        let job = SubmissionJob {
            record_id,
            submission,
            persistence: Arc::clone(&self.persistence),
            analysis: Arc::clone(&self.analysis),
            notifier: Arc::clone(&self.notifier),
        };
        let task_id = self
            .orchestrator
            .create_task(submitter.user_id, job, self.observer.clone())
            .await;

        Ok(CommitReceipt { record_id, task_id })
    }
}

/// Background follow-up for a saved submission.
struct SubmissionJob {
    record_id: i64,
    submission: Submission,
    persistence: Arc<dyn PersistenceGateway>,
    analysis: Arc<dyn AnalysisGateway>,
    notifier: Arc<dyn NotificationGateway>,
}

#[async_trait]
impl Job for SubmissionJob {
    fn describe(&self) -> String {
        format!("{} #{}", self.submission.kind(), self.record_id)
    }

    async fn run(self: Box<Self>, progress: ProgressReporter) -> anyhow::Result<String> {
        let analysis = if self.submission.wants_analysis() {
            progress.report("Analyzing report").await;
            let text = match self.analysis.analyze(&self.submission).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(record_id = self.record_id, error = %e, "Analysis unavailable, using placeholder");
                    ANALYSIS_PLACEHOLDER.to_string()
                }
            };
            self.persistence
                .attach_analysis(self.record_id, &text)
                .await?;
            Some(text)
        } else {
            None
        };

        progress.report("Delivering report").await;
        let delivered = self
            .notifier
            .deliver(&self.submission, analysis.as_deref())
            .await?;
        if !delivered {
            bail!("notification was not delivered");
        }

        Ok(format!(
            "{} #{} processed",
            self.submission.kind().title(),
            self.record_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    use tokio::sync::mpsc;

    use crate::error::{AnalysisError, ChannelError, DatabaseError};
    use crate::tasks::{TaskEvent, TaskStatus};
    use crate::wizard::flows::report;

    #[derive(Default)]
    struct MemoryStore {
        next_id: AtomicI64,
        fail: AtomicBool,
        analyses: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl PersistenceGateway for MemoryStore {
        async fn save(&self, _submission: &Submission) -> Result<i64, DatabaseError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DatabaseError::Query("disk full".into()));
            }
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn attach_analysis(&self, record_id: i64, analysis: &str) -> Result<(), DatabaseError> {
            self.analyses
                .lock()
                .unwrap()
                .push((record_id, analysis.to_string()));
            Ok(())
        }
    }

    struct Analysis(bool);

    #[async_trait]
    impl AnalysisGateway for Analysis {
        async fn analyze(&self, _submission: &Submission) -> Result<String, AnalysisError> {
            if self.0 {
                Ok("solid week".into())
            } else {
                Err(AnalysisError::Unavailable)
            }
        }
    }

    struct Notifier(bool);

    #[async_trait]
    impl NotificationGateway for Notifier {
        async fn deliver(
            &self,
            _submission: &Submission,
            _analysis: Option<&str>,
        ) -> Result<bool, ChannelError> {
            Ok(self.0)
        }
    }

    fn buffer() -> FieldBuffer {
        let mut buffer = FieldBuffer::default();
        for field in [report::TASKS, report::ACHIEVEMENTS, report::PROBLEMS, report::PLANS] {
            buffer.set(field, Some(format!("{field} answer")));
        }
        buffer
    }

    fn submitter() -> Submitter {
        Submitter {
            user_id: 5,
            display_name: None,
        }
    }

    async fn last_event(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> TaskEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.is_terminal() {
                return event;
            }
        }
    }

    fn handoff(
        store: Arc<MemoryStore>,
        analysis_ok: bool,
        delivered: bool,
    ) -> (CommitHandoff, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handoff = CommitHandoff::new(
            store,
            Arc::new(Analysis(analysis_ok)),
            Arc::new(Notifier(delivered)),
            TaskOrchestrator::new(),
        )
        .with_observer(tx);
        (handoff, rx)
    }

    #[tokio::test]
    async fn commit_saves_and_schedules() {
        let store = Arc::new(MemoryStore::default());
        let (handoff, mut rx) = handoff(store.clone(), true, true);

        let receipt = handoff
            .commit(FlowKind::WeeklyReport, &submitter(), &buffer())
            .await
            .unwrap();
        assert_eq!(receipt.record_id, 1);

        let event = last_event(&mut rx).await;
        assert_eq!(event.task_id, receipt.task_id);
        assert_eq!(event.status, TaskStatus::Completed);
        assert_eq!(
            store.analyses.lock().unwrap().as_slice(),
            &[(1, "solid week".to_string())]
        );
    }

    #[tokio::test]
    async fn analysis_outage_uses_placeholder() {
        let store = Arc::new(MemoryStore::default());
        let (handoff, mut rx) = handoff(store.clone(), false, true);

        handoff
            .commit(FlowKind::WeeklyReport, &submitter(), &buffer())
            .await
            .unwrap();

        assert_eq!(last_event(&mut rx).await.status, TaskStatus::Completed);
        assert_eq!(store.analyses.lock().unwrap()[0].1, ANALYSIS_PLACEHOLDER);
    }

    #[tokio::test]
    async fn undelivered_notification_fails_task() {
        let store = Arc::new(MemoryStore::default());
        let (handoff, mut rx) = handoff(store, true, false);

        handoff
            .commit(FlowKind::WeeklyReport, &submitter(), &buffer())
            .await
            .unwrap();

        let event = last_event(&mut rx).await;
        assert_eq!(event.status, TaskStatus::Failed);
        assert_eq!(event.message.as_deref(), Some("notification was not delivered"));
    }

    #[tokio::test]
    async fn persistence_failure_schedules_nothing() {
        let store = Arc::new(MemoryStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let (handoff, _rx) = handoff(store, true, true);

        let err = handoff
            .commit(FlowKind::WeeklyReport, &submitter(), &buffer())
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::Persistence(_)));
        assert!(handoff.orchestrator().get_user_task(5).await.is_none());
        assert_eq!(handoff.orchestrator().get_stats().await.total, 0);
    }
}
