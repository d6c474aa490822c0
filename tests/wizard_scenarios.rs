//! End-to-end wizard scenarios: engine, session store, commit handoff and the
//! task orchestrator wired together with in-memory collaborators.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use weekly_report_bot::commit::CommitHandoff;
use weekly_report_bot::error::{AnalysisError, ChannelError, DatabaseError};
use weekly_report_bot::gateway::{AnalysisGateway, NotificationGateway, PersistenceGateway};
use weekly_report_bot::report::Submission;
use weekly_report_bot::tasks::{ProgressReporter, TaskEvent, TaskOrchestrator, TaskStatus};
use weekly_report_bot::wizard::flows::{department, report};
use weekly_report_bot::wizard::{
    ControlEvent, FlowKind, Outcome, SessionStore, StateId, WizardEngine, WizardEvent,
    department_flow, weekly_report_flow,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const USER: i64 = 42;

// ── Stub collaborators ──────────────────────────────────────────────

#[derive(Default)]
struct MemoryPersistence {
    next_id: AtomicI64,
    failing: AtomicBool,
    saved: Mutex<Vec<Submission>>,
}

#[async_trait]
impl PersistenceGateway for MemoryPersistence {
    async fn save(&self, submission: &Submission) -> Result<i64, DatabaseError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("database is locked".into()));
        }
        self.saved.lock().unwrap().push(submission.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn attach_analysis(&self, _record_id: i64, _analysis: &str) -> Result<(), DatabaseError> {
        Ok(())
    }
}

struct StubAnalysis;

#[async_trait]
impl AnalysisGateway for StubAnalysis {
    async fn analyze(&self, _submission: &Submission) -> Result<String, AnalysisError> {
        Ok("steady progress".into())
    }
}

struct StubNotifier;

#[async_trait]
impl NotificationGateway for StubNotifier {
    async fn deliver(
        &self,
        _submission: &Submission,
        _analysis: Option<&str>,
    ) -> Result<bool, ChannelError> {
        Ok(true)
    }
}

struct Harness {
    engine: WizardEngine,
    sessions: Arc<SessionStore>,
    persistence: Arc<MemoryPersistence>,
    orchestrator: TaskOrchestrator,
    events: mpsc::UnboundedReceiver<TaskEvent>,
}

fn harness() -> Harness {
    let persistence = Arc::new(MemoryPersistence::default());
    let orchestrator = TaskOrchestrator::new();
    let (tx, events) = mpsc::unbounded_channel();
    let handoff = CommitHandoff::new(
        persistence.clone(),
        Arc::new(StubAnalysis),
        Arc::new(StubNotifier),
        orchestrator.clone(),
    )
    .with_observer(tx);
    let sessions = SessionStore::new();
    let engine = WizardEngine::new(sessions.clone(), Arc::new(handoff))
        .with_flow(weekly_report_flow(10).unwrap())
        .with_flow(department_flow().unwrap());
    Harness {
        engine,
        sessions,
        persistence,
        orchestrator,
        events,
    }
}

fn text(s: &str) -> WizardEvent {
    WizardEvent::Text(s.to_string())
}

fn control(event: ControlEvent) -> WizardEvent {
    WizardEvent::Control(event)
}

const ANSWERS: [&str; 4] = [
    "Migrated the billing service",
    "Halved invoice generation time",
    "Staging database keeps timing out",
    "Roll the migration out to production",
];

async fn fill_report(h: &Harness) {
    h.engine
        .start(USER, Some("Ann".into()), FlowKind::WeeklyReport)
        .await
        .unwrap();
    for answer in ANSWERS {
        let outcome = h.engine.advance(USER, text(answer)).await.unwrap();
        assert!(matches!(outcome, Outcome::Prompt(_)), "{answer} was rejected");
    }
}

/// Collapse runs of the same status.
fn status_path(events: &[TaskEvent]) -> Vec<TaskStatus> {
    let mut path: Vec<TaskStatus> = Vec::new();
    for event in events {
        if path.last() != Some(&event.status) {
            path.push(event.status);
        }
    }
    path
}

async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = event.is_terminal();
        events.push(event);
        if done {
            break;
        }
    }
    events
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_report_commits_and_task_completes() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness();
        fill_report(&h).await;

        let session = h.sessions.get(USER).await.unwrap();
        assert_eq!(session.current_state, StateId::CONFIRM);
        assert_eq!(session.field_buffer.provided().len(), 4);

        let outcome = h
            .engine
            .advance(USER, control(ControlEvent::Confirm))
            .await
            .unwrap();
        let Outcome::Committed { task_id, .. } = outcome else {
            panic!("expected commit, got {outcome:?}");
        };
        assert!(h.sessions.get(USER).await.is_none());

        let events = until_terminal(&mut h.events).await;
        assert_eq!(
            status_path(&events),
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Completed]
        );
        assert!(events.iter().all(|e| e.task_id == task_id));

        let record = h.orchestrator.get_task_info(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.user_id, USER);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn scenario_b_short_answer_is_rejected_in_place() {
    let h = harness();
    h.engine
        .start(USER, None, FlowKind::WeeklyReport)
        .await
        .unwrap();
    h.engine.advance(USER, text(ANSWERS[0])).await.unwrap();

    let outcome = h.engine.advance(USER, text("short")).await.unwrap();
    let Outcome::Rejected { render, .. } = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert!(render.text.starts_with("⚠️"));
    assert!(render.text.contains("2/4"));

    let session = h.sessions.get(USER).await.unwrap();
    assert_eq!(session.current_state, report::ACHIEVEMENTS);
    assert_eq!(session.field_buffer.len(), 1);
    assert!(!session.field_buffer.contains(report::ACHIEVEMENTS));
}

#[tokio::test]
async fn scenario_c_department_with_skipped_description() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness();
        h.engine
            .start(USER, Some("Admin".into()), FlowKind::Department)
            .await
            .unwrap();
        h.engine.advance(USER, text("ops")).await.unwrap();
        h.engine.advance(USER, text("Operations")).await.unwrap();
        h.engine
            .advance(USER, control(ControlEvent::Next))
            .await
            .unwrap();
        h.engine.advance(USER, text("@boss")).await.unwrap();

        let session = h.sessions.get(USER).await.unwrap();
        assert_eq!(session.current_state, StateId::CONFIRM);
        assert_eq!(session.field_buffer.get(department::DESCRIPTION), Some(None));
        assert_eq!(session.field_buffer.value(department::CODE), Some("OPS"));
        assert_eq!(
            session.field_buffer.provided(),
            vec![department::CODE, department::NAME, department::HEAD]
        );

        let outcome = h
            .engine
            .advance(USER, control(ControlEvent::Confirm))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Committed { .. }));

        let saved = h.persistence.saved.lock().unwrap().clone();
        let [Submission::Department(dept)] = saved.as_slice() else {
            panic!("expected one department, got {saved:?}");
        };
        assert_eq!(dept.code, "OPS");
        assert_eq!(dept.description, None);
        assert_eq!(dept.head.as_deref(), Some("@boss"));

        let events = until_terminal(&mut h.events).await;
        assert_eq!(events.last().unwrap().status, TaskStatus::Completed);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn scenario_d_persistence_failure_keeps_session_for_retry() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        fill_report(&h).await;
        h.persistence.failing.store(true, Ordering::SeqCst);

        let outcome = h
            .engine
            .advance(USER, control(ControlEvent::Confirm))
            .await
            .unwrap();
        let Outcome::CommitFailed { render, .. } = outcome else {
            panic!("expected commit failure, got {outcome:?}");
        };
        assert!(render.text.contains("Could not save"));

        let session = h.sessions.get(USER).await.unwrap();
        assert_eq!(session.current_state, StateId::CONFIRM);
        assert!(session.last_error.is_some());
        assert_eq!(h.orchestrator.get_stats().await.total, 0);

        h.persistence.failing.store(false, Ordering::SeqCst);
        let outcome = h
            .engine
            .advance(USER, control(ControlEvent::Confirm))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Committed { .. }));
        assert!(h.sessions.get(USER).await.is_none());
        assert_eq!(h.orchestrator.get_stats().await.total, 1);
    })
    .await
    .expect("test timed out");
}

// ── Properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn back_then_new_value_overwrites() {
    let h = harness();
    h.engine
        .start(USER, None, FlowKind::WeeklyReport)
        .await
        .unwrap();
    h.engine.advance(USER, text(ANSWERS[0])).await.unwrap();
    h.engine.advance(USER, text(ANSWERS[1])).await.unwrap();
    let before = h.sessions.get(USER).await.unwrap().field_buffer.len();

    let outcome = h
        .engine
        .advance(USER, control(ControlEvent::Back))
        .await
        .unwrap();
    assert!(outcome.render().text.contains(ANSWERS[1]));

    h.engine
        .advance(USER, text("Something else entirely"))
        .await
        .unwrap();
    let session = h.sessions.get(USER).await.unwrap();
    assert_eq!(session.field_buffer.len(), before);
    assert_eq!(
        session.field_buffer.value(report::ACHIEVEMENTS),
        Some("Something else entirely")
    );
    assert_eq!(session.current_state, report::PROBLEMS);
}

#[tokio::test]
async fn cancel_from_every_reachable_state_clears_session() {
    for answered in 0..=ANSWERS.len() {
        let h = harness();
        h.engine
            .start(USER, None, FlowKind::WeeklyReport)
            .await
            .unwrap();
        for answer in &ANSWERS[..answered] {
            h.engine.advance(USER, text(answer)).await.unwrap();
        }

        let outcome = h
            .engine
            .advance(USER, control(ControlEvent::Cancel))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Cancelled(_)));
        assert!(h.sessions.get(USER).await.is_none(), "after {answered} answers");
        assert_eq!(h.orchestrator.get_stats().await.total, 0);
    }
}

#[tokio::test]
async fn cancel_from_optional_and_edited_states_clears_session() {
    let skip = || control(ControlEvent::Next);
    let cases: Vec<(FlowKind, Vec<WizardEvent>, StateId)> = vec![
        (FlowKind::Department, vec![], department::CODE),
        (FlowKind::Department, vec![text("ops")], department::NAME),
        (
            FlowKind::Department,
            vec![text("ops"), text("Operations")],
            department::DESCRIPTION,
        ),
        (
            FlowKind::Department,
            vec![text("ops"), text("Operations"), skip()],
            department::HEAD,
        ),
        (
            FlowKind::Department,
            vec![text("ops"), text("Operations"), text("Runs the infrastructure")],
            department::HEAD,
        ),
        (
            FlowKind::Department,
            vec![text("ops"), text("Operations"), skip(), skip()],
            StateId::CONFIRM,
        ),
        (
            FlowKind::Department,
            vec![
                text("ops"),
                text("Operations"),
                skip(),
                skip(),
                control(ControlEvent::Edit(department::NAME)),
            ],
            department::NAME,
        ),
        (
            FlowKind::WeeklyReport,
            ANSWERS
                .iter()
                .map(|a| text(a))
                .chain([control(ControlEvent::Edit(report::PROBLEMS))])
                .collect(),
            report::PROBLEMS,
        ),
    ];

    for (kind, path, expected) in cases {
        let h = harness();
        h.engine.start(USER, None, kind).await.unwrap();
        for event in path {
            h.engine.advance(USER, event).await.unwrap();
        }
        let session = h.sessions.get(USER).await.unwrap();
        assert_eq!(session.current_state, expected);

        let outcome = h
            .engine
            .advance(USER, control(ControlEvent::Cancel))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Cancelled(_)), "at {expected}");
        assert!(h.sessions.get(USER).await.is_none(), "at {expected}");
        assert!(h.persistence.saved.lock().unwrap().is_empty());
        assert_eq!(h.orchestrator.get_stats().await.total, 0);
    }
}

#[tokio::test]
async fn skip_on_mandatory_step_is_rejected() {
    let h = harness();
    h.engine
        .start(USER, None, FlowKind::WeeklyReport)
        .await
        .unwrap();
    let outcome = h
        .engine
        .advance(USER, control(ControlEvent::Next))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected { .. }));
    let session = h.sessions.get(USER).await.unwrap();
    assert_eq!(session.current_state, report::TASKS);
    assert!(session.field_buffer.is_empty());
}

#[tokio::test]
async fn edit_from_summary_returns_to_summary() {
    let h = harness();
    fill_report(&h).await;

    h.engine
        .advance(USER, control(ControlEvent::Edit(report::TASKS)))
        .await
        .unwrap();
    assert_eq!(
        h.sessions.get(USER).await.unwrap().current_state,
        report::TASKS
    );

    h.engine
        .advance(USER, text("Rewrote the billing service"))
        .await
        .unwrap();
    let session = h.sessions.get(USER).await.unwrap();
    assert_eq!(session.current_state, StateId::CONFIRM);
    assert_eq!(session.field_buffer.len(), 4);
    assert_eq!(session.field_buffer.value(report::PLANS), Some(ANSWERS[3]));
}

#[tokio::test]
async fn second_task_cancels_the_first() {
    timeout(TEST_TIMEOUT, async {
        let orchestrator = TaskOrchestrator::new();
        let (tx, mut first_events) = mpsc::unbounded_channel();

        let first = orchestrator
            .create_task(
                USER,
                |_: ProgressReporter| async move {
                    std::future::pending::<()>().await;
                    anyhow::Ok(String::new())
                },
                Some(tx),
            )
            .await;
        let second = orchestrator
            .create_task(
                USER,
                |_: ProgressReporter| async move {
                    std::future::pending::<()>().await;
                    anyhow::Ok(String::new())
                },
                None,
            )
            .await;

        let events = until_terminal(&mut first_events).await;
        assert_eq!(events.last().unwrap().status, TaskStatus::Cancelled);

        let first = orchestrator.get_task_info(first).await.unwrap();
        assert_eq!(first.status, TaskStatus::Cancelled);
        let current = orchestrator.get_user_task(USER).await.unwrap();
        assert_eq!(current.task_id, second);
        assert!(!current.status.is_terminal());

        let stats = orchestrator.get_stats().await;
        assert_eq!(stats.pending + stats.running, 1);
        assert_eq!(stats.cancelled, 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cleanup_with_zero_age_keeps_unfinished_tasks() {
    timeout(TEST_TIMEOUT, async {
        let orchestrator = TaskOrchestrator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let finished = orchestrator
            .create_task(
                1,
                |_: ProgressReporter| async move { anyhow::Ok("ok".to_string()) },
                Some(tx),
            )
            .await;
        until_terminal(&mut rx).await;

        let running = orchestrator
            .create_task(
                2,
                |_: ProgressReporter| async move {
                    std::future::pending::<()>().await;
                    anyhow::Ok(String::new())
                },
                None,
            )
            .await;

        assert_eq!(orchestrator.cleanup_completed_tasks(Duration::ZERO).await, 1);
        assert!(orchestrator.get_task_info(finished).await.is_none());
        assert!(orchestrator.get_task_info(running).await.is_some());

        // A cancelled task cannot be cancelled again.
        assert!(orchestrator.cancel_task(running).await);
        assert!(!orchestrator.cancel_task(running).await);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_on_completed_task_is_a_no_op() {
    timeout(TEST_TIMEOUT, async {
        let orchestrator = TaskOrchestrator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task_id = orchestrator
            .create_task(
                1,
                |_: ProgressReporter| async move { anyhow::Ok("ok".to_string()) },
                Some(tx),
            )
            .await;
        until_terminal(&mut rx).await;

        assert!(!orchestrator.cancel_task(task_id).await);
        let record = orchestrator.get_task_info(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    })
    .await
    .expect("test timed out");
}
