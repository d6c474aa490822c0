//! Wizard engine — table-driven transitions over per-user sessions.
//!
//! [`transition`] is a pure function from `(table, session, event)` to the
//! next session. [`WizardEngine`] wraps it: it loads the session from the
//! store, writes the result back, renders the prompt, and on confirmation
//! hands the buffer to [`CommitHandoff`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::commit::CommitHandoff;
use crate::error::WizardError;
use crate::report::Submitter;
use crate::tasks::TaskId;

use super::confirm::ConfirmationGate;
use super::flows::FlowKind;
use super::session::{SessionStore, WizardSession};
use super::step::{ControlEvent, Edge, StateId, StepTable};

/// A button offered alongside a prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOption {
    pub label: String,
    pub event: ControlEvent,
}

impl ControlOption {
    pub fn new(label: impl Into<String>, event: ControlEvent) -> Self {
        Self {
            label: label.into(),
            event,
        }
    }
}

/// Outbound render consumed by the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Render {
    pub text: String,
    pub options: Vec<ControlOption>,
}

impl Render {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: Vec::new(),
        }
    }

    /// Prefix the render with an error line.
    pub fn annotate(mut self, error: &str) -> Self {
        self.text = format!("⚠️ {error}\n\n{}", self.text);
        self
    }
}

/// Inbound wizard event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEvent {
    Text(String),
    Control(ControlEvent),
}

/// Result of feeding one event to the engine.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The session moved (or re-rendered); show the new prompt.
    Prompt(Render),
    /// Invalid input or illegal control event; the session is unchanged.
    Rejected { reason: String, render: Render },
    /// Session destroyed, nothing scheduled.
    Cancelled(Render),
    /// Session destroyed, record saved and background task scheduled.
    Committed {
        record_id: i64,
        task_id: TaskId,
        render: Render,
    },
    /// Persistence failed; the session stays on the confirmation state.
    CommitFailed { reason: String, render: Render },
}

impl Outcome {
    pub fn render(&self) -> &Render {
        match self {
            Self::Prompt(render) | Self::Cancelled(render) => render,
            Self::Rejected { render, .. }
            | Self::Committed { render, .. }
            | Self::CommitFailed { render, .. } => render,
        }
    }

    /// Whether the session no longer exists after this outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Committed { .. })
    }
}

/// Result of the pure transition function.
#[derive(Debug, Clone)]
pub enum Transition {
    Advanced(WizardSession),
    Rejected(String),
    Cancelled,
    ConfirmRequested,
}

/// Compute the next session for `event`. Never touches the input session.
pub fn transition(table: &StepTable, session: &WizardSession, event: &WizardEvent) -> Transition {
    let state = session.current_state;
    let at_confirm = state == StateId::CONFIRM;

    match event {
        WizardEvent::Control(ControlEvent::Cancel) => Transition::Cancelled,

        WizardEvent::Control(ControlEvent::Confirm) => {
            if at_confirm {
                Transition::ConfirmRequested
            } else {
                Transition::Rejected("Confirmation is only available on the summary step.".into())
            }
        }

        WizardEvent::Control(ControlEvent::Back) => {
            let mut next = session.clone();
            match next.pop_state() {
                Some(previous) => {
                    if previous == StateId::CONFIRM {
                        next.return_to_confirm = false;
                    }
                    next.last_error = None;
                    Transition::Advanced(next)
                }
                None => Transition::Rejected("You are already at the first step.".into()),
            }
        }

        WizardEvent::Control(ControlEvent::Edit(target)) => {
            if !at_confirm {
                return Transition::Rejected("Fields can only be edited from the summary.".into());
            }
            if table.get(*target).is_none() || !ConfirmationGate::editable(session, *target) {
                return Transition::Rejected(format!("Step {target} cannot be edited."));
            }
            let mut next = session.clone();
            next.push_state(*target);
            next.return_to_confirm = true;
            next.last_error = None;
            Transition::Advanced(next)
        }

        WizardEvent::Control(ControlEvent::Next) => {
            let Some(step) = table.get(state) else {
                return Transition::Rejected("There is nothing to skip here.".into());
            };
            if !step.optional {
                return Transition::Rejected("This step is required and cannot be skipped.".into());
            }
            let Some(target) = step.target(Edge::Skip) else {
                return Transition::Rejected("This step cannot be skipped.".into());
            };
            Transition::Advanced(accept(session, state, None, target))
        }

        WizardEvent::Text(raw) => {
            let Some(step) = table.get(state) else {
                return Transition::Rejected(
                    "Please use the buttons below to confirm, edit or cancel.".into(),
                );
            };
            let value = match step.validate(raw) {
                Ok(value) => value,
                Err(reason) => return Transition::Rejected(reason),
            };
            let Some(target) = step.target(Edge::Submit) else {
                return Transition::Rejected("This step has no next step.".into());
            };
            Transition::Advanced(accept(session, state, Some(value), target))
        }
    }
}

/// Record a value (or skip marker) and move forward.
fn accept(
    session: &WizardSession,
    field: StateId,
    value: Option<String>,
    target: StateId,
) -> WizardSession {
    let mut next = session.clone();
    next.update_buffer(field, value);
    let target = if next.return_to_confirm {
        StateId::CONFIRM
    } else {
        target
    };
    if target == StateId::CONFIRM {
        next.return_to_confirm = false;
    }
    next.push_state(target);
    next.last_error = None;
    next
}

/// Render the prompt for the session's current state.
pub fn render_state(table: &StepTable, session: &WizardSession) -> Render {
    if session.current_state == StateId::CONFIRM {
        let render = ConfirmationGate::render(table, session);
        return match &session.last_error {
            Some(error) => render.annotate(error),
            None => render,
        };
    }

    let Some(step) = table.get(session.current_state) else {
        return Render::text("This step no longer exists. Send /cancel to start over.");
    };

    let mut text = step.prompt.to_string();
    match session.field_buffer.get(step.state) {
        Some(Some(current)) => text.push_str(&format!("\n\nCurrent answer: {current}")),
        Some(None) => text.push_str("\n\nCurrently skipped."),
        None => {}
    }

    let mut options = Vec::new();
    if step.optional {
        options.push(ControlOption::new("⏭ Skip", ControlEvent::Next));
    }
    if session.can_go_back() {
        options.push(ControlOption::new("⬅️ Back", ControlEvent::Back));
    }
    options.push(ControlOption::new("❌ Cancel", ControlEvent::Cancel));

    Render { text, options }
}

/// Drives wizard sessions for every registered flow.
pub struct WizardEngine {
    store: Arc<SessionStore>,
    flows: HashMap<FlowKind, Arc<StepTable>>,
    handoff: Arc<CommitHandoff>,
}

impl WizardEngine {
    pub fn new(store: Arc<SessionStore>, handoff: Arc<CommitHandoff>) -> Self {
        Self {
            store,
            flows: HashMap::new(),
            handoff,
        }
    }

    /// Register a flow's step table.
    pub fn with_flow(mut self, table: StepTable) -> Self {
        self.flows.insert(table.kind(), Arc::new(table));
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn table(&self, kind: FlowKind) -> Option<&Arc<StepTable>> {
        self.flows.get(&kind)
    }

    fn table_for(&self, kind: FlowKind) -> Result<Arc<StepTable>, WizardError> {
        self.flows
            .get(&kind)
            .cloned()
            .ok_or_else(|| WizardError::UnknownState {
                flow: kind.to_string(),
                state: "entry".to_string(),
            })
    }

    /// Begin a flow, discarding any session the user already had.
    pub async fn start(
        &self,
        user_id: i64,
        display_name: Option<String>,
        kind: FlowKind,
    ) -> Result<Render, WizardError> {
        let table = self.table_for(kind)?;
        if self.store.clear(user_id).await {
            info!(user_id, flow = %kind, "Discarded unfinished session to start a new one");
        }
        let session = self
            .store
            .create(user_id, display_name, kind, table.entry())
            .await?;
        Ok(render_state(&table, &session))
    }

    /// Whether the user currently has a session.
    pub async fn is_active(&self, user_id: i64) -> bool {
        self.store.get(user_id).await.is_some()
    }

    /// Re-render the current prompt, if any.
    pub async fn current_render(&self, user_id: i64) -> Option<Render> {
        let session = self.store.get(user_id).await?;
        let table = self.flows.get(&session.flow)?;
        Some(render_state(table, &session))
    }

    /// Decode callback data against the user's active flow.
    pub async fn parse_control(&self, user_id: i64, data: &str) -> Option<ControlEvent> {
        let session = self.store.get(user_id).await?;
        self.flows.get(&session.flow)?.parse_control(data)
    }

    /// Apply one event to the user's session.
    pub async fn advance(&self, user_id: i64, event: WizardEvent) -> Result<Outcome, WizardError> {
        let session = self
            .store
            .get(user_id)
            .await
            .ok_or(WizardError::NoSession { user_id })?;
        let table = self.table_for(session.flow)?;

        match transition(&table, &session, &event) {
            Transition::Advanced(next) => {
                debug!(
                    user_id,
                    from = %session.current_state,
                    to = %next.current_state,
                    "Wizard advanced"
                );
                let render = render_state(&table, &next);
                self.store.replace(next).await?;
                Ok(Outcome::Prompt(render))
            }
            Transition::Rejected(reason) => {
                debug!(user_id, state = %session.current_state, %reason, "Wizard event rejected");
                let render = render_state(&table, &session).annotate(&reason);
                Ok(Outcome::Rejected { reason, render })
            }
            Transition::Cancelled => {
                self.store.clear(user_id).await;
                info!(user_id, flow = %session.flow, "Wizard cancelled");
                Ok(Outcome::Cancelled(Render::text(
                    "Cancelled. Nothing was saved.",
                )))
            }
            Transition::ConfirmRequested => self.commit(&table, session).await,
        }
    }

    async fn commit(
        &self,
        table: &StepTable,
        session: WizardSession,
    ) -> Result<Outcome, WizardError> {
        let user_id = session.user_id;
        let submitter = Submitter {
            user_id,
            display_name: session.display_name.clone(),
        };

        match self
            .handoff
            .commit(table.kind(), &submitter, &session.field_buffer)
            .await
        {
            Ok(receipt) => {
                self.store.clear(user_id).await;
                info!(
                    user_id,
                    flow = %table.kind(),
                    record_id = receipt.record_id,
                    task_id = %receipt.task_id,
                    "Wizard committed"
                );
                Ok(Outcome::Committed {
                    record_id: receipt.record_id,
                    task_id: receipt.task_id,
                    render: Render::text(format!(
                        "✅ {} saved. Processing has started; I'll let you know when it's done.",
                        table.kind().title()
                    )),
                })
            }
            Err(e) => {
                warn!(user_id, flow = %table.kind(), error = %e, "Commit failed");
                let reason = format!("Could not save: {e}. Please try confirming again.");
                let updated = self
                    .store
                    .update(user_id, |s| {
                        s.last_error = Some(reason.clone());
                        s.clone()
                    })
                    .await?;
                Ok(Outcome::CommitFailed {
                    render: render_state(table, &updated),
                    reason,
                })
            }
        }
    }
}
