//! Per-user wizard sessions and the store that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::WizardError;

use super::flows::FlowKind;
use super::step::StateId;

/// Ordered field values. Writes overwrite by field; `None` marks a skipped step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldBuffer {
    entries: Vec<(StateId, Option<String>)>,
}

impl FieldBuffer {
    pub fn set(&mut self, field: StateId, value: Option<String>) {
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    /// `Some(None)` when the field was skipped, `None` when never visited.
    pub fn get(&self, field: StateId) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_deref())
    }

    /// The recorded value, flattening "skipped" and "never visited".
    pub fn value(&self, field: StateId) -> Option<&str> {
        self.get(field).flatten()
    }

    pub fn contains(&self, field: StateId) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateId, Option<&str>)> {
        self.entries.iter().map(|(f, v)| (*f, v.as_deref()))
    }

    /// Fields holding an actual value, in entry order.
    pub fn provided(&self) -> Vec<StateId> {
        self.entries
            .iter()
            .filter(|(_, v)| v.is_some())
            .map(|(f, _)| *f)
            .collect()
    }
}

/// Transient state of one user's in-progress wizard.
#[derive(Debug, Clone, Serialize)]
pub struct WizardSession {
    pub user_id: i64,
    /// Display name captured at wizard entry.
    pub display_name: Option<String>,
    pub flow: FlowKind,
    pub current_state: StateId,
    pub field_buffer: FieldBuffer,
    /// Visited states; never empty, last entry is always `current_state`.
    pub navigation_stack: Vec<StateId>,
    /// Set while re-entering a step from the confirmation summary.
    pub return_to_confirm: bool,
    /// Error from the last failed commit attempt.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl WizardSession {
    pub fn new(user_id: i64, display_name: Option<String>, flow: FlowKind, entry: StateId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            display_name,
            flow,
            current_state: entry,
            field_buffer: FieldBuffer::default(),
            navigation_stack: vec![entry],
            return_to_confirm: false,
            last_error: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn update_buffer(&mut self, field: StateId, value: Option<String>) {
        self.field_buffer.set(field, value);
        self.touch();
    }

    pub fn push_state(&mut self, state: StateId) {
        self.navigation_stack.push(state);
        self.current_state = state;
        self.touch();
    }

    /// Return to the previous state. `None` when only the entry state is left.
    pub fn pop_state(&mut self) -> Option<StateId> {
        if self.navigation_stack.len() <= 1 {
            return None;
        }
        self.navigation_stack.pop();
        let previous = *self.navigation_stack.last()?;
        self.current_state = previous;
        self.touch();
        Some(previous)
    }

    pub fn can_go_back(&self) -> bool {
        self.navigation_stack.len() > 1
    }

    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

/// In-memory session store keyed by user id.
///
/// One session per user. `create` refuses to replace an existing session so
/// callers must discard explicitly with `clear`.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, WizardSession>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get(&self, user_id: i64) -> Option<WizardSession> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    pub async fn create(
        &self,
        user_id: i64,
        display_name: Option<String>,
        flow: FlowKind,
        entry: StateId,
    ) -> Result<WizardSession, WizardError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&user_id) {
            return Err(WizardError::SessionExists { user_id });
        }
        let session = WizardSession::new(user_id, display_name, flow, entry);
        sessions.insert(user_id, session.clone());
        debug!(user_id, flow = %flow, "Wizard session created");
        Ok(session)
    }

    /// Mutate a session in place.
    pub async fn update<F, R>(&self, user_id: i64, f: F) -> Result<R, WizardError>
    where
        F: FnOnce(&mut WizardSession) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&user_id)
            .ok_or(WizardError::NoSession { user_id })?;
        Ok(f(session))
    }

    pub async fn update_buffer(
        &self,
        user_id: i64,
        field: StateId,
        value: Option<String>,
    ) -> Result<(), WizardError> {
        self.update(user_id, |s| s.update_buffer(field, value)).await
    }

    pub async fn push_state(&self, user_id: i64, state: StateId) -> Result<(), WizardError> {
        self.update(user_id, |s| s.push_state(state)).await
    }

    pub async fn pop_state(&self, user_id: i64) -> Result<Option<StateId>, WizardError> {
        self.update(user_id, WizardSession::pop_state).await
    }

    /// Replace an existing session with a transitioned copy.
    pub async fn replace(&self, session: WizardSession) -> Result<(), WizardError> {
        let user_id = session.user_id;
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(&user_id)
            .ok_or(WizardError::NoSession { user_id })?;
        *slot = session;
        Ok(())
    }

    /// Destroy a session. Returns whether one existed.
    pub async fn clear(&self, user_id: i64) -> bool {
        let removed = self.sessions.write().await.remove(&user_id).is_some();
        if removed {
            debug!(user_id, "Wizard session cleared");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `max_idle`. Returns how many were dropped.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now.signed_duration_since(s.last_updated_at) <= max_idle);
        let expired = before - sessions.len();
        if expired > 0 {
            info!(count = expired, "Expired idle wizard sessions");
        }
        expired
    }
}

/// Spawn a background task that periodically drops idle sessions.
pub fn spawn_session_sweeper(
    store: Arc<SessionStore>,
    max_idle: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            store.expire_idle(max_idle).await;
        }
    })
}
