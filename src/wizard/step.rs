//! Declarative step table — one immutable definition per wizard state.
//!
//! Tables are validated once at construction: every transition targets a
//! known state, optional steps (and only those) carry a skip edge, and every
//! state reachable from the entry step can reach the confirmation state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::WizardError;

use super::flows::FlowKind;

/// Identifier of a wizard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StateId(&'static str);

impl StateId {
    /// The shared pre-commit summary state every flow converges on.
    pub const CONFIRM: StateId = StateId("confirm");

    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Control events a user can send instead of free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Skip the current (optional) step.
    Next,
    Back,
    Cancel,
    Confirm,
    /// Re-enter an earlier step from the confirmation summary.
    Edit(StateId),
}

/// Prefix of every wizard callback payload.
const CALLBACK_PREFIX: &str = "wiz:";

impl ControlEvent {
    /// Encode as inline-button callback data.
    pub fn callback_data(&self) -> String {
        match self {
            Self::Next => format!("{CALLBACK_PREFIX}next"),
            Self::Back => format!("{CALLBACK_PREFIX}back"),
            Self::Cancel => format!("{CALLBACK_PREFIX}cancel"),
            Self::Confirm => format!("{CALLBACK_PREFIX}confirm"),
            Self::Edit(state) => format!("{CALLBACK_PREFIX}edit:{state}"),
        }
    }

    /// Whether a raw payload looks like wizard callback data.
    pub fn is_callback_data(data: &str) -> bool {
        data.starts_with(CALLBACK_PREFIX)
    }
}

/// Outgoing edges of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Taken after the validator accepts a text answer.
    Submit,
    /// Taken on a `Next` control event; only optional steps carry it.
    Skip,
}

/// Turns raw user input into a validated value, or a message explaining why not.
pub type Validator = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// One wizard step.
#[derive(Clone)]
pub struct StepDefinition {
    pub state: StateId,
    /// Human-readable field name used in summaries.
    pub label: &'static str,
    pub prompt: &'static str,
    pub optional: bool,
    validator: Validator,
    transitions: HashMap<Edge, StateId>,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("state", &self.state)
            .field("label", &self.label)
            .field("optional", &self.optional)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

impl StepDefinition {
    /// A step the user must answer.
    pub fn mandatory(
        state: StateId,
        label: &'static str,
        prompt: &'static str,
        validator: Validator,
    ) -> Self {
        Self {
            state,
            label,
            prompt,
            optional: false,
            validator,
            transitions: HashMap::new(),
        }
    }

    /// A step the user may skip with `Next`.
    pub fn optional(
        state: StateId,
        label: &'static str,
        prompt: &'static str,
        validator: Validator,
    ) -> Self {
        Self {
            optional: true,
            ..Self::mandatory(state, label, prompt, validator)
        }
    }

    /// Set the forward target. Optional steps skip to the same target.
    pub fn then(mut self, target: StateId) -> Self {
        self.transitions.insert(Edge::Submit, target);
        if self.optional {
            self.transitions.insert(Edge::Skip, target);
        }
        self
    }

    /// Set a single edge explicitly.
    pub fn on(mut self, edge: Edge, target: StateId) -> Self {
        self.transitions.insert(edge, target);
        self
    }

    pub fn target(&self, edge: Edge) -> Option<StateId> {
        self.transitions.get(&edge).copied()
    }

    pub fn validate(&self, raw: &str) -> Result<String, String> {
        (self.validator)(raw)
    }
}

/// Immutable lookup from state id to step definition for one flow.
#[derive(Debug)]
pub struct StepTable {
    kind: FlowKind,
    steps: Vec<StepDefinition>,
    index: HashMap<StateId, usize>,
}

impl StepTable {
    /// Build and validate a table. The first step is the entry state.
    pub fn new(kind: FlowKind, steps: Vec<StepDefinition>) -> Result<Self, WizardError> {
        let invalid = |reason: String| WizardError::InvalidTable {
            flow: kind.to_string(),
            reason,
        };

        if steps.is_empty() {
            return Err(invalid("table has no steps".to_string()));
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if step.state == StateId::CONFIRM {
                return Err(invalid(format!("{} is reserved", StateId::CONFIRM)));
            }
            if index.insert(step.state, i).is_some() {
                return Err(invalid(format!("duplicate state {}", step.state)));
            }
        }

        let table = Self { kind, steps, index };
        table.check_edges().map_err(invalid)?;
        table.check_convergence().map_err(invalid)?;
        Ok(table)
    }

    fn check_edges(&self) -> Result<(), String> {
        for step in &self.steps {
            if step.target(Edge::Submit).is_none() {
                return Err(format!("{} has no forward transition", step.state));
            }
            match (step.optional, step.target(Edge::Skip)) {
                (true, None) => return Err(format!("optional step {} has no skip handler", step.state)),
                (false, Some(_)) => {
                    return Err(format!("mandatory step {} must not define a skip handler", step.state));
                }
                _ => {}
            }
            for target in step.transitions.values() {
                if *target != StateId::CONFIRM && !self.index.contains_key(target) {
                    return Err(format!("{} transitions to unknown state {target}", step.state));
                }
            }
        }
        Ok(())
    }

    /// Every state reachable from the entry must be able to reach CONFIRM.
    fn check_convergence(&self) -> Result<(), String> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([self.entry()]);
        while let Some(state) = queue.pop_front() {
            if state == StateId::CONFIRM || !reachable.insert(state) {
                continue;
            }
            if let Some(step) = self.get(state) {
                queue.extend(step.transitions.values().copied());
            }
        }

        let mut converges: HashSet<StateId> = HashSet::from([StateId::CONFIRM]);
        loop {
            let before = converges.len();
            for step in &self.steps {
                if step.transitions.values().any(|t| converges.contains(t)) {
                    converges.insert(step.state);
                }
            }
            if converges.len() == before {
                break;
            }
        }

        let mut stuck: Vec<_> = reachable.difference(&converges).copied().collect();
        stuck.sort();
        match stuck.first() {
            Some(state) => Err(format!("state {state} never reaches {}", StateId::CONFIRM)),
            None => Ok(()),
        }
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn entry(&self) -> StateId {
        self.steps[0].state
    }

    pub fn get(&self, state: StateId) -> Option<&StepDefinition> {
        self.index.get(&state).map(|&i| &self.steps[i])
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Resolve a state name (e.g. from callback data) to its id.
    pub fn lookup(&self, name: &str) -> Option<StateId> {
        if name == StateId::CONFIRM.as_str() {
            return Some(StateId::CONFIRM);
        }
        self.steps.iter().map(|s| s.state).find(|s| s.as_str() == name)
    }

    /// Decode callback data produced by [`ControlEvent::callback_data`].
    pub fn parse_control(&self, data: &str) -> Option<ControlEvent> {
        let body = data.strip_prefix(CALLBACK_PREFIX)?;
        match body {
            "next" => Some(ControlEvent::Next),
            "back" => Some(ControlEvent::Back),
            "cancel" => Some(ControlEvent::Cancel),
            "confirm" => Some(ControlEvent::Confirm),
            _ => {
                let name = body.strip_prefix("edit:")?;
                self.lookup(name).map(ControlEvent::Edit)
            }
        }
    }
}

/// Reusable validators.
pub mod validators {
    use std::sync::Arc;

    use super::Validator;

    /// Trimmed text whose length (in characters) lies within `min..=max`.
    pub fn text_length(min: usize, max: usize) -> Validator {
        Arc::new(move |raw: &str| {
            let value = raw.trim();
            let len = value.chars().count();
            if len < min {
                if len == 0 {
                    return Err("The answer cannot be empty.".to_string());
                }
                return Err(format!(
                    "The answer is too short: at least {min} characters are required, got {len}."
                ));
            }
            if len > max {
                return Err(format!(
                    "The answer is too long: at most {max} characters are allowed, got {len}."
                ));
            }
            Ok(value.to_string())
        })
    }
}
