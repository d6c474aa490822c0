//! Wizard — per-user multi-step data entry.
//!
//! Core components:
//! - `step` — Declarative step table (states, validators, transitions)
//! - `session` — Per-user session state and its store
//! - `engine` — Table-driven transitions and prompt rendering
//! - `confirm` — Pre-commit summary with confirm / edit / cancel
//! - `flows` — The weekly report and department step tables

pub mod confirm;
pub mod engine;
pub mod flows;
pub mod session;
pub mod step;

pub use confirm::ConfirmationGate;
pub use engine::{ControlOption, Outcome, Render, WizardEngine, WizardEvent};
pub use flows::{FlowKind, department_flow, weekly_report_flow};
pub use session::{FieldBuffer, SessionStore, WizardSession, spawn_session_sweeper};
pub use step::{ControlEvent, Edge, StateId, StepDefinition, StepTable};
