//! Confirmation gate — the pre-commit summary of a filled-in wizard.

use super::engine::{ControlOption, Render};
use super::session::{FieldBuffer, WizardSession};
use super::step::{ControlEvent, StateId, StepTable};

/// Shown for optional fields that were skipped or never reached.
pub const NOT_PROVIDED: &str = "not provided";

/// Renders the buffer and offers confirm / edit / cancel.
pub struct ConfirmationGate;

impl ConfirmationGate {
    /// One line per step, in table order.
    pub fn summary(table: &StepTable, buffer: &FieldBuffer) -> String {
        let mut parts = vec![format!("*{}*", table.kind().title())];
        for step in table.steps() {
            let value = buffer.value(step.state).unwrap_or(NOT_PROVIDED);
            parts.push(format!("*{}:* {}", step.label, value));
        }
        parts.join("\n")
    }

    /// Confirm, one Edit per step already visited, then Cancel.
    pub fn options(table: &StepTable, session: &WizardSession) -> Vec<ControlOption> {
        let mut options = vec![ControlOption::new("✅ Confirm", ControlEvent::Confirm)];
        for step in table.steps() {
            if Self::editable(session, step.state) {
                options.push(ControlOption::new(
                    format!("✏️ {}", step.label),
                    ControlEvent::Edit(step.state),
                ));
            }
        }
        options.push(ControlOption::new("❌ Cancel", ControlEvent::Cancel));
        options
    }

    /// Only states on the navigation stack can be re-entered.
    pub fn editable(session: &WizardSession, target: StateId) -> bool {
        target != StateId::CONFIRM && session.navigation_stack.contains(&target)
    }

    pub fn render(table: &StepTable, session: &WizardSession) -> Render {
        let mut text = Self::summary(table, &session.field_buffer);
        text.push_str("\n\nIs everything correct?");
        Render {
            text,
            options: Self::options(table, session),
        }
    }
}
