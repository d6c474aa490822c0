//! The concrete wizards: the weekly report and the admin department form.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WizardError;

use super::step::{StateId, StepDefinition, StepTable, Validator, validators::text_length};

/// Longest free-text answer accepted in a report.
pub const MAX_ANSWER_LEN: usize = 2000;

/// Which wizard a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    WeeklyReport,
    Department,
}

impl FlowKind {
    /// Heading shown on the confirmation summary.
    pub fn title(&self) -> &'static str {
        match self {
            Self::WeeklyReport => "Weekly report",
            Self::Department => "New department",
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Self::Department)
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WeeklyReport => "weekly_report",
            Self::Department => "department",
        };
        write!(f, "{s}")
    }
}

/// Weekly report states.
pub mod report {
    use super::StateId;

    pub const TASKS: StateId = StateId::new("tasks");
    pub const ACHIEVEMENTS: StateId = StateId::new("achievements");
    pub const PROBLEMS: StateId = StateId::new("problems");
    pub const PLANS: StateId = StateId::new("plans");
}

/// Department form states.
pub mod department {
    use super::StateId;

    pub const CODE: StateId = StateId::new("code");
    pub const NAME: StateId = StateId::new("name");
    pub const DESCRIPTION: StateId = StateId::new("description");
    pub const HEAD: StateId = StateId::new("head");
}

/// Four mandatory free-text steps, each at least `min_len` characters.
pub fn weekly_report_flow(min_len: usize) -> Result<StepTable, WizardError> {
    let answer = || text_length(min_len, MAX_ANSWER_LEN);
    StepTable::new(
        FlowKind::WeeklyReport,
        vec![
            StepDefinition::mandatory(
                report::TASKS,
                "Tasks",
                "1/4 What tasks did you work on this week?",
                answer(),
            )
            .then(report::ACHIEVEMENTS),
            StepDefinition::mandatory(
                report::ACHIEVEMENTS,
                "Achievements",
                "2/4 What did you achieve?",
                answer(),
            )
            .then(report::PROBLEMS),
            StepDefinition::mandatory(
                report::PROBLEMS,
                "Problems",
                "3/4 What problems or blockers did you run into?",
                answer(),
            )
            .then(report::PLANS),
            StepDefinition::mandatory(
                report::PLANS,
                "Plans",
                "4/4 What are your plans for next week?",
                answer(),
            )
            .then(StateId::CONFIRM),
        ],
    )
}

/// Admin form: code and name are required, description and head are optional.
pub fn department_flow() -> Result<StepTable, WizardError> {
    StepTable::new(
        FlowKind::Department,
        vec![
            StepDefinition::mandatory(
                department::CODE,
                "Code",
                "Enter the department code (2-16 characters: letters, digits, '-' or '_').",
                department_code(),
            )
            .then(department::NAME),
            StepDefinition::mandatory(
                department::NAME,
                "Name",
                "Enter the department name.",
                text_length(2, 100),
            )
            .then(department::DESCRIPTION),
            StepDefinition::optional(
                department::DESCRIPTION,
                "Description",
                "Describe the department, or press Skip.",
                text_length(1, 500),
            )
            .then(department::HEAD),
            StepDefinition::optional(
                department::HEAD,
                "Head",
                "Who heads the department (e.g. @username)? Press Skip if nobody yet.",
                text_length(2, 100),
            )
            .then(StateId::CONFIRM),
        ],
    )
}

static DEPARTMENT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_-]{2,16}$").expect("department code regex is valid"));

/// Upper-cases the input and checks it against the department code format.
fn department_code() -> Validator {
    Arc::new(|raw: &str| {
        let code = raw.trim().to_uppercase();
        if DEPARTMENT_CODE.is_match(&code) {
            Ok(code)
        } else {
            Err("The code must be 2-16 characters: latin letters, digits, '-' or '_'.".to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::step::Edge;

    #[test]
    fn built_in_flows_are_valid() {
        let report_flow = weekly_report_flow(10).unwrap();
        assert_eq!(report_flow.entry(), report::TASKS);
        assert_eq!(report_flow.steps().len(), 4);
        assert!(report_flow.steps().iter().all(|s| !s.optional));

        let dept = department_flow().unwrap();
        assert_eq!(dept.entry(), department::CODE);
        assert!(dept.get(department::DESCRIPTION).unwrap().optional);
        assert_eq!(
            dept.get(department::HEAD).unwrap().target(Edge::Skip),
            Some(StateId::CONFIRM)
        );
    }

    #[test]
    fn report_answers_respect_minimum_length() {
        let flow = weekly_report_flow(10).unwrap();
        let step = flow.get(report::ACHIEVEMENTS).unwrap();
        assert!(step.validate("short").is_err());
        assert_eq!(step.validate(" shipped the release ").unwrap(), "shipped the release");
    }

    #[test]
    fn department_code_is_normalised() {
        let flow = department_flow().unwrap();
        let step = flow.get(department::CODE).unwrap();
        assert_eq!(step.validate(" it-ops ").unwrap(), "IT-OPS");
        assert!(step.validate("x").is_err());
        assert!(step.validate("has space").is_err());
        assert!(step.validate("WAY-TOO-LONG-CODE-123").is_err());
    }

    #[test]
    fn flow_kind_display_matches_serde() {
        for kind in [FlowKind::WeeklyReport, FlowKind::Department] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(format!("\"{kind}\""), json);
        }
        assert!(FlowKind::Department.requires_admin());
        assert!(!FlowKind::WeeklyReport.requires_admin());
    }
}
