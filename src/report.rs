//! Domain objects built from a confirmed wizard, and their text rendering.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommitError;
use crate::wizard::flows::{FlowKind, department, report};
use crate::wizard::{FieldBuffer, StateId};

/// Who confirmed the wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub user_id: i64,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub user_id: i64,
    pub username: Option<String>,
    /// Monday of the week the report covers.
    pub week_start: NaiveDate,
    pub tasks: String,
    pub achievements: String,
    pub problems: String,
    pub plans: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub head: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

/// A confirmed wizard, handed to the persistence and notification gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Submission {
    WeeklyReport(WeeklyReport),
    Department(Department),
}

impl Submission {
    /// Build the domain object for `kind` from a completed buffer.
    pub fn from_buffer(
        kind: FlowKind,
        submitter: &Submitter,
        buffer: &FieldBuffer,
    ) -> Result<Self, CommitError> {
        let now = Utc::now();
        match kind {
            FlowKind::WeeklyReport => Ok(Self::WeeklyReport(WeeklyReport {
                user_id: submitter.user_id,
                username: submitter.display_name.clone(),
                week_start: week_start(now.date_naive()),
                tasks: required(buffer, report::TASKS)?,
                achievements: required(buffer, report::ACHIEVEMENTS)?,
                problems: required(buffer, report::PROBLEMS)?,
                plans: required(buffer, report::PLANS)?,
                created_at: now,
            })),
            FlowKind::Department => Ok(Self::Department(Department {
                code: required(buffer, department::CODE)?,
                name: required(buffer, department::NAME)?,
                description: buffer.value(department::DESCRIPTION).map(str::to_string),
                head: buffer.value(department::HEAD).map(str::to_string),
                created_by: submitter.user_id,
                created_at: now,
            })),
        }
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            Self::WeeklyReport(_) => FlowKind::WeeklyReport,
            Self::Department(_) => FlowKind::Department,
        }
    }

    /// Only weekly reports go through text analysis.
    pub fn wants_analysis(&self) -> bool {
        matches!(self, Self::WeeklyReport(_))
    }
}

fn required(buffer: &FieldBuffer, field: StateId) -> Result<String, CommitError> {
    buffer
        .value(field)
        .map(str::to_string)
        .ok_or_else(|| CommitError::MissingField {
            field: field.to_string(),
        })
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday();
    date.checked_sub_days(Days::new(u64::from(offset)))
        .unwrap_or(date)
}

/// Plain-text rendering used for notifications.
pub fn format_submission(submission: &Submission, analysis: Option<&str>) -> String {
    let mut out = String::new();
    match submission {
        Submission::WeeklyReport(r) => {
            let author = r
                .username
                .clone()
                .unwrap_or_else(|| format!("user {}", r.user_id));
            out.push_str(&format!(
                "📋 Weekly report from {author} (week of {})\n\n",
                r.week_start.format("%Y-%m-%d")
            ));
            out.push_str(&format!("Tasks:\n{}\n\n", r.tasks));
            out.push_str(&format!("Achievements:\n{}\n\n", r.achievements));
            out.push_str(&format!("Problems:\n{}\n\n", r.problems));
            out.push_str(&format!("Plans:\n{}", r.plans));
        }
        Submission::Department(d) => {
            out.push_str(&format!("🏢 Department {}: {}\n", d.code, d.name));
            if let Some(description) = &d.description {
                out.push_str(&format!("Description: {description}\n"));
            }
            if let Some(head) = &d.head {
                out.push_str(&format!("Head: {head}\n"));
            }
            out.push_str(&format!("Created by user {}", d.created_by));
        }
    }
    if let Some(analysis) = analysis {
        out.push_str(&format!("\n\n🤖 Analysis:\n{analysis}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitter() -> Submitter {
        Submitter {
            user_id: 42,
            display_name: Some("alice".into()),
        }
    }

    fn report_buffer() -> FieldBuffer {
        let mut buffer = FieldBuffer::default();
        buffer.set(report::TASKS, Some("tasks".into()));
        buffer.set(report::ACHIEVEMENTS, Some("achievements".into()));
        buffer.set(report::PROBLEMS, Some("problems".into()));
        buffer.set(report::PLANS, Some("plans".into()));
        buffer
    }

    #[test]
    fn week_start_is_monday() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        assert_eq!(week_start(wednesday), NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        let monday = NaiveDate::from_ymd_opt(2024, 5, 13).unwrap();
        assert_eq!(week_start(monday), monday);
        let sunday = NaiveDate::from_ymd_opt(2024, 5, 19).unwrap();
        assert_eq!(week_start(sunday), monday);
    }

    #[test]
    fn builds_weekly_report() {
        let submission =
            Submission::from_buffer(FlowKind::WeeklyReport, &submitter(), &report_buffer()).unwrap();
        let Submission::WeeklyReport(report) = &submission else {
            panic!("expected weekly report");
        };
        assert_eq!(report.user_id, 42);
        assert_eq!(report.plans, "plans");
        assert!(submission.wants_analysis());
    }

    #[test]
    fn missing_mandatory_field_is_an_error() {
        let mut buffer = report_buffer();
        buffer.set(report::PLANS, None);
        let err = Submission::from_buffer(FlowKind::WeeklyReport, &submitter(), &buffer).unwrap_err();
        assert!(matches!(err, CommitError::MissingField { field } if field == "plans"));
    }

    #[test]
    fn department_optional_fields() {
        let mut buffer = FieldBuffer::default();
        buffer.set(department::CODE, Some("OPS".into()));
        buffer.set(department::NAME, Some("Operations".into()));
        buffer.set(department::DESCRIPTION, None);

        let submission = Submission::from_buffer(FlowKind::Department, &submitter(), &buffer).unwrap();
        let Submission::Department(dept) = &submission else {
            panic!("expected department");
        };
        assert_eq!(dept.description, None);
        assert_eq!(dept.head, None);
        assert!(!submission.wants_analysis());

        let text = format_submission(&submission, None);
        assert!(text.contains("OPS"));
        assert!(!text.contains("Description"));
    }

    #[test]
    fn format_includes_analysis() {
        let submission =
            Submission::from_buffer(FlowKind::WeeklyReport, &submitter(), &report_buffer()).unwrap();
        let text = format_submission(&submission, Some("looks good"));
        assert!(text.contains("Weekly report from alice"));
        assert!(text.contains("Achievements:\nachievements"));
        assert!(text.ends_with("looks good"));
    }
}
