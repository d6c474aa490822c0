//! Rows read back from the database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A user the bot has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUser {
    pub user_id: i64,
    /// Chat the user last wrote from. `None` for rows written before it was tracked.
    pub chat_id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl StoredUser {
    /// Where to reach the user. Private chats share the user's id.
    pub fn reply_chat(&self) -> i64 {
        self.chat_id.unwrap_or(self.user_id)
    }
}

/// A saved weekly report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredReport {
    pub id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub week_start: NaiveDate,
    pub tasks: String,
    pub achievements: String,
    pub problems: String,
    pub plans: String,
    pub analysis: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A saved department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDepartment {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub head: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
