//! libSQL store — users, weekly reports and departments.
//!
//! Supports local file and in-memory databases. Implements the persistence
//! gateway used by the commit handoff.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::gateway::PersistenceGateway;
use crate::report::{Department, Submission, WeeklyReport};
use crate::store::migrations;
use crate::store::records::{StoredDepartment, StoredReport, StoredUser};

/// libSQL-backed store.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Users ───────────────────────────────────────────────────────

    /// Insert or refresh a user and the chat they wrote from. Never touches
    /// the admin flag.
    pub async fn upsert_user(
        &self,
        user_id: i64,
        chat_id: i64,
        username: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO users (user_id, chat_id, username, display_name, is_admin, created_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    chat_id = excluded.chat_id,
                    username = excluded.username,
                    display_name = excluded.display_name,
                    last_seen_at = excluded.last_seen_at",
                params![user_id, chat_id, opt_text(username), opt_text(display_name), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user: {e}")))?;
        Ok(())
    }

    /// Set or clear the database admin flag of a known user.
    pub async fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE users SET is_admin = ?1 WHERE user_id = ?2",
                params![i64::from(is_admin), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_admin: {e}")))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".to_string(),
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// The database admin flag. Unknown users are not admins.
    pub async fn is_admin_flag(&self, user_id: i64) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT is_admin FROM users WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_admin_flag: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) != 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_admin_flag: {e}"))),
        }
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<StoredUser>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_user row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    /// Users with no report for the week starting `week_start`.
    pub async fn users_without_report(
        &self,
        week_start: NaiveDate,
    ) -> Result<Vec<StoredUser>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users u
                     WHERE NOT EXISTS (
                        SELECT 1 FROM reports r WHERE r.user_id = u.user_id AND r.week_start = ?1
                     )
                     ORDER BY user_id"
                ),
                params![week_start.format(DATE_FORMAT).to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("users_without_report: {e}")))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            users.push(row_to_user(&row).map_err(|e| {
                DatabaseError::Query(format!("users_without_report row parse: {e}"))
            })?);
        }
        Ok(users)
    }

    // ── Reports ─────────────────────────────────────────────────────

    pub async fn insert_report(&self, report: &WeeklyReport) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO reports (user_id, username, week_start, tasks, achievements, problems, plans, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING id",
                params![
                    report.user_id,
                    opt_text(report.username.as_deref()),
                    report.week_start.format(DATE_FORMAT).to_string(),
                    report.tasks.as_str(),
                    report.achievements.as_str(),
                    report.problems.as_str(),
                    report.plans.as_str(),
                    report.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_report: {e}")))?;

        let id = returned_id(&mut rows, "insert_report").await?;
        debug!(report_id = id, user_id = report.user_id, "Report inserted into DB");
        Ok(id)
    }

    /// Most recent reports of one user, newest first.
    pub async fn reports_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredReport>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REPORT_COLUMNS} FROM reports WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reports_for_user: {e}")))?;

        let mut reports = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            reports.push(row_to_report(&row).map_err(|e| {
                DatabaseError::Query(format!("reports_for_user row parse: {e}"))
            })?);
        }
        Ok(reports)
    }

    pub async fn set_report_analysis(&self, id: i64, analysis: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE reports SET analysis = ?1 WHERE id = ?2",
                params![analysis, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_report_analysis: {e}")))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "report".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Departments ─────────────────────────────────────────────────

    /// Insert a department, or update the existing one with the same code.
    pub async fn upsert_department(&self, dept: &Department) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO departments (code, name, description, head, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    head = excluded.head,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    dept.code.as_str(),
                    dept.name.as_str(),
                    opt_text(dept.description.as_deref()),
                    opt_text(dept.head.as_deref()),
                    dept.created_by,
                    dept.created_at.to_rfc3339(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_department: {e}")))?;

        let id = returned_id(&mut rows, "upsert_department").await?;
        debug!(department_id = id, code = %dept.code, "Department upserted into DB");
        Ok(id)
    }

    /// All departments, ordered by code.
    pub async fn list_departments(&self) -> Result<Vec<StoredDepartment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEPARTMENT_COLUMNS} FROM departments ORDER BY code"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_departments: {e}")))?;

        let mut departments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            departments.push(row_to_department(&row).map_err(|e| {
                DatabaseError::Query(format!("list_departments row parse: {e}"))
            })?);
        }
        Ok(departments)
    }
}

#[async_trait]
impl PersistenceGateway for LibSqlStore {
    async fn save(&self, submission: &Submission) -> Result<i64, DatabaseError> {
        match submission {
            Submission::WeeklyReport(report) => self.insert_report(report).await,
            Submission::Department(dept) => self.upsert_department(dept).await,
        }
    }

    async fn attach_analysis(&self, record_id: i64, analysis: &str) -> Result<(), DatabaseError> {
        self.set_report_analysis(record_id, analysis).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

const DATE_FORMAT: &str = "%Y-%m-%d";

const USER_COLUMNS: &str =
    "user_id, username, display_name, is_admin, created_at, last_seen_at, chat_id";

const REPORT_COLUMNS: &str =
    "id, user_id, username, week_start, tasks, achievements, problems, plans, analysis, created_at";

const DEPARTMENT_COLUMNS: &str =
    "id, code, name, description, head, created_by, created_at, updated_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

async fn returned_id(rows: &mut libsql::Rows, op: &str) -> Result<i64, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("{op} returned id: {e}"))),
        Ok(None) => Err(DatabaseError::Query(format!("{op}: no id returned"))),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

fn row_to_user(row: &libsql::Row) -> Result<StoredUser, libsql::Error> {
    let created_str: String = row.get(4)?;
    let seen_str: String = row.get(5)?;
    Ok(StoredUser {
        user_id: row.get(0)?,
        chat_id: row.get(6).ok(),
        username: row.get(1).ok(),
        display_name: row.get(2).ok(),
        is_admin: row.get::<i64>(3)? != 0,
        created_at: parse_datetime(&created_str),
        last_seen_at: parse_datetime(&seen_str),
    })
}

fn row_to_report(row: &libsql::Row) -> Result<StoredReport, libsql::Error> {
    let week_str: String = row.get(3)?;
    let created_str: String = row.get(9)?;
    Ok(StoredReport {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2).ok(),
        week_start: NaiveDate::parse_from_str(&week_str, DATE_FORMAT).unwrap_or_default(),
        tasks: row.get(4)?,
        achievements: row.get(5)?,
        problems: row.get(6)?,
        plans: row.get(7)?,
        analysis: row.get(8).ok(),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_department(row: &libsql::Row) -> Result<StoredDepartment, libsql::Error> {
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    Ok(StoredDepartment {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3).ok(),
        head: row.get(4).ok(),
        created_by: row.get(5)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}
