//! Persistence layer — libSQL-backed storage for users, reports and departments.

pub mod auth;
pub mod libsql_backend;
pub mod migrations;
pub mod records;

pub use auth::AdminAuthorization;
pub use libsql_backend::LibSqlStore;
pub use records::{StoredDepartment, StoredReport, StoredUser};
