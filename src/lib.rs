//! Weekly Report Bot — guided report wizards with per-user background processing.

pub mod analysis;
pub mod api;
pub mod bot;
pub mod channels;
pub mod commit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod notify;
pub mod reminders;
pub mod report;
pub mod store;
pub mod tasks;
pub mod wizard;
