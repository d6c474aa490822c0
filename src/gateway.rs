//! Collaborator interfaces consumed by the commit handoff and the bot.

use async_trait::async_trait;

use crate::error::{AnalysisError, ChannelError, DatabaseError};
use crate::report::Submission;

/// Stores confirmed submissions.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a submission and return its record id.
    async fn save(&self, submission: &Submission) -> Result<i64, DatabaseError>;

    /// Store the analysis text for a saved record. Safe to repeat.
    async fn attach_analysis(&self, record_id: i64, analysis: &str) -> Result<(), DatabaseError>;
}

/// Delivers a submission to whoever should see it.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Returns whether at least one recipient accepted the message.
    async fn deliver(
        &self,
        submission: &Submission,
        analysis: Option<&str>,
    ) -> Result<bool, ChannelError>;
}

/// Produces a free-text annotation for a submission.
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn analyze(&self, submission: &Submission) -> Result<String, AnalysisError>;
}

/// Single source of truth for admin rights.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn is_admin(&self, user_id: i64) -> bool;
}
