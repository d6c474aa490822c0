//! Error types for the report bot.

/// Errors surfaced while handling an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Transport channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel health check failed: {name}")]
    HealthCheckFailed { name: String },
}

/// Text-analysis collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis service is not configured")]
    Unavailable,

    #[error("Analysis request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid response from analysis service: {reason}")]
    InvalidResponse { reason: String },
}

/// Wizard session and step-table errors.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("User {user_id} already has an active session")]
    SessionExists { user_id: i64 },

    #[error("User {user_id} has no active session")]
    NoSession { user_id: i64 },

    #[error("Invalid step table {flow}: {reason}")]
    InvalidTable { flow: String, reason: String },

    #[error("Unknown state {state} in flow {flow}")]
    UnknownState { flow: String, state: String },
}

/// Errors raised while turning a confirmed wizard into a stored record.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Required field {field} is missing")]
    MissingField { field: String },

    #[error("Failed to persist submission: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Result type alias for message handling.
pub type Result<T> = std::result::Result<T, Error>;
