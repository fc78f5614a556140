//! Error types for the intake service.

use crate::intake::step::IntakeStep;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors. Surfaced by every store operation.
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

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// A raw input that failed the rule for its step.
///
/// This is an expected outcome: the driver turns it into a re-prompt and
/// never returns it as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {step}: {reason}")]
pub struct ValidationError {
    pub step: IntakeStep,
    pub reason: String,
}

/// Failures of a single `handle_message` call.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Profile store read/write failed. The message was not processed and
    /// should be delivered again.
    #[error("Profile store unavailable: {0}")]
    Store(#[from] DatabaseError),

    /// A completed draft is missing intake fields. Indicates a state
    /// machine bug; never retried.
    #[error("Draft {identity} reached done without fields: {missing:?}")]
    ConsistencyViolation {
        identity: String,
        missing: Vec<IntakeStep>,
    },
}

impl IntakeError {
    /// Whether the delivery loop should hand the message to the driver again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
