//! Error types for the automation service.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Trigger-time specification parse errors.
///
/// A failed line is skipped with a warning; siblings in the same
/// automation keep firing.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("expected 5 whitespace-separated fields, found {found}")]
    FieldCount { found: usize },

    #[error("{field} is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} {value} out of range (0-{max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("day-of-week set is empty")]
    EmptyDaySet,
}

/// Credential resolution errors (observed at claim time, never cached).
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No credential on record for user {user_id}")]
    Missing { user_id: Uuid },

    #[error("Failed to resolve credential for user {user_id}: {reason}")]
    Unresolvable { user_id: Uuid, reason: String },
}

/// Version-control operation errors. The git layer never retries;
/// retry is the queue's responsibility.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Failed to spawn git ({command}): {reason}")]
    Spawn { command: String, reason: String },

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Invalid repository file path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
