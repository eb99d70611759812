//! Error types for mail-triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

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

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    /// The database file is locked, unreadable or gone.
    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl DatabaseError {
    /// Whether the datastore itself is unreachable, as opposed to a single
    /// statement failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DatabaseError::Pool(_) | DatabaseError::Unavailable(_))
    }
}

/// Mailbox (IMAP) errors. All of them are fatal to the current poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("IMAP command {command} failed: {response}")]
    Protocol { command: String, response: String },

    #[error("Mailbox operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mailbox session already closed")]
    Closed,

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

/// Per-message decode errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message is empty")]
    Empty,

    #[error("Message could not be parsed as RFC 5322")]
    Unparseable,
}

/// Errors that abort a whole ingestion cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mailbox unavailable: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Datastore unavailable: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
