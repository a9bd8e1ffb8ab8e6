//! Error types for reversion-store

use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Revert could not make progress (dependency cycle or unsatisfiable ordering)
    Revert,
    /// Referential-integrity violation reported by the object store
    IntegrityConflict,
    /// Version, revision or live object not found
    NotFound,
    /// Setup errors (missing registration, unsupported backend, bad config)
    Configuration,
    /// Serialization/deserialization errors
    Serialization,
    /// Database errors (SQLite)
    Database,
    /// Savepoint/transaction errors
    Transaction,
    /// Moderation transition not allowed from the version's current status
    InvalidTransition,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Revert => "revert",
            ErrorKind::IntegrityConflict => "integrity_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Database => "database",
            ErrorKind::Transaction => "transaction",
            ErrorKind::InvalidTransition => "invalid_transition",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reversion error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct ReversionError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ReversionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Integrity conflicts and vanished objects feed the revert retry set.
    /// Everything else aborts the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::IntegrityConflict | ErrorKind::NotFound)
    }

    // Convenience constructors
    pub fn revert(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Revert, message)
    }

    pub fn integrity_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityConflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn version_not_found(version_id: i64) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Version not found: {}", version_id),
        )
    }

    pub fn revision_not_found(revision_id: i64) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Revision not found: {}", revision_id),
        )
    }

    pub fn object_not_found(object: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("Object not found: {}", object))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn not_registered(object_type: &str) -> Self {
        Self::new(
            ErrorKind::Configuration,
            format!("Type '{}' is not registered for versioning", object_type),
        )
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidTransition,
            format!("Cannot move a {} version to {}", from, to),
        )
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ReversionError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation => {
                ReversionError::integrity_conflict(format!("SQLite constraint: {}", err))
                    .with_source(err)
            }
            rusqlite::Error::QueryReturnedNoRows => {
                ReversionError::not_found("SQLite query returned no rows").with_source(err)
            }
            _ => ReversionError::database(format!("SQLite error: {}", err)).with_source(err),
        }
    }
}

// JSON error conversions
impl From<serde_json::Error> for ReversionError {
    fn from(err: serde_json::Error) -> Self {
        ReversionError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

// MessagePack error conversions
impl From<rmp_serde::encode::Error> for ReversionError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ReversionError::serialization(format!("MessagePack encode error: {}", err))
            .with_source(err)
    }
}

impl From<rmp_serde::decode::Error> for ReversionError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ReversionError::serialization(format!("MessagePack decode error: {}", err))
            .with_source(err)
    }
}

impl From<ConfigError> for ReversionError {
    fn from(err: ConfigError) -> Self {
        ReversionError::configuration(err.to_string()).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ReversionError>;
