//! Error types for index synchronization and search.

use thiserror::Error;

/// Schema artifact kinds checked during trigger integrity verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityKind {
    /// The source-of-truth content table.
    ContentTable,
    /// The native callback function the trigger invokes.
    TriggerFunction,
    /// The trigger object itself.
    Trigger,
    /// The contentless index table the callback writes to.
    IndexTable,
}

impl IntegrityKind {
    /// Human-readable artifact name used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            IntegrityKind::ContentTable => "content table",
            IntegrityKind::TriggerFunction => "trigger function",
            IntegrityKind::Trigger => "trigger",
            IntegrityKind::IndexTable => "index table",
        }
    }
}

impl std::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Main error type for the ftsync library.
#[derive(Debug, Error)]
pub enum FtsError {
    /// Caller supplied input outside the configured schema (unknown index
    /// column, unknown strategy name, malformed configuration).
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A dependent schema artifact is missing.
    #[error("{kind} \"{name}\" does not exist")]
    Integrity { kind: IntegrityKind, name: String },

    /// Integrity verification kept failing for the same artifact kind after
    /// its single repair attempt, or the kind has no repair path.
    #[error("{kind} \"{name}\" can not be resolved")]
    IntegrityUnresolved { kind: IntegrityKind, name: String },

    /// The number of distinct broken documents exceeds the reporting ceiling.
    #[error("number of broken index documents is {count}, more than {limit}")]
    TooManyBrokenDocs { count: usize, limit: usize },

    /// The engine reported a result that violates an internal invariant
    /// (unexpected affected-row count, non-converged DDL). Not recoverable
    /// at runtime.
    #[error("Invariant violation: {message}")]
    Invariant { message: String },

    /// Cross-connection attachment failed or its preconditions do not hold.
    #[error("Attach error: {message}")]
    Attach { message: String },

    /// Database error passthrough.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },
}

/// Result type alias for ftsync operations.
pub type Result<T> = std::result::Result<T, FtsError>;

impl From<rusqlite::Error> for FtsError {
    fn from(err: rusqlite::Error) -> Self {
        FtsError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl FtsError {
    /// Validation error from any displayable message.
    pub fn validation(message: impl Into<String>) -> Self {
        FtsError::Validation {
            message: message.into(),
        }
    }
}
