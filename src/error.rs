//! Error types for buildplan.
//!
//! All errors are strongly typed using thiserror. Structural problems with
//! inputs surface synchronously as [`ValidationError`]. Partial failures during
//! a coordinator run (a specialist call that never succeeds, an out-of-ownership
//! write, a blocking QA verdict) are recovered locally and reported alongside
//! the result instead of being raised.

use thiserror::Error;

use crate::session::SessionId;

/// Validation errors raised while building sources, facts, or configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Fact '{fact_id}' cites unknown source '{source_id}'")]
    UnknownSource {
        fact_id: String,
        source_id: String,
    },

    #[error("Duplicate fact id '{fact_id}'")]
    DuplicateFact {
        fact_id: String,
    },

    #[error("Duplicate source id '{source_id}'")]
    DuplicateSource {
        source_id: String,
    },

    #[error("Malformed override for '{file_name}': {reason}")]
    MalformedOverride {
        file_name: String,
        reason: String,
    },

    #[error("Required field '{field}' is missing on '{record}'")]
    MissingField {
        record: String,
        field: String,
    },

    #[error("Unknown {field} '{value}'")]
    UnknownValue {
        field: String,
        value: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Failure of a single external call (specialist backend or QA gate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalCallError {
    #[error("External call failed: {message}")]
    Failed {
        message: String,
        retryable: bool,
    },

    #[error("External call timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Malformed specialist output: {reason}")]
    MalformedOutput {
        reason: String,
    },
}

impl ExternalCallError {
    /// A failure worth retrying (rate limit, 5xx, dropped connection).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not change on retry.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Failed { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::MalformedOutput { .. } => false,
        }
    }
}

/// Session store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session expired: {0}")]
    Expired(SessionId),

    #[error("Session store backend error: {0}")]
    Backend(String),
}

/// Returned by publish integrations when the QA gate blocks publication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Publish blocked by QA: score {score} is below threshold {threshold}")]
    QaBlocked {
        score: u8,
        threshold: u8,
        fixes: Vec<String>,
    },
}

/// Configuration loading errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    Io {
        path: String,
        message: String,
    },

    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Top-level error type for buildplan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("External call error: {0}")]
    External(#[from] ExternalCallError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PlanError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a publish refusal.
    #[must_use]
    pub const fn is_publish_blocked(&self) -> bool {
        matches!(self, Self::Publish(PublishError::QaBlocked { .. }))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::External(e) => e.is_retryable(),
            Self::Session(SessionError::Backend(_)) => true,
            _ => false,
        }
    }
}

/// Result type alias for buildplan operations.
pub type PlanResult<T> = Result<T, PlanError>;
