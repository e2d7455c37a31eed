use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed for {id}: {reason}")]
    Validation { id: String, reason: String },

    #[error("Constraint violated for {id}: {reason}")]
    Constraint { id: String, reason: String },

    #[error("Invalid transition for order {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Concurrent modification of {id}: expected {expected}, found {actual}")]
    ConcurrentModification {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid vector dimension for {id}: expected {expected}, got {actual}")]
    Dimension {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Stable, user-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Constraint,
    InvalidTransition,
    ConcurrentModification,
    Dimension,
    Timeout,
    Unavailable,
    NotFound,
    Internal,
}

impl Error {
    pub fn validation(id: impl ToString, reason: impl Into<String>) -> Self {
        Error::Validation {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn constraint(id: impl ToString, reason: impl Into<String>) -> Self {
        Error::Constraint {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Unavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Constraint { .. } => ErrorKind::Constraint,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Error::Dimension { .. } => ErrorKind::Dimension,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Unavailable { .. } => ErrorKind::Unavailable,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// The identifier the failure is about, if there is one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Error::Validation { id, .. }
            | Error::Constraint { id, .. }
            | Error::InvalidTransition { id, .. }
            | Error::ConcurrentModification { id, .. }
            | Error::Dimension { id, .. }
            | Error::NotFound { id, .. } => Some(id),
            Error::Timeout { operation, .. } => Some(operation),
            Error::Unavailable { service, .. } => Some(service),
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => None,
        }
    }

    /// Dependency failures that callers may answer with a degraded result.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Unavailable { .. })
    }
}
