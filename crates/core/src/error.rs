//! Data-store error model.
//!
//! Store backends translate their vendor-specific failures (SQLSTATE codes,
//! pool timeouts, ...) into `StoreError`. Callers never look at vendor codes;
//! they ask the store to classify a failure through `ClassifyWriteError`.

use thiserror::Error;

/// Result type returned by data-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Which integrity constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityKind {
    NotNull,
    ForeignKey,
    Unique,
    RowTooLarge,
}

impl IntegrityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityKind::NotNull => "not_null",
            IntegrityKind::ForeignKey => "foreign_key",
            IntegrityKind::Unique => "unique",
            IntegrityKind::RowTooLarge => "row_too_large",
        }
    }
}

impl core::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data-store operation error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected a write because it violates a constraint.
    ///
    /// The same input will violate the same constraint on every attempt.
    #[error("integrity violation ({kind}): {message}")]
    Integrity { kind: IntegrityKind, message: String },

    /// The store could not be reached or the operation lost a race
    /// (connection loss, timeout, serialization failure, lock contention).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other store failure.
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn integrity(kind: IntegrityKind, message: impl Into<String>) -> Self {
        Self::Integrity {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// How a failed write should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorClass {
    /// Retrying will never succeed.
    IntegrityViolation,
    /// Retrying may succeed.
    Transient,
    /// Unknown; treated as retryable by the acknowledgment policy.
    Unknown,
}

/// Capability exposed by a data store: classify one of its own failures.
pub trait ClassifyWriteError: Send + Sync {
    fn classify_write_error(&self, err: &StoreError) -> WriteErrorClass {
        match err {
            StoreError::Integrity { .. } => WriteErrorClass::IntegrityViolation,
            StoreError::Unavailable(_) => WriteErrorClass::Transient,
            StoreError::Other(_) => WriteErrorClass::Unknown,
        }
    }
}
