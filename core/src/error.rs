//! Persistence error type shared by every store implementation.

use crate::model::UnknownVariant;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the relational store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Waiting for a row or advisory lock exceeded the configured timeout.
    #[error("Lock wait timed out")]
    LockTimeout,

    /// The store aborted the transaction to break a deadlock.
    #[error("Deadlock detected")]
    Deadlock,

    /// The store could not serialize concurrent transactions.
    #[error("Serialization failure")]
    SerializationFailure,

    /// Connection could not be acquired or was lost.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected a write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint
        constraint: String,
    },

    /// A row could not be decoded into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Returns `true` if re-running the whole unit of work may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout | Self::Deadlock | Self::SerializationFailure | Self::Unavailable(_)
        )
    }
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        Self::Corrupt(err.to_string())
    }
}
