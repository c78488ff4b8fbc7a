use thiserror::Error;

use crate::retry::{Classify, ErrorClass};

/// Datastore error, typed so retry decisions never inspect message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// A unique constraint rejected the write (e.g. a sequence number taken
    /// by a concurrent writer).
    #[error("duplicate key value violates unique constraint \"{constraint}\"")]
    UniqueViolation { constraint: String },

    /// Another process holds the lock this write needs.
    #[error("lock already held: {0}")]
    LockHeld(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("database error: {0}")]
    Other(String),
}

impl DbError {
    pub fn unique(constraint: impl Into<String>) -> Self {
        Self::UniqueViolation {
            constraint: constraint.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

impl Classify for DbError {
    /// Only contention is worth retrying.
    fn class(&self) -> ErrorClass {
        match self {
            DbError::UniqueViolation { .. } | DbError::LockHeld(_) => ErrorClass::Transient,
            DbError::NotFound(_)
            | DbError::DeadlineExceeded
            | DbError::ConnectionClosed
            | DbError::Other(_) => ErrorClass::Permanent,
        }
    }
}
