use serde::Serialize;
use thiserror::Error;

use super::CounterId;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Counter {0} not found")]
    CounterNotFound(CounterId),

    #[error("Counter {0} has no version stamp")]
    Unversioned(CounterId),

    #[error("Transaction {0} is closed")]
    TransactionClosed(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Worker cancelled: {0}")]
    Cancelled(String),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::StoreUnavailable(_) | DbError::Journal(_) => ErrorKind::StoreUnavailable,
            DbError::WriteConflict(_) => ErrorKind::WriteConflict,
            DbError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            DbError::CounterNotFound(_)
            | DbError::Unversioned(_)
            | DbError::TransactionClosed(_) => ErrorKind::Usage,
            DbError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Conflicts are expected outcomes of contention, everything else is a fault.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::WriteConflict
    }
}

/// Coarse classification used by worker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StoreUnavailable,
    WriteConflict,
    InvariantViolation,
    Usage,
    /// Worker task stopped before it could report
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::StoreUnavailable => write!(f, "STORE_UNAVAILABLE"),
            ErrorKind::WriteConflict => write!(f, "WRITE_CONFLICT"),
            ErrorKind::InvariantViolation => write!(f, "INVARIANT_VIOLATION"),
            ErrorKind::Usage => write!(f, "USAGE"),
            ErrorKind::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(DbError::WriteConflict("version mismatch".into()).is_conflict());
        assert_eq!(
            DbError::Journal("bad frame".into()).kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            DbError::CounterNotFound(CounterId(7)).kind(),
            ErrorKind::Usage
        );
        assert_eq!(
            DbError::Cancelled("t1".into()).kind(),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn test_io_error_is_store_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: DbError = io.into();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(err.to_string().contains("read-only"));
    }
}
