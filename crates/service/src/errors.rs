use thiserror::Error;

use invoicemgmt_core::DomainError;
use invoicemgmt_infra::db::DbError;
use invoicemgmt_infra::external::{FlagError, OrderServiceError};
use invoicemgmt_infra::retry::{Classify, ErrorClass, RetryError};
use invoicemgmt_infra::workers::PoolError;

/// Error returned at the service boundary, mirroring gRPC status codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Status code name as a transport would report it.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "InvalidArgument",
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::Internal(_) => "Internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::InvalidArgument(m)
            | ServiceError::NotFound(m)
            | ServiceError::Internal(m) => m,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(_) | DomainError::InvalidId(_) => {
                ServiceError::InvalidArgument(err.to_string())
            }
            DomainError::NotFound(_) => ServiceError::NotFound(err.to_string()),
            DomainError::InvariantViolation(_) => ServiceError::Internal(err.to_string()),
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => ServiceError::NotFound(err.to_string()),
            _ => ServiceError::Internal(err.to_string()),
        }
    }
}

impl From<PoolError> for ServiceError {
    fn from(err: PoolError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<FlagError> for ServiceError {
    fn from(err: FlagError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

/// Failure inside one retry-wrapped unit of work.
///
/// Only database contention is retried; the rest is terminal for the unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    OrderService(#[from] OrderServiceError),

    /// The order service accepted the call but rejected some bill items.
    #[error("failed to update bill item status: {0}")]
    BillItemStatus(String),

    #[error("{0}")]
    Internal(String),
}

impl WorkflowError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl Classify for WorkflowError {
    fn class(&self) -> ErrorClass {
        match self {
            WorkflowError::Db(err) => err.class(),
            WorkflowError::Domain(err) if err.is_validation() => ErrorClass::Validation,
            WorkflowError::Domain(_)
            | WorkflowError::OrderService(_)
            | WorkflowError::BillItemStatus(_)
            | WorkflowError::Internal(_) => ErrorClass::Permanent,
        }
    }
}

impl From<WorkflowError> for ServiceError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Db(err) => err.into(),
            WorkflowError::Domain(err) => err.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<RetryError<WorkflowError>> for ServiceError {
    fn from(err: RetryError<WorkflowError>) -> Self {
        if err.is_exhausted() {
            return ServiceError::Internal(err.to_string());
        }
        err.into_error().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_validation_maps_to_invalid_argument() {
        let err: ServiceError = DomainError::validation("invalid invoice status").into();
        assert_eq!(err, ServiceError::InvalidArgument("invalid invoice status".into()));
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn workflow_errors_are_classified() {
        assert_eq!(
            WorkflowError::from(DbError::unique("x")).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            WorkflowError::from(DbError::LockHeld("seq".into())).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            WorkflowError::from(DomainError::validation("bad")).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            WorkflowError::from(DomainError::invariant("broken")).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            WorkflowError::BillItemStatus("locked".into()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn exhausted_retries_are_internal_with_attempt_count() {
        let err: ServiceError = RetryError::Exhausted {
            attempts: 3,
            last: WorkflowError::from(DbError::unique("payment_seq")),
        }
        .into();
        assert_eq!(err.code(), "Internal");
        assert!(err.message().starts_with("gave up after 3 attempts"));
    }

    #[test]
    fn aborted_retry_keeps_underlying_code() {
        let err: ServiceError = RetryError::Aborted {
            attempt: 1,
            error: WorkflowError::from(DbError::not_found("invoice 1")),
        }
        .into();
        assert_eq!(err.code(), "NotFound");
    }
}
