use ulid::Ulid;

use crate::model::Date;
use crate::wal::WalError;

/// How a failure should be treated by whoever called the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller's fault; report with the reason, never retry.
    InvalidRequest,
    NotFound,
    /// Storage is not accepting work right now; safe to retry with backoff.
    Unavailable,
    /// Bug or broken invariant; report generically.
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("invalid {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("availability for product {product_id} on {date} already exists")]
    AlreadyExists { product_id: Ulid, date: Date },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::InvalidRequest {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::InvalidRequest { .. }
            | StoreError::AlreadyExists { .. }
            | StoreError::LimitExceeded(_) => ErrorClass::InvalidRequest,
            StoreError::NotFound { .. } => ErrorClass::NotFound,
            StoreError::Unavailable(_) => ErrorClass::Unavailable,
            StoreError::Internal(_) => ErrorClass::Internal,
        }
    }
}

impl From<&WalError> for StoreError {
    fn from(err: &WalError) -> Self {
        match err {
            WalError::Io(e) => {
                tracing::warn!(error = %e, "WAL commit failed and was rolled back");
                StoreError::Unavailable(format!("write-ahead log: {e}"))
            }
            WalError::Encode(e) => {
                tracing::error!(error = %e, "WAL record could not be encoded");
                StoreError::Internal("write-ahead log encoding failed".into())
            }
            WalError::RollbackFailed { .. } => {
                tracing::error!(
                    error = %err,
                    "WAL rollback failed; log may hold records that were never applied"
                );
                StoreError::Internal("write-ahead log rollback failed".into())
            }
            WalError::ReopenFailed(e) => {
                tracing::error!(error = %e, "WAL could not be reopened after compaction");
                StoreError::Internal("write-ahead log lost after compaction".into())
            }
        }
    }
}
