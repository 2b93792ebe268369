use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a [`FailureRecordStore`](crate::store::FailureRecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failure record not found: {0}")]
    NotFound(Uuid),

    #[error("failure record already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors raised by a [`BrokerPublisher`](crate::publisher::BrokerPublisher).
///
/// Never fatal: a failed publish still consumes a retry attempt.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload cannot be published: {0}")]
    Encoding(String),

    #[error("broker error: {0}")]
    Broker(String),
}

/// Errors surfaced by ingress and administrative operations.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Malformed input at ingress. No record was created.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("failure record not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RetryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
