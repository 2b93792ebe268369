use std::sync::Arc;

use common::{BackoffPolicy, FailureRecord, FailureStatus, MessageOrigin, StagedBackoff};
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{PublishError, RetryError};
use crate::publisher::BrokerPublisher;
use crate::store::FailureRecordStore;
use crate::transition;

/// Why a retry attempt was refused without touching the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `retry_count` already reached `max_retries`.
    MaxRetriesReached,
    /// The record is parked and needs a reset first.
    DeadLettered,
}

/// Result of [`RetryStateMachine::attempt_retry`].
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// Message re-published. Carries the advanced record.
    Published(FailureRecord),
    /// Broker refused the message; the attempt was still consumed.
    PublishFailed {
        record: FailureRecord,
        error: PublishError,
    },
    /// Not eligible. Nothing was published or persisted.
    Rejected(RejectReason),
}

impl RetryOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }

    /// The record after the attempt, if one was made.
    pub fn record(&self) -> Option<&FailureRecord> {
        match self {
            Self::Published(record) | Self::PublishFailed { record, .. } => Some(record),
            Self::Rejected(_) => None,
        }
    }
}

/// Sole writer of failure-record status transitions.
///
/// Computes each transition with the pure functions in [`crate::transition`]
/// and persists the result through the store.
pub struct RetryStateMachine {
    store: Arc<dyn FailureRecordStore>,
    publisher: Arc<dyn BrokerPublisher>,
    backoff: Arc<dyn BackoffPolicy>,
    clock: Arc<dyn Clock>,
}

impl RetryStateMachine {
    /// Staged backoff and wall-clock time.
    pub fn new(store: Arc<dyn FailureRecordStore>, publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self {
            store,
            publisher,
            backoff: Arc::new(StagedBackoff),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn FailureRecordStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Track a message whose processing failed. The only way records are created.
    pub async fn record_failure(
        &self,
        origin: MessageOrigin,
        payload: Vec<u8>,
        reason: impl Into<String>,
        max_retries: u32,
    ) -> Result<FailureRecord, RetryError> {
        validate(&origin, max_retries)?;

        let record = transition::new_failure(
            origin,
            payload,
            reason,
            max_retries,
            self.clock.now(),
            self.backoff.as_ref(),
        );
        self.store.create(&record).await?;

        info!(
            record_id = %record.id,
            queue = %record.queue_name,
            routing_key = %record.routing_key,
            max_retries,
            next_retry_at = ?record.next_retry_at,
            "Recorded failed message"
        );

        Ok(record)
    }

    /// Re-publish the record and advance its state.
    ///
    /// Publish success and publish failure take the same mutation path: the
    /// retry slot is consumed either way. `Err` is only returned when the
    /// store cannot persist the transition.
    pub async fn attempt_retry(&self, record: &FailureRecord) -> Result<RetryOutcome, RetryError> {
        if !transition::can_retry(record) {
            let reason = if record.status == FailureStatus::DeadLetter {
                RejectReason::DeadLettered
            } else {
                RejectReason::MaxRetriesReached
            };
            return Ok(RetryOutcome::Rejected(reason));
        }

        let published = self
            .publisher
            .publish(&record.routing_key, &record.payload, &record.exchange)
            .await;

        let advanced =
            transition::record_attempt(record.clone(), self.clock.now(), self.backoff.as_ref());

        if let Err(e) = self.store.save(&advanced).await {
            if published.is_ok() {
                error!(
                    record_id = %record.id,
                    error = %e,
                    "CRITICAL: message re-published but retry state was not persisted"
                );
            }
            return Err(e.into());
        }

        if advanced.status == FailureStatus::DeadLetter {
            warn!(
                record_id = %advanced.id,
                queue = %advanced.queue_name,
                retry_count = advanced.retry_count,
                "Retries exhausted, message dead-lettered"
            );
        }

        match published {
            Ok(()) => {
                info!(
                    record_id = %advanced.id,
                    routing_key = %advanced.routing_key,
                    retry_count = advanced.retry_count,
                    status = %advanced.status,
                    "Re-published failed message"
                );
                Ok(RetryOutcome::Published(advanced))
            }
            Err(error) => {
                error!(
                    record_id = %advanced.id,
                    routing_key = %advanced.routing_key,
                    exchange = %advanced.exchange,
                    retry_count = advanced.retry_count,
                    error = %error,
                    "Failed to re-publish message"
                );
                Ok(RetryOutcome::PublishFailed {
                    record: advanced,
                    error,
                })
            }
        }
    }

    /// Give up a claim whose attempt did not land. The retry slot is not consumed.
    pub async fn release(&self, record: &FailureRecord) -> Result<FailureRecord, RetryError> {
        let released = transition::release(record.clone());
        self.store.save(&released).await?;
        warn!(record_id = %released.id, "Released claim on failure record");
        Ok(released)
    }

    pub async fn force_dead_letter(
        &self,
        record: &FailureRecord,
    ) -> Result<FailureRecord, RetryError> {
        let parked = transition::force_dead_letter(record.clone());
        self.store.save(&parked).await?;
        info!(record_id = %parked.id, "Message dead-lettered on request");
        Ok(parked)
    }

    pub async fn reset(&self, record: &FailureRecord) -> Result<FailureRecord, RetryError> {
        let fresh = transition::reset(record.clone(), self.clock.now());
        self.store.save(&fresh).await?;
        info!(
            record_id = %fresh.id,
            previous_status = %record.status,
            previous_retry_count = record.retry_count,
            "Retry count reset"
        );
        Ok(fresh)
    }
}

fn validate(origin: &MessageOrigin, max_retries: u32) -> Result<(), RetryError> {
    if origin.queue_name.trim().is_empty() {
        return Err(RetryError::Validation("queue name must not be empty".into()));
    }
    if origin.routing_key.trim().is_empty() {
        return Err(RetryError::Validation("routing key must not be empty".into()));
    }
    if max_retries == 0 {
        return Err(RetryError::Validation("max_retries must be at least 1".into()));
    }
    Ok(())
}
