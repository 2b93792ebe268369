use std::sync::Arc;
use std::time::Duration;

use common::{
    FailureRecord, FailureStatus, MessageOrigin, RecordFilter, RetryStatistics,
};
use tracing::info;
use uuid::Uuid;

use crate::error::RetryError;
use crate::machine::{RetryOutcome, RetryStateMachine};
use crate::scheduler::{BatchReport, RetryScheduler};
use crate::store::FailureRecordStore;

/// Result of [`RetryService::force_retry`].
#[derive(Debug, Clone)]
pub struct ForceRetry {
    /// The record as it was before anything was done to it.
    pub previous: FailureRecord,
    /// Whether the retry count was reset before the attempt.
    pub reset: bool,
    pub outcome: RetryOutcome,
}

/// Retry budget for new records when the caller does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Entry point for consumers and operator tooling.
pub struct RetryService {
    machine: Arc<RetryStateMachine>,
    scheduler: RetryScheduler,
    default_max_retries: u32,
}

impl RetryService {
    pub fn new(machine: RetryStateMachine) -> Self {
        let machine = Arc::new(machine);
        Self {
            scheduler: RetryScheduler::new(machine.clone()),
            machine,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Budget used by [`record_default_failure`](Self::record_default_failure).
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.scheduler = RetryScheduler::new(self.machine.clone()).with_claim_timeout(claim_timeout);
        self
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    pub fn machine(&self) -> &Arc<RetryStateMachine> {
        &self.machine
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    fn store(&self) -> &Arc<dyn FailureRecordStore> {
        self.machine.store()
    }

    /// Ingress for consumers whose message handling failed.
    pub async fn record_failure(
        &self,
        origin: MessageOrigin,
        payload: Vec<u8>,
        reason: impl Into<String>,
        max_retries: u32,
    ) -> Result<FailureRecord, RetryError> {
        self.machine
            .record_failure(origin, payload, reason, max_retries)
            .await
    }

    /// Like [`record_failure`](Self::record_failure) with the configured default budget.
    pub async fn record_default_failure(
        &self,
        origin: MessageOrigin,
        payload: Vec<u8>,
        reason: impl Into<String>,
    ) -> Result<FailureRecord, RetryError> {
        self.record_failure(origin, payload, reason, self.default_max_retries)
            .await
    }

    /// Records the next pass would replay, without claiming them.
    pub async fn pending(&self, limit: usize) -> Result<Vec<FailureRecord>, RetryError> {
        let now = self.machine.clock().now();
        Ok(self.store().query_due(now, limit).await?)
    }

    /// Run one scheduler pass. Returns the number of messages re-published.
    pub async fn process_retry_queue(&self, limit: usize) -> Result<usize, RetryError> {
        self.scheduler.process_due(limit).await
    }

    pub async fn process_retry_batch(&self, limit: usize) -> Result<BatchReport, RetryError> {
        self.scheduler.run_batch(limit).await
    }

    /// Records matching the filter, most recently failed first.
    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<FailureRecord>, RetryError> {
        Ok(self.store().query_by_filters(filter).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<FailureRecord, RetryError> {
        Ok(self.store().find(id).await?)
    }

    /// Retry one record now, regardless of its schedule.
    ///
    /// With `reset_count` the record first gets a fresh retry budget, which
    /// also revives dead-lettered records. Without it, an exhausted or
    /// dead-lettered record yields [`RetryOutcome::Rejected`].
    pub async fn force_retry(&self, id: Uuid, reset_count: bool) -> Result<ForceRetry, RetryError> {
        let previous = self.store().find(id).await?;

        let record = if reset_count {
            self.machine.reset(&previous).await?
        } else {
            previous.clone()
        };

        let outcome = self.machine.attempt_retry(&record).await?;
        Ok(ForceRetry {
            previous,
            reset: reset_count,
            outcome,
        })
    }

    /// Park a record regardless of its remaining budget.
    pub async fn dead_letter(&self, id: Uuid) -> Result<FailureRecord, RetryError> {
        let record = self.store().find(id).await?;
        self.machine.force_dead_letter(&record).await
    }

    /// Delete every dead-lettered record. Returns the number deleted.
    pub async fn purge_dead_letters(&self) -> Result<u64, RetryError> {
        let deleted = self.store().delete_where(FailureStatus::DeadLetter).await?;
        info!(deleted, "Purged dead letter messages");
        Ok(deleted)
    }

    pub async fn statistics(&self) -> Result<RetryStatistics, RetryError> {
        Ok(self.store().count_by_status().await?.into())
    }
}
