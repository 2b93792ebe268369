use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{FailureRecord, FailureStatus, RecordFilter, StatusCounts};
use uuid::Uuid;

use crate::error::StoreError;

/// Durable home of failure records.
///
/// A record is "due" when `status = Failed`, `next_retry_at <= now` and
/// `retry_count < max_retries` (see [`crate::transition::is_due`]).
#[async_trait]
pub trait FailureRecordStore: Send + Sync {
    /// Insert a new record.
    async fn create(&self, record: &FailureRecord) -> Result<(), StoreError>;

    /// Fetch a record by id. Returns [`StoreError::NotFound`] if it does not exist.
    async fn find(&self, id: Uuid) -> Result<FailureRecord, StoreError>;

    /// Persist every mutable field of an existing record.
    async fn save(&self, record: &FailureRecord) -> Result<(), StoreError>;

    /// Due records, oldest `next_retry_at` first, at most `limit`.
    ///
    /// Read-only view for operator tooling. Schedulers use [`claim_due`](Self::claim_due).
    async fn query_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError>;

    /// Atomically select due records, move them from `Failed` to `Retrying`
    /// and stamp `claimed_at = now`.
    ///
    /// A record is returned by at most one concurrent caller; the returned
    /// copies already carry the claim.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError>;

    /// Move records still claimed since `cutoff` or earlier back to `Failed`.
    ///
    /// Covers claims whose attempt never landed, e.g. the scheduler died
    /// mid-batch. Returns the number released.
    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Records matching the filter, most recent `failed_at` first.
    async fn query_by_filters(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<FailureRecord>, StoreError>;

    /// Delete every record in `status`. Returns the number deleted.
    async fn delete_where(&self, status: FailureStatus) -> Result<u64, StoreError>;

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}
