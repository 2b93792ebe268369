//! In-process doubles for the broker and store seams.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{FailureRecord, FailureStatus, RecordFilter, StatusCounts};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{PublishError, StoreError};
use crate::publisher::BrokerPublisher;
use crate::store::{FailureRecordStore, InMemoryFailureStore};

/// A message handed to [`StubPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub exchange: String,
    pub payload: Vec<u8>,
}

/// Publisher that records every call and fails on demand.
#[derive(Debug, Default)]
pub struct StubPublisher {
    fail_all: bool,
    fail_routing_keys: HashSet<String>,
    published: Mutex<Vec<PublishedMessage>>,
    attempts: Mutex<usize>,
}

impl StubPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails with a broker error.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Fail only for messages routed to `routing_key`.
    pub fn failing_for(mut self, routing_key: impl Into<String>) -> Self {
        self.fail_routing_keys.insert(routing_key.into());
        self
    }

    /// Successfully published messages, in order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Publish calls including failed ones.
    pub async fn attempts(&self) -> usize {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl BrokerPublisher for StubPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        exchange: &str,
    ) -> Result<(), PublishError> {
        *self.attempts.lock().await += 1;

        if self.fail_all || self.fail_routing_keys.contains(routing_key) {
            return Err(PublishError::Broker(format!(
                "stub broker rejected message for '{routing_key}'"
            )));
        }

        self.published.lock().await.push(PublishedMessage {
            routing_key: routing_key.to_string(),
            exchange: exchange.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// In-memory store whose `save` can be made to fail, for exercising
/// persistence errors after a publish.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryFailureStore,
    failing_saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `save`.
    pub fn fail_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Let every following `save` through.
    pub fn heal(&self) {
        self.failing_saves.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl FailureRecordStore for FlakyStore {
    async fn create(&self, record: &FailureRecord) -> Result<(), StoreError> {
        self.inner.create(record).await
    }

    async fn find(&self, id: Uuid) -> Result<FailureRecord, StoreError> {
        self.inner.find(id).await
    }

    async fn save(&self, record: &FailureRecord) -> Result<(), StoreError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend("store unavailable".into()));
        }
        self.inner.save(record).await
    }

    async fn query_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        self.inner.query_due(now, limit).await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        self.inner.claim_due(now, limit).await
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.release_stale_claims(cutoff).await
    }

    async fn query_by_filters(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        self.inner.query_by_filters(filter).await
    }

    async fn delete_where(&self, status: FailureStatus) -> Result<u64, StoreError> {
        self.inner.delete_where(status).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        self.inner.count_by_status().await
    }
}
