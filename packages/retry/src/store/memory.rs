use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{FailureRecord, FailureStatus, RecordFilter, StatusCounts};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::FailureRecordStore;
use crate::error::StoreError;
use crate::transition::{self, is_due};

/// Process-local store for tests, simulations and single-node setups.
///
/// Claims are atomic within the process because they run under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryFailureStore {
    records: RwLock<HashMap<Uuid, FailureRecord>>,
}

impl InMemoryFailureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn due_sorted(
    records: &HashMap<Uuid, FailureRecord>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Uuid> {
    let mut due: Vec<&FailureRecord> = records.values().filter(|r| is_due(r, now)).collect();
    due.sort_by_key(|r| (r.next_retry_at, r.failed_at));
    due.into_iter().take(limit).map(|r| r.id).collect()
}

#[async_trait]
impl FailureRecordStore for InMemoryFailureStore {
    async fn create(&self, record: &FailureRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<FailureRecord, StoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, record: &FailureRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    async fn query_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(due_sorted(&records, now, limit)
            .into_iter()
            .filter_map(|id| records.get(&id).cloned())
            .collect())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        let mut records = self.records.write().await;
        let ids = due_sorted(&records, now, limit);

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = records.get_mut(&id) {
                *record = transition::claim(record.clone(), now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut released = 0;
        for record in records.values_mut() {
            if transition::is_stale_claim(record, cutoff) {
                *record = transition::release(record.clone());
                released += 1;
            }
        }
        Ok(released)
    }

    async fn query_by_filters(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        let records = self.records.read().await;
        let mut result: Vec<FailureRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(result)
    }

    async fn delete_where(&self, status: FailureStatus) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.status != status);
        Ok((before - records.len()) as u64)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let records = self.records.read().await;
        let mut counts = StatusCounts::default();
        for record in records.values() {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use common::MessageOrigin;

    use super::*;

    fn record(queue: &str, failed_at: DateTime<Utc>, next_retry_at: DateTime<Utc>) -> FailureRecord {
        FailureRecord::new(
            MessageOrigin::new(queue, format!("{queue}.created"), "events"),
            b"{}".to_vec(),
            "boom",
            3,
            failed_at,
            next_retry_at,
        )
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let r = record("orders", now, now);

        store.create(&r).await.unwrap();
        assert_eq!(store.find(r.id).await.unwrap(), r);
        assert!(matches!(
            store.create(&r).await,
            Err(StoreError::AlreadyExists(id)) if id == r.id
        ));
    }

    #[tokio::test]
    async fn find_and_save_unknown_id_is_not_found() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let r = record("orders", now, now);

        assert!(matches!(store.find(r.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.save(&r).await, Err(StoreError::NotFound(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn query_due_orders_by_next_retry_and_respects_limit() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let late = record("a", now, now - TimeDelta::minutes(1));
        let early = record("b", now, now - TimeDelta::minutes(10));
        let future = record("c", now, now + TimeDelta::minutes(10));
        for r in [&late, &early, &future] {
            store.create(r).await.unwrap();
        }

        let due = store.query_due(now, 10).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let due = store.query_due(now, 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, early.id);
        assert_eq!(due[0].status, FailureStatus::Failed);
    }

    #[tokio::test]
    async fn claim_due_moves_records_to_retrying_once() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let r = record("orders", now, now);
        store.create(&r).await.unwrap();

        let claimed = store.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, FailureStatus::Retrying);
        assert_eq!(claimed[0].claimed_at, Some(now));
        assert_eq!(store.find(r.id).await.unwrap(), claimed[0]);

        assert!(store.claim_due(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_claims_return_to_the_due_set() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let old = record("orders", now, now - TimeDelta::hours(1));
        let fresh = record("orders", now, now - TimeDelta::minutes(30));
        store.create(&old).await.unwrap();
        store.create(&fresh).await.unwrap();
        store.claim_due(now - TimeDelta::minutes(20), 1).await.unwrap();
        store.claim_due(now, 1).await.unwrap();

        let released = store
            .release_stale_claims(now - TimeDelta::minutes(10))
            .await
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(store.find(old.id).await.unwrap(), old);
        assert_eq!(
            store.find(fresh.id).await.unwrap().status,
            FailureStatus::Retrying
        );

        let due = store.query_due(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, old.id);
    }

    #[tokio::test]
    async fn query_by_filters_sorts_newest_first() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        let old = record("orders", now - TimeDelta::hours(2), now);
        let new = record("orders", now, now);
        let other = record("billing", now - TimeDelta::hours(1), now);
        for r in [&old, &new, &other] {
            store.create(r).await.unwrap();
        }

        let all = store.query_by_filters(&RecordFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![new.id, other.id, old.id]);

        let orders = store
            .query_by_filters(&RecordFilter::default().queue("orders"))
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|r| r.queue_name == "orders"));
    }

    #[tokio::test]
    async fn delete_where_and_counts() {
        let store = InMemoryFailureStore::new();
        let now = Utc::now();
        for status in [
            FailureStatus::DeadLetter,
            FailureStatus::DeadLetter,
            FailureStatus::Failed,
            FailureStatus::Retrying,
        ] {
            let mut r = record("orders", now, now);
            r.status = status;
            store.create(&r).await.unwrap();
        }

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                failed: 1,
                retrying: 1,
                dead_letter: 2
            }
        );

        assert_eq!(store.delete_where(FailureStatus::DeadLetter).await.unwrap(), 2);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.count_by_status().await.unwrap().dead_letter, 0);
    }
}
