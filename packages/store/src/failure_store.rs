use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{FailureRecord, FailureStatus, RecordFilter, StatusCounts};
use retry::{FailureRecordStore, StoreError};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Select, Set, SqlErr,
};
use tracing::debug;
use uuid::Uuid;

use crate::entity::failed_message;

/// [`FailureRecordStore`] backed by a SQL database through SeaORM.
///
/// Safe to share between worker processes: [`claim_due`](FailureRecordStore::claim_due)
/// flips each row with a conditional `UPDATE`, so a record is claimed by at most one caller.
/// The claim stamps `claimed_at`, which the stale-claim sweep compares against.
#[derive(Debug, Clone)]
pub struct SeaOrmFailureStore {
    db: DatabaseConnection,
}

impl SeaOrmFailureStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl From<failed_message::Model> for FailureRecord {
    fn from(m: failed_message::Model) -> Self {
        Self {
            id: m.id,
            queue_name: m.queue_name,
            routing_key: m.routing_key,
            exchange: m.exchange,
            payload: m.payload,
            failure_reason: m.failure_reason,
            retry_count: u32::try_from(m.retry_count).unwrap_or_default(),
            max_retries: u32::try_from(m.max_retries).unwrap_or_default(),
            failed_at: m.failed_at,
            last_retry_at: m.last_retry_at,
            next_retry_at: m.next_retry_at,
            status: m.status,
            claimed_at: m.claimed_at,
        }
    }
}

fn active_model(record: &FailureRecord) -> failed_message::ActiveModel {
    failed_message::ActiveModel {
        id: Set(record.id),
        queue_name: Set(record.queue_name.clone()),
        routing_key: Set(record.routing_key.clone()),
        exchange: Set(record.exchange.clone()),
        payload: Set(record.payload.clone()),
        failure_reason: Set(record.failure_reason.clone()),
        retry_count: Set(to_i32(record.retry_count)),
        max_retries: Set(to_i32(record.max_retries)),
        failed_at: Set(record.failed_at),
        last_retry_at: Set(record.last_retry_at),
        next_retry_at: Set(record.next_retry_at),
        status: Set(record.status),
        claimed_at: Set(record.claimed_at),
    }
}

/// `status = failed AND next_retry_at <= now AND retry_count < max_retries`
fn due(now: DateTime<Utc>, limit: usize) -> Select<failed_message::Entity> {
    failed_message::Entity::find()
        .filter(failed_message::Column::Status.eq(FailureStatus::Failed))
        .filter(failed_message::Column::NextRetryAt.lte(now))
        .filter(
            Expr::col(failed_message::Column::RetryCount)
                .lt(Expr::col(failed_message::Column::MaxRetries)),
        )
        .order_by_asc(failed_message::Column::NextRetryAt)
        .order_by_asc(failed_message::Column::FailedAt)
        .limit(limit as u64)
}

#[async_trait]
impl FailureRecordStore for SeaOrmFailureStore {
    async fn create(&self, record: &FailureRecord) -> Result<(), StoreError> {
        match failed_message::Entity::insert(active_model(record))
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(StoreError::AlreadyExists(record.id))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn find(&self, id: Uuid) -> Result<FailureRecord, StoreError> {
        failed_message::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(FailureRecord::from)
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, record: &FailureRecord) -> Result<(), StoreError> {
        let result = failed_message::Entity::update_many()
            .col_expr(
                failed_message::Column::RetryCount,
                Expr::value(to_i32(record.retry_count)),
            )
            .col_expr(
                failed_message::Column::LastRetryAt,
                Expr::value(record.last_retry_at),
            )
            .col_expr(
                failed_message::Column::NextRetryAt,
                Expr::value(record.next_retry_at),
            )
            .col_expr(failed_message::Column::Status, Expr::value(record.status))
            .col_expr(
                failed_message::Column::ClaimedAt,
                Expr::value(record.claimed_at),
            )
            .col_expr(
                failed_message::Column::FailureReason,
                Expr::value(record.failure_reason.clone()),
            )
            .filter(failed_message::Column::Id.eq(record.id))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(record.id));
        }
        Ok(())
    }

    async fn query_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        let rows = due(now, limit).all(&self.db).await.map_err(backend)?;
        Ok(rows.into_iter().map(FailureRecord::from).collect())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        let candidates: Vec<Uuid> = due(now, limit)
            .select_only()
            .column(failed_message::Column::Id)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(backend)?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let result = failed_message::Entity::update_many()
                .col_expr(
                    failed_message::Column::Status,
                    Expr::value(FailureStatus::Retrying),
                )
                .col_expr(failed_message::Column::ClaimedAt, Expr::value(Some(now)))
                .filter(failed_message::Column::Id.eq(id))
                .filter(failed_message::Column::Status.eq(FailureStatus::Failed))
                .exec(&self.db)
                .await
                .map_err(backend)?;

            if result.rows_affected == 1 {
                claimed.push(id);
            } else {
                debug!(record_id = %id, "Record claimed by another scheduler");
            }
        }

        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let rows = failed_message::Entity::find()
            .filter(failed_message::Column::Id.is_in(claimed))
            .order_by_asc(failed_message::Column::NextRetryAt)
            .order_by_asc(failed_message::Column::FailedAt)
            .all(&self.db)
            .await
            .map_err(backend)?;

        Ok(rows.into_iter().map(FailureRecord::from).collect())
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = failed_message::Entity::update_many()
            .col_expr(
                failed_message::Column::Status,
                Expr::value(FailureStatus::Failed),
            )
            .col_expr(
                failed_message::Column::ClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(failed_message::Column::Status.eq(FailureStatus::Retrying))
            .filter(failed_message::Column::ClaimedAt.lte(cutoff))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected)
    }

    async fn query_by_filters(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<FailureRecord>, StoreError> {
        let mut query = failed_message::Entity::find();

        if let Some(queue) = &filter.queue_name {
            query = query.filter(failed_message::Column::QueueName.eq(queue.as_str()));
        }

        if let Some(status) = filter.status {
            query = query.filter(failed_message::Column::Status.eq(status));
        }

        let rows = query
            .order_by_desc(failed_message::Column::FailedAt)
            .all(&self.db)
            .await
            .map_err(backend)?;

        Ok(rows.into_iter().map(FailureRecord::from).collect())
    }

    async fn delete_where(&self, status: FailureStatus) -> Result<u64, StoreError> {
        let result = failed_message::Entity::delete_many()
            .filter(failed_message::Column::Status.eq(status))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(FailureStatus, i64)> = failed_message::Entity::find()
            .select_only()
            .column(failed_message::Column::Status)
            .column_as(failed_message::Column::Id.count(), "count")
            .group_by(failed_message::Column::Status)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(backend)?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }
}
