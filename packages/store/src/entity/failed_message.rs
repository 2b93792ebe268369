use common::FailureStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A consumed message whose processing failed, with its retry schedule.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "failed_message")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub queue_name: String,

    pub routing_key: String,

    /// Empty for brokers without exchanges.
    pub exchange: String,

    pub payload: Vec<u8>,

    #[sea_orm(column_type = "Text")]
    pub failure_reason: String,

    pub retry_count: i32,

    pub max_retries: i32,

    pub failed_at: DateTimeUtc,

    pub last_retry_at: Option<DateTimeUtc>,

    #[sea_orm(indexed)]
    pub next_retry_at: Option<DateTimeUtc>,

    #[sea_orm(indexed)]
    pub status: FailureStatus,

    /// Set while a scheduler holds the row for an attempt.
    #[sea_orm(indexed)]
    pub claimed_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
