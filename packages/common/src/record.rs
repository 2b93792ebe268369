use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::FailureStatus;

/// Where a message was consumed from, and where it is replayed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOrigin {
    pub queue_name: String,
    pub routing_key: String,
    /// May be empty for brokers without exchanges (default exchange).
    pub exchange: String,
}

impl MessageOrigin {
    pub fn new(
        queue_name: impl Into<String>,
        routing_key: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            routing_key: routing_key.into(),
            exchange: exchange.into(),
        }
    }
}

/// A message that failed processing, tracked until it is replayed or dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub queue_name: String,
    pub routing_key: String,
    pub exchange: String,
    /// Message body as it was consumed, stored as-is.
    pub payload: Vec<u8>,
    /// Captured error with its cause chain.
    pub failure_reason: String,
    pub retry_count: u32,
    /// Fixed at creation.
    pub max_retries: u32,
    /// Fixed at creation.
    pub failed_at: DateTime<Utc>,
    /// Only ever set by a retry attempt.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// `None` once dead-lettered.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: FailureStatus,
    /// When a scheduler took the record for an attempt. Cleared by the attempt.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl FailureRecord {
    /// Create a fresh record in `Failed` state with a new random id.
    pub fn new(
        origin: MessageOrigin,
        payload: Vec<u8>,
        failure_reason: impl Into<String>,
        max_retries: u32,
        failed_at: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue_name: origin.queue_name,
            routing_key: origin.routing_key,
            exchange: origin.exchange,
            payload,
            failure_reason: failure_reason.into(),
            retry_count: 0,
            max_retries,
            failed_at,
            last_retry_at: None,
            next_retry_at: Some(next_retry_at),
            status: FailureStatus::Failed,
            claimed_at: None,
        }
    }

    pub fn origin(&self) -> MessageOrigin {
        MessageOrigin::new(&self.queue_name, &self.routing_key, &self.exchange)
    }
}

/// Optional filters for listing failure records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub queue_name: Option<String>,
    pub status: Option<FailureStatus>,
}

impl RecordFilter {
    pub fn queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn status(mut self, status: FailureStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &FailureRecord) -> bool {
        self.queue_name
            .as_deref()
            .is_none_or(|q| record.queue_name == q)
            && self.status.is_none_or(|s| record.status == s)
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub failed: u64,
    pub retrying: u64,
    pub dead_letter: u64,
}

impl StatusCounts {
    pub fn get(&self, status: FailureStatus) -> u64 {
        match status {
            FailureStatus::Failed => self.failed,
            FailureStatus::Retrying => self.retrying,
            FailureStatus::DeadLetter => self.dead_letter,
        }
    }

    pub fn add(&mut self, status: FailureStatus, count: u64) {
        match status {
            FailureStatus::Failed => self.failed += count,
            FailureStatus::Retrying => self.retrying += count,
            FailureStatus::DeadLetter => self.dead_letter += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.failed + self.retrying + self.dead_letter
    }
}

/// Aggregate view over the failure store.
///
/// Serializes as `{"total": n, "by_status": {"failed": .., "retrying": .., "dead_letter": ..}}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStatistics {
    pub total: u64,
    pub by_status: StatusCounts,
}

impl From<StatusCounts> for RetryStatistics {
    fn from(by_status: StatusCounts) -> Self {
        Self {
            total: by_status.total(),
            by_status,
        }
    }
}
