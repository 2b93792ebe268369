//! Pure state transitions over [`FailureRecord`] values.
//!
//! ```text
//!            attempt (budget left)
//!   Failed ───────────────────────► Retrying
//!     │  ▲                              │
//!     │  └──────────── reset ───────────┤
//!     │                                 │ attempt (budget spent)
//!     └──── attempt / force ────► DeadLetter ◄──┘
//! ```
//!
//! Nothing here touches storage or the broker; [`RetryStateMachine`](crate::RetryStateMachine)
//! persists the returned values.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{BackoffPolicy, FailureRecord, FailureStatus, MessageOrigin};

/// Lower bound applied to every scheduled delay, so `next_retry_at` is always
/// strictly after the moment it was computed.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Whether another retry attempt is allowed.
pub fn can_retry(record: &FailureRecord) -> bool {
    record.retry_count < record.max_retries && record.status != FailureStatus::DeadLetter
}

/// Whether the scheduler should pick this record up at `now`.
pub fn is_due(record: &FailureRecord, now: DateTime<Utc>) -> bool {
    record.status == FailureStatus::Failed
        && record.retry_count < record.max_retries
        && record.next_retry_at.is_some_and(|at| at <= now)
}

/// A freshly failed message, first retry scheduled at `now + backoff(0)`.
pub fn new_failure(
    origin: MessageOrigin,
    payload: Vec<u8>,
    reason: impl Into<String>,
    max_retries: u32,
    now: DateTime<Utc>,
    backoff: &dyn BackoffPolicy,
) -> FailureRecord {
    FailureRecord::new(
        origin,
        payload,
        reason,
        max_retries,
        now,
        schedule(now, backoff.delay(0)),
    )
}

/// Consume one retry slot. Applied whether or not the publish succeeded.
///
/// Callers must check [`can_retry`] first.
pub fn record_attempt(
    mut record: FailureRecord,
    now: DateTime<Utc>,
    backoff: &dyn BackoffPolicy,
) -> FailureRecord {
    debug_assert!(can_retry(&record), "attempt on ineligible record {}", record.id);

    record.retry_count = (record.retry_count + 1).min(record.max_retries);
    record.last_retry_at = Some(now);
    record.claimed_at = None;

    if can_retry(&record) {
        record.next_retry_at = Some(schedule(now, backoff.delay(record.retry_count)));
        record.status = FailureStatus::Retrying;
    } else {
        record.next_retry_at = None;
        record.status = FailureStatus::DeadLetter;
    }
    record
}

/// Take a due record for an attempt. Keeps it out of the due set until the
/// attempt lands or the claim is released.
pub fn claim(mut record: FailureRecord, now: DateTime<Utc>) -> FailureRecord {
    record.status = FailureStatus::Retrying;
    record.claimed_at = Some(now);
    record
}

/// Hand a claimed record back to the due set without consuming an attempt.
pub fn release(mut record: FailureRecord) -> FailureRecord {
    record.status = FailureStatus::Failed;
    record.claimed_at = None;
    record
}

/// Whether a claim was taken at or before `cutoff` and never resolved.
pub fn is_stale_claim(record: &FailureRecord, cutoff: DateTime<Utc>) -> bool {
    record.status == FailureStatus::Retrying && record.claimed_at.is_some_and(|at| at <= cutoff)
}

/// Park a record permanently, whatever its state.
pub fn force_dead_letter(mut record: FailureRecord) -> FailureRecord {
    record.status = FailureStatus::DeadLetter;
    record.next_retry_at = None;
    record.claimed_at = None;
    record
}

/// Give a record a fresh retry budget, eligible immediately. The only way out of `DeadLetter`.
pub fn reset(mut record: FailureRecord, now: DateTime<Utc>) -> FailureRecord {
    record.retry_count = 0;
    record.status = FailureStatus::Failed;
    record.next_retry_at = Some(now);
    record.claimed_at = None;
    record
}

fn schedule(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = TimeDelta::from_std(delay.max(MIN_RETRY_DELAY)).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
