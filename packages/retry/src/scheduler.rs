use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::FailureRecord;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::RetryError;
use crate::machine::{RetryOutcome, RetryStateMachine};

/// How long a claim may stay unresolved before the scheduler hands it back.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(300);

/// Shortest pause between two scheduler passes.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Stale claims handed back before the pass started.
    pub released: usize,
    /// Records claimed from the store.
    pub claimed: usize,
    /// Re-published successfully.
    pub published: usize,
    /// Attempt consumed but the broker refused the message.
    pub publish_failed: usize,
    /// Moved to dead letter by this pass.
    pub dead_lettered: usize,
    /// Could not be persisted after the attempt.
    pub errors: usize,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.released == 0 && self.claimed == 0 && self.errors == 0
    }
}

/// Replays due failure records in bounded, sequential batches.
///
/// Each record is claimed in the store right before its attempt, so scheduler
/// instances sharing a store never replay the same record twice. A claim
/// whose attempt cannot be persisted is released again, and claims left
/// behind by a crashed scheduler are released once they are older than the
/// claim timeout.
pub struct RetryScheduler {
    machine: Arc<RetryStateMachine>,
    claim_timeout: Duration,
}

impl RetryScheduler {
    pub fn new(machine: Arc<RetryStateMachine>) -> Self {
        Self {
            machine,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }

    /// Must exceed the longest publish, or live claims get released.
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    pub fn machine(&self) -> &Arc<RetryStateMachine> {
        &self.machine
    }

    /// Replay up to `limit` due records. Returns how many were re-published successfully.
    pub async fn process_due(&self, limit: usize) -> Result<usize, RetryError> {
        Ok(self.run_batch(limit).await?.published)
    }

    /// Like [`process_due`](Self::process_due) with the full breakdown.
    ///
    /// Only a failing first claim aborts the pass. Publish and persistence
    /// errors on individual records are logged and the remaining records
    /// still run.
    pub async fn run_batch(&self, limit: usize) -> Result<BatchReport, RetryError> {
        let store = self.machine.store();
        let mut report = BatchReport::default();

        let cutoff = stale_cutoff(self.machine.clock().now(), self.claim_timeout);
        match store.release_stale_claims(cutoff).await {
            Ok(0) => {}
            Ok(released) => {
                warn!(released, "Released stale retry claims");
                report.released = usize::try_from(released).unwrap_or(usize::MAX);
            }
            Err(e) => error!(error = %e, "Failed to release stale retry claims"),
        }

        // Released only after the loop, so this pass does not claim them again.
        let mut unresolved: Vec<FailureRecord> = Vec::new();

        while report.claimed < limit {
            let record = match store.claim_due(self.machine.clock().now(), 1).await {
                Ok(mut claimed) => match claimed.pop() {
                    Some(record) => record,
                    None => break,
                },
                Err(e) if report.claimed == 0 => return Err(e.into()),
                Err(e) => {
                    error!(error = %e, "Failed to claim next record, ending batch early");
                    report.errors += 1;
                    break;
                }
            };
            report.claimed += 1;

            match self.machine.attempt_retry(&record).await {
                Ok(outcome) => {
                    if outcome
                        .record()
                        .is_some_and(|r| r.status.is_terminal())
                    {
                        report.dead_lettered += 1;
                    }
                    match outcome {
                        RetryOutcome::Published(_) => report.published += 1,
                        RetryOutcome::PublishFailed { .. } => report.publish_failed += 1,
                        RetryOutcome::Rejected(_) => unresolved.push(record),
                    }
                }
                Err(e) => {
                    error!(record_id = %record.id, error = %e, "Retry attempt failed");
                    report.errors += 1;
                    unresolved.push(record);
                }
            }
        }

        for record in &unresolved {
            if let Err(e) = self.machine.release(record).await {
                error!(
                    record_id = %record.id,
                    error = %e,
                    "Failed to release claim, left for the stale-claim sweep"
                );
            }
        }

        Ok(report)
    }
}

fn stale_cutoff(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Run the retry scheduler as a background task.
///
/// Passes never overlap: the next tick is awaited only after the current
/// batch has finished. `interval` is raised to [`MIN_SCAN_INTERVAL`].
pub async fn run_retry_scheduler(scheduler: Arc<RetryScheduler>, limit: usize, interval: Duration) {
    let interval = interval.max(MIN_SCAN_INTERVAL);
    info!(
        limit,
        interval_secs = interval.as_secs(),
        claim_timeout_secs = scheduler.claim_timeout.as_secs(),
        "Starting retry scheduler"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match scheduler.run_batch(limit).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => info!(
                released = report.released,
                claimed = report.claimed,
                published = report.published,
                publish_failed = report.publish_failed,
                dead_lettered = report.dead_lettered,
                errors = report.errors,
                "Processed retry batch"
            ),
            Err(e) => error!(error = %e, "Retry batch failed"),
        }
    }
}
