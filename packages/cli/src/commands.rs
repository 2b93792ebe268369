use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use chrono::{DateTime, Utc};
use common::{FailureRecord, FailureStatus, RecordFilter};
use console::{Alignment, pad_str, style};
use retry::{RetryError, RetryOutcome, RetryService};
use uuid::Uuid;

/// Whether a command did what was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failure => ExitCode::FAILURE,
        }
    }
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn render_table(out: &mut impl Write, headers: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .map(|r| console::measure_text_width(&r[i]))
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or_default()
        })
        .collect();

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| pad_str(c, *w, Alignment::Left, None).into_owned())
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    writeln!(
        out,
        "{}",
        style(line(headers.iter().map(|h| h.to_string()).collect())).bold()
    )?;
    writeln!(
        out,
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ")
    )?;
    for row in rows {
        writeln!(out, "{}", line(row.clone()))?;
    }
    Ok(())
}

fn record_row(record: &FailureRecord) -> Vec<String> {
    vec![
        record.id.to_string(),
        record.queue_name.clone(),
        record.routing_key.clone(),
        record.status.to_string(),
        format!("{}/{}", record.retry_count, record.max_retries),
        format_time(Some(record.failed_at)),
        format_time(record.next_retry_at),
    ]
}

/// `failed`: table of tracked failures, newest first.
pub async fn list_failed(
    service: &RetryService,
    out: &mut impl Write,
    queue: Option<String>,
    status: Option<FailureStatus>,
) -> anyhow::Result<Outcome> {
    let filter = RecordFilter {
        queue_name: queue,
        status,
    };
    let records = service
        .list(&filter)
        .await
        .context("Failed to list failed messages")?;

    if records.is_empty() {
        writeln!(out, "No failed messages found.")?;
        return Ok(Outcome::Success);
    }

    let rows: Vec<Vec<String>> = records.iter().map(record_row).collect();
    render_table(out, &RECORD_HEADERS, &rows)?;
    writeln!(out)?;
    writeln!(out, "Total: {} failed messages", records.len())?;
    Ok(Outcome::Success)
}

const RECORD_HEADERS: [&str; 7] = [
    "ID",
    "Queue",
    "Routing Key",
    "Status",
    "Retries",
    "Failed At",
    "Next Retry",
];

/// `retry-failed --dry-run`: what the next pass would replay.
pub async fn list_pending(
    service: &RetryService,
    out: &mut impl Write,
    limit: usize,
) -> anyhow::Result<Outcome> {
    let records = service
        .pending(limit)
        .await
        .context("Failed to load messages ready for retry")?;

    if records.is_empty() {
        writeln!(out, "No failed messages ready for retry.")?;
        return Ok(Outcome::Success);
    }

    let rows: Vec<Vec<String>> = records.iter().map(record_row).collect();
    render_table(out, &RECORD_HEADERS, &rows)?;
    writeln!(out)?;
    writeln!(out, "{} failed messages ready for retry.", records.len())?;
    Ok(Outcome::Success)
}

/// `retry-failed`: one scheduler pass.
pub async fn retry_failed(
    service: &RetryService,
    out: &mut impl Write,
    limit: usize,
) -> anyhow::Result<Outcome> {
    writeln!(out, "Processing failed messages for retry...")?;

    let processed = service
        .process_retry_queue(limit)
        .await
        .context("Failed to process retry queue")?;

    if processed > 0 {
        writeln!(
            out,
            "{}",
            style(format!(
                "Successfully processed {processed} failed messages for retry."
            ))
            .green()
        )?;
    } else {
        writeln!(out, "No failed messages ready for retry.")?;
    }
    Ok(Outcome::Success)
}

/// `force-retry`: replay one record now.
pub async fn force_retry(
    service: &RetryService,
    out: &mut impl Write,
    id: Uuid,
    reset_count: bool,
) -> anyhow::Result<Outcome> {
    let result = match service.force_retry(id, reset_count).await {
        Ok(result) => result,
        Err(RetryError::NotFound(_)) => {
            writeln!(
                out,
                "{}",
                style(format!("Failed message with ID {id} not found.")).red()
            )?;
            return Ok(Outcome::Failure);
        }
        Err(e) => return Err(e).context("Failed to retry message"),
    };

    if result.reset {
        writeln!(out, "Reset retry count to 0.")?;
    }

    let record = match result.outcome {
        RetryOutcome::Rejected(_) => {
            writeln!(
                out,
                "{}",
                style("Message has exceeded maximum retries. Use --reset-count to force retry.")
                    .red()
            )?;
            return Ok(Outcome::Failure);
        }
        RetryOutcome::Published(ref record) | RetryOutcome::PublishFailed { ref record, .. } => {
            record
        }
    };

    writeln!(out, "Attempting to retry message ID: {id}")?;
    writeln!(out, "Queue: {}", record.queue_name)?;
    writeln!(out, "Routing Key: {}", record.routing_key)?;

    if result.outcome.is_published() {
        writeln!(
            out,
            "{}",
            style("Message successfully queued for retry.").green()
        )?;
        Ok(Outcome::Success)
    } else {
        writeln!(
            out,
            "{}",
            style("Failed to retry message. Check logs for details.").red()
        )?;
        Ok(Outcome::Failure)
    }
}

/// Ask before deleting, unless `--force` was given.
pub fn confirm_purge(force: bool) -> anyhow::Result<bool> {
    if force {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt("This will permanently delete all dead letter messages. Continue?")
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// `purge-dead-letters`: delete every dead-lettered record.
pub async fn purge_dead_letters(
    service: &RetryService,
    out: &mut impl Write,
    confirmed: bool,
) -> anyhow::Result<Outcome> {
    if !confirmed {
        writeln!(out, "Operation cancelled.")?;
        return Ok(Outcome::Success);
    }

    let deleted = service
        .purge_dead_letters()
        .await
        .context("Failed to purge dead letter messages")?;

    writeln!(out, "Purged {deleted} dead letter messages.")?;
    Ok(Outcome::Success)
}

/// `stats`: counts per status, as text or JSON.
pub async fn stats(
    service: &RetryService,
    out: &mut impl Write,
    json: bool,
) -> anyhow::Result<Outcome> {
    let stats = service
        .statistics()
        .await
        .context("Failed to load statistics")?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        return Ok(Outcome::Success);
    }

    writeln!(out, "{}", style("Failed message statistics").bold())?;
    for status in FailureStatus::ALL {
        let label = format!("{}:", status.label());
        writeln!(
            out,
            "  {} {}",
            pad_str(&label, 12, Alignment::Left, None),
            stats.by_status.get(*status)
        )?;
    }
    writeln!(
        out,
        "  {} {}",
        pad_str("Total:", 12, Alignment::Left, None),
        stats.total
    )?;
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common::MessageOrigin;
    use retry::testing::StubPublisher;
    use retry::{InMemoryFailureStore, ManualClock, RetryStateMachine};

    use super::*;

    struct TestApp {
        clock: Arc<ManualClock>,
        publisher: Arc<StubPublisher>,
        service: RetryService,
    }

    impl TestApp {
        fn spawn(publisher: StubPublisher) -> Self {
            console::set_colors_enabled(false);
            let publisher = Arc::new(publisher);
            let clock = Arc::new(ManualClock::starting_now());
            let machine = RetryStateMachine::new(InMemoryFailureStore::arc(), publisher.clone())
                .with_clock(clock.clone());
            Self {
                clock,
                publisher,
                service: RetryService::new(machine),
            }
        }

        async fn fail(&self, queue: &str, max_retries: u32) -> FailureRecord {
            self.service
                .record_failure(
                    MessageOrigin::new(queue, format!("{queue}.routing"), "test-exchange"),
                    br#"{"test": "data"}"#.to_vec(),
                    "Exception: Test error",
                    max_retries,
                )
                .await
                .unwrap()
        }
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn failed_lists_records_with_total() {
        let app = TestApp::spawn(StubPublisher::new());
        let first = app.fail("queue-1", 3).await;
        app.fail("queue-2", 3).await;

        let mut buf = Vec::new();
        let outcome = list_failed(&app.service, &mut buf, None, None).await.unwrap();
        let text = output(buf);

        assert_eq!(outcome, Outcome::Success);
        assert!(text.contains("Routing Key"));
        assert!(text.contains(&first.id.to_string()));
        assert!(text.contains("queue-1.routing"));
        assert!(text.contains("0/3"));
        assert!(text.contains("Total: 2 failed messages"));
    }

    #[tokio::test]
    async fn failed_filters_by_queue_and_status() {
        let app = TestApp::spawn(StubPublisher::new());
        app.fail("queue-1", 3).await;
        app.fail("queue-2", 3).await;

        let mut buf = Vec::new();
        list_failed(&app.service, &mut buf, Some("queue-1".into()), None)
            .await
            .unwrap();
        let text = output(buf);
        assert!(text.contains("queue-1"));
        assert!(!text.contains("queue-2"));
        assert!(text.contains("Total: 1 failed messages"));

        let mut buf = Vec::new();
        list_failed(
            &app.service,
            &mut buf,
            None,
            Some(FailureStatus::DeadLetter),
        )
        .await
        .unwrap();
        assert!(output(buf).contains("No failed messages found."));
    }

    #[tokio::test]
    async fn dead_letters_show_no_next_retry() {
        let app = TestApp::spawn(StubPublisher::new());
        let record = app.fail("queue-1", 3).await;
        app.service.dead_letter(record.id).await.unwrap();

        let mut buf = Vec::new();
        list_failed(&app.service, &mut buf, None, None).await.unwrap();
        let text = output(buf);
        assert!(text.contains("dead_letter"));
        assert!(text.contains("N/A"));
    }

    #[tokio::test]
    async fn retry_failed_reports_processed_count() {
        let app = TestApp::spawn(StubPublisher::new());
        app.fail("queue-1", 3).await;
        app.fail("queue-1", 3).await;

        let mut buf = Vec::new();
        retry_failed(&app.service, &mut buf, 100).await.unwrap();
        assert!(output(buf).contains("No failed messages ready for retry."));

        app.clock.advance(Duration::from_secs(60));
        let mut buf = Vec::new();
        retry_failed(&app.service, &mut buf, 100).await.unwrap();
        assert!(output(buf).contains("Successfully processed 2 failed messages for retry."));
    }

    #[tokio::test]
    async fn dry_run_lists_due_messages_without_publishing() {
        let app = TestApp::spawn(StubPublisher::new());
        let due = app.fail("queue-1", 3).await;

        let mut buf = Vec::new();
        list_pending(&app.service, &mut buf, 100).await.unwrap();
        assert!(output(buf).contains("No failed messages ready for retry."));

        app.clock.advance(Duration::from_secs(60));
        let mut buf = Vec::new();
        let outcome = list_pending(&app.service, &mut buf, 100).await.unwrap();
        let text = output(buf);

        assert_eq!(outcome, Outcome::Success);
        assert!(text.contains(&due.id.to_string()));
        assert!(text.contains("1 failed messages ready for retry."));
        assert_eq!(app.publisher.attempts().await, 0);
        assert_eq!(app.service.get(due.id).await.unwrap(), due);
    }

    #[tokio::test]
    async fn force_retry_publishes_immediately() {
        let app = TestApp::spawn(StubPublisher::new());
        let record = app.fail("queue-1", 3).await;

        let mut buf = Vec::new();
        let outcome = force_retry(&app.service, &mut buf, record.id, false)
            .await
            .unwrap();
        let text = output(buf);

        assert_eq!(outcome, Outcome::Success);
        assert!(text.contains("Queue: queue-1"));
        assert!(text.contains("Routing Key: queue-1.routing"));
        assert!(text.contains("Message successfully queued for retry."));
        assert!(!text.contains("Reset retry count"));

        let stored = app.service.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, FailureStatus::Retrying);
        assert_eq!(app.publisher.published().await.len(), 1);
    }

    #[tokio::test]
    async fn force_retry_refuses_exhausted_message_without_reset() {
        let app = TestApp::spawn(StubPublisher::new());
        let record = app.fail("queue-1", 1).await;
        force_retry(&app.service, &mut Vec::<u8>::new(), record.id, false)
            .await
            .unwrap();

        let mut buf = Vec::new();
        let outcome = force_retry(&app.service, &mut buf, record.id, false)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Failure);
        assert!(output(buf).contains(
            "Message has exceeded maximum retries. Use --reset-count to force retry."
        ));
        assert_eq!(app.publisher.published().await.len(), 1);
    }

    #[tokio::test]
    async fn force_retry_with_reset_revives_dead_letter() {
        let app = TestApp::spawn(StubPublisher::new());
        let record = app.fail("queue-1", 3).await;
        app.service.dead_letter(record.id).await.unwrap();

        let mut buf = Vec::new();
        let outcome = force_retry(&app.service, &mut buf, record.id, true)
            .await
            .unwrap();
        let text = output(buf);

        assert_eq!(outcome, Outcome::Success);
        assert!(text.contains("Reset retry count to 0."));
        assert!(text.contains("Message successfully queued for retry."));

        let stored = app.service.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, FailureStatus::Retrying);
    }

    #[tokio::test]
    async fn force_retry_unknown_id_fails() {
        let app = TestApp::spawn(StubPublisher::new());
        let id = Uuid::new_v4();

        let mut buf = Vec::new();
        let outcome = force_retry(&app.service, &mut buf, id, false).await.unwrap();
        assert_eq!(outcome, Outcome::Failure);
        assert!(output(buf).contains(&format!("Failed message with ID {id} not found.")));
    }

    #[tokio::test]
    async fn force_retry_reports_publish_failure() {
        let app = TestApp::spawn(StubPublisher::failing());
        let record = app.fail("queue-1", 3).await;

        let mut buf = Vec::new();
        let outcome = force_retry(&app.service, &mut buf, record.id, false)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Failure);
        assert!(output(buf).contains("Failed to retry message. Check logs for details."));
        assert_eq!(app.service.get(record.id).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn purge_deletes_only_dead_letters() {
        let app = TestApp::spawn(StubPublisher::new());
        for _ in 0..2 {
            let r = app.fail("queue-1", 3).await;
            app.service.dead_letter(r.id).await.unwrap();
        }
        let survivor = app.fail("queue-1", 3).await;

        let mut buf = Vec::new();
        purge_dead_letters(&app.service, &mut buf, true).await.unwrap();
        assert!(output(buf).contains("Purged 2 dead letter messages."));

        let remaining = app.service.list(&RecordFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, survivor.id);
    }

    #[tokio::test]
    async fn purge_can_be_cancelled() {
        let app = TestApp::spawn(StubPublisher::new());
        let r = app.fail("queue-1", 3).await;
        app.service.dead_letter(r.id).await.unwrap();

        let mut buf = Vec::new();
        purge_dead_letters(&app.service, &mut buf, false).await.unwrap();
        assert!(output(buf).contains("Operation cancelled."));
        assert_eq!(app.service.statistics().await.unwrap().by_status.dead_letter, 1);
    }

    #[test]
    fn forced_purge_skips_the_prompt() {
        assert!(confirm_purge(true).unwrap());
    }

    #[tokio::test]
    async fn stats_as_text_and_json() {
        let app = TestApp::spawn(StubPublisher::new());
        app.fail("queue-1", 3).await;
        let parked = app.fail("queue-1", 3).await;
        app.service.dead_letter(parked.id).await.unwrap();

        let mut buf = Vec::new();
        stats(&app.service, &mut buf, false).await.unwrap();
        let text = output(buf);
        assert!(text.contains("Failed:"));
        assert!(text.contains("Dead Letter:"));
        assert!(text.contains("Total:"));

        let mut buf = Vec::<u8>::new();
        stats(&app.service, &mut buf, true).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["total"], 2);
        assert_eq!(value["by_status"]["failed"], 1);
        assert_eq!(value["by_status"]["retrying"], 0);
        assert_eq!(value["by_status"]["dead_letter"], 1);
    }
}
