use std::sync::Arc;

use async_trait::async_trait;
use common::{FailureRecord, MessageOrigin};
use retry::{RetryError, RetryService};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::MqError;
use crate::{BroccoliError, BrokerMessage, Mq};

/// Business logic for one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Queue to consume and where failed messages are replayed to.
    fn origin(&self) -> MessageOrigin;

    /// Retry budget for messages that fail in this handler. `None` takes the
    /// service default (`retry.max_retries`).
    fn max_retries(&self) -> Option<u32> {
        None
    }

    async fn handle(&self, payload: &Value) -> anyhow::Result<()>;
}

/// What happened to one delivered message.
#[derive(Debug, Clone)]
pub enum Delivery {
    Processed,
    /// The handler failed and the message is now tracked for retry.
    Recorded(FailureRecord),
}

/// Run the handler and record a failure when it errors.
///
/// `Err` only when the failure itself could not be recorded.
pub async fn handle_delivery<H: MessageHandler + ?Sized>(
    handler: &H,
    service: &RetryService,
    payload: Value,
) -> Result<Delivery, RetryError> {
    let Err(e) = handler.handle(&payload).await else {
        return Ok(Delivery::Processed);
    };

    let origin = handler.origin();
    warn!(
        queue = %origin.queue_name,
        routing_key = %origin.routing_key,
        error = %e,
        "Message processing failed"
    );

    let record = service
        .record_failure(
            origin,
            payload.to_string().into_bytes(),
            format!("{e:#}"),
            handler
                .max_retries()
                .unwrap_or_else(|| service.default_max_retries()),
        )
        .await?;

    Ok(Delivery::Recorded(record))
}

/// Consume the handler's queue, recording every failed message for retry.
///
/// Failed messages are acknowledged once recorded. A message whose failure
/// could not be recorded is handed back to the broker as a job error.
pub async fn consume_with_retry<H: MessageHandler>(
    mq: Arc<Mq>,
    handler: Arc<H>,
    service: Arc<RetryService>,
) -> Result<(), MqError> {
    let queue_name = handler.origin().queue_name;
    info!(queue = %queue_name, "Starting consumer with retry tracking");

    mq.process_messages(
        &queue_name,
        None,
        None,
        move |message: BrokerMessage<Value>| {
            let handler = handler.clone();
            let service = service.clone();
            async move {
                let task_id = message.task_id.clone();
                match handle_delivery(handler.as_ref(), &service, message.payload).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        error!(
                            task_id = %task_id,
                            error = %e,
                            "Failed to record failed message"
                        );
                        Err(BroccoliError::Job(e.to_string()))
                    }
                }
            }
        },
    )
    .await
    .map_err(MqError::from)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{Context, anyhow};
    use common::{FailureStatus, RecordFilter};
    use retry::testing::StubPublisher;
    use retry::{InMemoryFailureStore, RetryStateMachine};
    use serde_json::json;

    use super::*;

    struct OrderHandler;

    #[async_trait]
    impl MessageHandler for OrderHandler {
        fn origin(&self) -> MessageOrigin {
            MessageOrigin::new("orders", "orders", "")
        }

        fn max_retries(&self) -> Option<u32> {
            Some(5)
        }

        async fn handle(&self, payload: &Value) -> anyhow::Result<()> {
            let id = payload["order_id"]
                .as_u64()
                .ok_or_else(|| anyhow!("missing order_id"))
                .context("invalid order message")?;
            if id == 0 {
                anyhow::bail!("order 0 does not exist");
            }
            Ok(())
        }
    }

    struct EmptyQueueHandler;

    #[async_trait]
    impl MessageHandler for EmptyQueueHandler {
        fn origin(&self) -> MessageOrigin {
            MessageOrigin::new("", "orders", "")
        }

        async fn handle(&self, _: &Value) -> anyhow::Result<()> {
            anyhow::bail!("always fails")
        }
    }

    struct AuditHandler;

    #[async_trait]
    impl MessageHandler for AuditHandler {
        fn origin(&self) -> MessageOrigin {
            MessageOrigin::new("audit", "audit", "")
        }

        async fn handle(&self, _: &Value) -> anyhow::Result<()> {
            anyhow::bail!("audit sink unavailable")
        }
    }

    fn service() -> RetryService {
        RetryService::new(RetryStateMachine::new(
            InMemoryFailureStore::arc(),
            Arc::new(StubPublisher::new()),
        ))
    }

    #[tokio::test]
    async fn successful_messages_are_not_recorded() {
        let service = service();
        let delivery = handle_delivery(&OrderHandler, &service, json!({"order_id": 7}))
            .await
            .unwrap();

        assert!(matches!(delivery, Delivery::Processed));
        assert_eq!(service.statistics().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn failed_messages_are_recorded_with_cause_chain() {
        let service = service();
        let delivery = handle_delivery(&OrderHandler, &service, json!({"sku": "x"}))
            .await
            .unwrap();

        let Delivery::Recorded(record) = delivery else {
            panic!("expected Recorded");
        };
        assert_eq!(record.queue_name, "orders");
        assert_eq!(record.max_retries, 5);
        assert_eq!(record.status, FailureStatus::Failed);
        assert_eq!(record.failure_reason, "invalid order message: missing order_id");
        assert_eq!(
            serde_json::from_slice::<Value>(&record.payload).unwrap(),
            json!({"sku": "x"})
        );

        let listed = service
            .list(&RecordFilter::default().queue("orders"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn unrecordable_failure_is_an_error() {
        let service = service();
        let err = handle_delivery(&EmptyQueueHandler, &service, json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Validation(_)));
        assert_eq!(service.statistics().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn handler_without_budget_uses_service_default() {
        let service = service().with_default_max_retries(4);
        let delivery = handle_delivery(&AuditHandler, &service, json!({"event": "login"}))
            .await
            .unwrap();

        let Delivery::Recorded(record) = delivery else {
            panic!("expected Recorded");
        };
        assert_eq!(record.max_retries, 4);
        assert_eq!(record.failure_reason, "audit sink unavailable");
    }
}
