use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use retry::{BrokerPublisher, PublishError};
use serde_json::Value;
use tracing::debug;

use crate::Mq;

/// Re-publishes failed messages onto broccoli queues.
///
/// The routing key names the destination queue. Broccoli has no exchanges,
/// so the exchange is only carried through to the logs.
pub struct MqPublisher {
    mq: Arc<Mq>,
    timeout: Duration,
}

impl MqPublisher {
    pub fn new(mq: Arc<Mq>, timeout: Duration) -> Self {
        Self { mq, timeout }
    }
}

/// Broccoli transports JSON, so stored payloads must parse as JSON to be replayed.
pub fn decode_payload(payload: &[u8]) -> Result<Value, PublishError> {
    serde_json::from_slice(payload).map_err(|e| PublishError::Encoding(e.to_string()))
}

#[async_trait]
impl BrokerPublisher for MqPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        exchange: &str,
    ) -> Result<(), PublishError> {
        let message = decode_payload(payload)?;

        match tokio::time::timeout(
            self.timeout,
            self.mq.publish(routing_key, None, &message, None),
        )
        .await
        {
            Ok(Ok(sent)) => {
                debug!(
                    task_id = %sent.task_id,
                    queue = routing_key,
                    exchange,
                    "Published message"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(PublishError::Broker(e.to_string())),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }
}
