use async_trait::async_trait;

use crate::error::PublishError;

/// Re-emits a failed message onto the broker.
///
/// Implementations own their timeouts: a publish that never returns stalls
/// the whole scheduler batch.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        exchange: &str,
    ) -> Result<(), PublishError>;
}
