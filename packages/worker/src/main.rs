mod config;

use std::sync::Arc;

use anyhow::Context;
use mq::{MqConfig, MqPublisher, init_mq};
use retry::{RetryScheduler, RetryStateMachine, run_retry_scheduler};
use store::{SeaOrmFailureStore, init_db};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = config::WorkerAppConfig::load().context("Failed to load config")?;
    info!("Retry worker starting: {}", config.worker.id);

    let db = init_db(&config.database)
        .await
        .context("Failed to connect to database")?;

    let mq = Arc::new(
        init_mq(MqConfig::from(&config.mq))
            .await
            .context("Failed to initialize MQ")?,
    );

    info!(
        pool_size = config.mq.pool_size,
        publish_timeout_secs = config.mq.publish_timeout_secs,
        "MQ connected"
    );

    let machine = RetryStateMachine::new(
        Arc::new(SeaOrmFailureStore::new(db)),
        Arc::new(MqPublisher::new(mq, config.mq.publish_timeout())),
    )
    .with_backoff(config.retry.backoff.build());

    let scheduler = Arc::new(
        RetryScheduler::new(Arc::new(machine)).with_claim_timeout(config.retry.claim_timeout()),
    );

    tokio::select! {
        _ = run_retry_scheduler(
            scheduler,
            config.retry.batch_limit,
            config.retry.scan_interval(),
        ) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping retry worker");
        }
    }

    Ok(())
}
