mod commands;
mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use common::FailureStatus;
use mq::{MqConfig, MqPublisher, init_mq};
use retry::{BrokerPublisher, PublishError, RetryService, RetryStateMachine};
use store::{SeaOrmFailureStore, init_db};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::Outcome;
use crate::config::CliAppConfig;

#[derive(Parser)]
#[command(name = "mq-retry")]
#[command(about = "Inspect and replay failed queue messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file, without extension
    #[arg(long, global = true, env = "MQ_RETRY_CONFIG", default_value = "config/config")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List failed messages
    Failed {
        /// Only messages consumed from this queue
        #[arg(long)]
        queue: Option<String>,

        /// Only messages in this status (failed, retrying, dead_letter)
        #[arg(long)]
        status: Option<FailureStatus>,
    },

    /// Retry failed messages that are ready for retry
    RetryFailed {
        /// Maximum number of messages to retry
        #[arg(long, default_value = "100")]
        limit: usize,

        /// List the messages that would be retried without publishing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Force retry a specific failed message
    ForceRetry {
        /// ID of the failed message
        id: Uuid,

        /// Reset retry count to 0 first
        #[arg(long)]
        reset_count: bool,
    },

    /// Purge all dead letter messages
    PurgeDeadLetters {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show message counts by status
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn publishes(&self) -> bool {
        matches!(
            self,
            Self::RetryFailed { dry_run: false, .. } | Self::ForceRetry { .. }
        )
    }
}

/// Stands in for the broker in commands that never publish.
struct NoBroker;

#[async_trait]
impl BrokerPublisher for NoBroker {
    async fn publish(&self, _: &str, _: &[u8], _: &str) -> Result<(), PublishError> {
        Err(PublishError::Broker("no broker connection for this command".into()))
    }
}

async fn build_service(config: &CliAppConfig, connect_mq: bool) -> anyhow::Result<RetryService> {
    let db = init_db(&config.database)
        .await
        .context("Failed to connect to database")?;

    let publisher: Arc<dyn BrokerPublisher> = if connect_mq {
        let mq = init_mq(MqConfig::from(&config.mq))
            .await
            .context("Failed to initialize MQ")?;
        Arc::new(MqPublisher::new(Arc::new(mq), config.mq.publish_timeout()))
    } else {
        Arc::new(NoBroker)
    };

    let machine = RetryStateMachine::new(Arc::new(SeaOrmFailureStore::new(db)), publisher)
        .with_backoff(config.retry.backoff.build());
    Ok(RetryService::new(machine)
        .with_default_max_retries(config.retry.max_retries)
        .with_claim_timeout(config.retry.claim_timeout()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliAppConfig::load(&cli.config).context("Failed to load config")?;
    let service = build_service(&config, cli.command.publishes()).await?;

    let mut out = std::io::stdout().lock();
    let outcome: Outcome = match cli.command {
        Commands::Failed { queue, status } => {
            commands::list_failed(&service, &mut out, queue, status).await?
        }
        Commands::RetryFailed { limit, dry_run: true } => {
            commands::list_pending(&service, &mut out, limit).await?
        }
        Commands::RetryFailed { limit, dry_run: false } => {
            commands::retry_failed(&service, &mut out, limit).await?
        }
        Commands::ForceRetry { id, reset_count } => {
            commands::force_retry(&service, &mut out, id, reset_count).await?
        }
        Commands::PurgeDeadLetters { force } => {
            let confirmed = commands::confirm_purge(force)?;
            commands::purge_dead_letters(&service, &mut out, confirmed).await?
        }
        Commands::Stats { json } => commands::stats(&service, &mut out, json).await?,
    };

    Ok(outcome.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_force_retry() {
        let id = Uuid::new_v4();
        let arg = id.to_string();
        let cli =
            Cli::try_parse_from(["mq-retry", "force-retry", arg.as_str(), "--reset-count"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ForceRetry { id: parsed, reset_count: true } if parsed == id
        ));
        assert!(cli.command.publishes());
    }

    #[test]
    fn parses_status_filter() {
        let cli = Cli::try_parse_from(["mq-retry", "failed", "--status", "dead_letter"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Failed { queue: None, status: Some(FailureStatus::DeadLetter) }
        ));
        assert!(!cli.command.publishes());
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(Cli::try_parse_from(["mq-retry", "failed", "--status", "gone"]).is_err());
    }

    #[test]
    fn retry_limit_defaults_to_100() {
        let cli = Cli::try_parse_from(["mq-retry", "retry-failed"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::RetryFailed { limit: 100, dry_run: false }
        ));
        assert!(cli.command.publishes());
    }

    #[test]
    fn dry_run_does_not_need_a_broker() {
        let cli =
            Cli::try_parse_from(["mq-retry", "retry-failed", "--limit", "5", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::RetryFailed { limit: 5, dry_run: true }
        ));
        assert!(!cli.command.publishes());
    }
}
