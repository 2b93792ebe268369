use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::{BackoffPolicy, ExponentialBackoff, StagedBackoff};

/// App-level MQ configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Upper bound for a single re-publish call. Default: 10.
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_publish_timeout_secs() -> u64 {
    10
}

impl MqAppConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Default: "sqlite://mq-retry.db?mode=rwc".
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Default: 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://mq-retry.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Which backoff curve to schedule retries with.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// 1m, 5m, 15m, then 60m.
    #[default]
    Staged,
    Exponential {
        base_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

impl BackoffConfig {
    pub fn build(&self) -> Arc<dyn BackoffPolicy> {
        match *self {
            Self::Staged => Arc::new(StagedBackoff),
            Self::Exponential {
                base_ms,
                max_ms,
                jitter,
            } => {
                let policy = ExponentialBackoff::new(base_ms, max_ms);
                Arc::new(if jitter { policy.with_jitter() } else { policy })
            }
        }
    }
}

/// Retry scheduling configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Retry budget given to new failure records. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum records replayed per scheduler pass. Default: 100.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Seconds between scheduler passes. Default: 60.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Seconds before an unresolved claim is handed back to the due set. Default: 300.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_retries() -> u32 {
    3
}
fn default_batch_limit() -> usize {
    100
}
fn default_scan_interval_secs() -> u64 {
    60
}
fn default_claim_timeout_secs() -> u64 {
    300
}

impl RetryConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("retry.max_retries must be at least 1".into());
        }
        if self.batch_limit == 0 {
            return Err("retry.batch_limit must be at least 1".into());
        }
        if self.scan_interval_secs == 0 {
            return Err("retry.scan_interval_secs must be at least 1".into());
        }
        if self.claim_timeout_secs == 0 {
            return Err("retry.claim_timeout_secs must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            batch_limit: default_batch_limit(),
            scan_interval_secs: default_scan_interval_secs(),
            claim_timeout_secs: default_claim_timeout_secs(),
            backoff: BackoffConfig::default(),
        }
    }
}
