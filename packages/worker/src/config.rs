use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{DatabaseConfig, MqAppConfig, RetryConfig};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Identifies this instance in logs. Default: "retry-worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
}

fn default_worker_id() -> String {
    "retry-worker-1".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("MQ_RETRY_CONFIG").unwrap_or_else(|_| "config/config".to_string());
        Self::load_from(&config_path)
    }

    /// Defaults, then the file at `config_path` if present, then `MQ_RETRY__*` variables.
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("worker.id", "retry-worker-1")?
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.pool_size", 5_i64)?
            .set_default("retry.batch_limit", 100_i64)?
            .set_default("retry.scan_interval_secs", 60_i64)?
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("MQ_RETRY").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.retry.validate().map_err(ConfigError::Message)?;
        Ok(config)
    }
}
