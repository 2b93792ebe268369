use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{DatabaseConfig, MqAppConfig, RetryConfig};

/// Settings shared with the retry worker, read from the same sources.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CliAppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl CliAppConfig {
    pub fn load(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("MQ_RETRY").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.retry.validate().map_err(ConfigError::Message)?;
        Ok(config)
    }
}
