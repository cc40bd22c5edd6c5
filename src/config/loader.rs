use config::{Config, Environment, File};
use serde::Deserialize;

use crate::config::{
    AggregatorConfig, AlertsConfig, ApiConfig, DatabaseConfig, ExchangeConfig, RedisConfig,
};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("SPOTFLOW").separator("__"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let cfg: AppConfig = config
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup validation; violations here are fatal at construction.
    pub fn validate(&self) -> Result<()> {
        if self.exchanges.is_empty() {
            return Err(Error::Config("no exchanges configured".to_string()));
        }
        for ex in &self.exchanges {
            if ex.symbols.is_empty() {
                return Err(Error::Config(format!(
                    "exchange {} has no symbols configured",
                    ex.exchange
                )));
            }
        }
        if self.aggregator.candle_intervals.is_empty() {
            return Err(Error::Config("no candle intervals configured".to_string()));
        }
        if self.aggregator.tick_buffer_size == 0 {
            return Err(Error::Config("tick_buffer_size must be positive".to_string()));
        }
        for ch in &self.alerts.channels {
            match ch.channel_type.as_str() {
                "console" | "file" | "email" => {}
                other => return Err(Error::UnknownChannelType(other.to_string())),
            }
        }
        Ok(())
    }
}
