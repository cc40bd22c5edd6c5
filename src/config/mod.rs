use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::candle::CandleInterval;

pub mod loader;

pub use loader::AppConfig;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub exchange: String,
    pub symbols: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_tick_buffer_size")]
    pub tick_buffer_size: usize,
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    #[serde(default = "default_candle_intervals")]
    pub candle_intervals: Vec<CandleInterval>,
    #[serde(default = "default_retention_minutes")]
    pub in_memory_candle_retention_minutes: i64,
}

impl AggregatorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            tick_buffer_size: default_tick_buffer_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            candle_intervals: default_candle_intervals(),
            in_memory_candle_retention_minutes: default_retention_minutes(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_max_concurrent_notifications")]
    pub max_concurrent_notifications: usize,
    #[serde(default = "default_rule_cache_refresh_seconds")]
    pub rule_cache_refresh_seconds: u64,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        AlertsConfig {
            cooldown_seconds: default_cooldown_seconds(),
            max_concurrent_notifications: default_max_concurrent_notifications(),
            rule_cache_refresh_seconds: default_rule_cache_refresh_seconds(),
            channels: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub enabled: bool,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres connection string; empty selects the in-memory stores.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_tick_retention_days")]
    pub tick_retention_days: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: String::new(),
            max_connections: default_max_connections(),
            tick_retention_days: default_tick_retention_days(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis connection string; empty selects the in-memory dedup store.
    #[serde(default)]
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            bind: default_api_bind(),
            enabled: true,
        }
    }
}

fn default_tick_buffer_size() -> usize {
    500
}

fn default_flush_interval_seconds() -> u64 {
    10
}

fn default_candle_intervals() -> Vec<CandleInterval> {
    CandleInterval::all().to_vec()
}

fn default_retention_minutes() -> i64 {
    120
}

fn default_cooldown_seconds() -> i64 {
    300
}

fn default_max_concurrent_notifications() -> usize {
    10
}

fn default_rule_cache_refresh_seconds() -> u64 {
    5
}

fn default_max_connections() -> u32 {
    5
}

fn default_tick_retention_days() -> i64 {
    30
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}
