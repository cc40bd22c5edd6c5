use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::alert::{AlertHistory, AlertRule, NewAlertRule};
use crate::types::candle::Candle;
use crate::types::instrument::Instrument;
use crate::types::status::ExchangeStatus;
use crate::types::tick::{NormalizedTick, SourceType};

pub mod memory;
pub mod postgres;

/// The row shape the tick buffer accumulates for bulk insert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedTick {
    pub instrument_id: i64,
    pub source_type: SourceType,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl PersistedTick {
    pub fn from_tick(tick: &NormalizedTick, instrument_id: i64) -> Self {
        PersistedTick {
            instrument_id,
            source_type: tick.source_type,
            price: tick.price,
            volume: tick.volume,
            timestamp: tick.timestamp,
            received_at: tick.received_at,
        }
    }
}

/// Raw tick persistence. Bulk inserts are not required to be idempotent;
/// duplicate rows are tolerated when the dedup backend missed.
#[async_trait]
pub trait TickRepository: Send + Sync {
    async fn bulk_insert(&self, ticks: &[PersistedTick]) -> Result<u64>;

    /// Drop ticks older than the cutoff; returns rows removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Candle persistence; the upsert key is (instrument_id, interval,
/// open_time) and an existing row's OHLCV, volume, trades count and close
/// time are replaced.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    async fn bulk_upsert(&self, candles: &[Candle]) -> Result<u64>;
}

#[async_trait]
pub trait InstrumentRepository: Send + Sync {
    /// Return the existing instrument or create it; unique by
    /// (symbol, exchange).
    async fn get_or_create(&self, symbol: &str, exchange: &str) -> Result<Instrument>;
}

#[async_trait]
pub trait AlertRuleRepository: Send + Sync {
    async fn get_all_active(&self) -> Result<Vec<AlertRule>>;
    async fn get_by_id(&self, id: i64) -> Result<Option<AlertRule>>;
    async fn create(&self, rule: NewAlertRule) -> Result<AlertRule>;
    async fn update(&self, rule: &AlertRule) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait AlertHistoryRepository: Send + Sync {
    async fn add(&self, entry: AlertHistory) -> Result<()>;
    async fn get(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AlertHistory>>;
}

#[async_trait]
pub trait ExchangeStatusRepository: Send + Sync {
    async fn upsert(&self, status: &ExchangeStatus) -> Result<()>;
    async fn get_all(&self) -> Result<Vec<ExchangeStatus>>;
    async fn get(&self, exchange: &str, source_type: SourceType) -> Result<Option<ExchangeStatus>>;
}
