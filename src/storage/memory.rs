use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::storage::{
    AlertHistoryRepository, AlertRuleRepository, CandleRepository, ExchangeStatusRepository,
    InstrumentRepository, PersistedTick, TickRepository,
};
use crate::types::alert::{AlertHistory, AlertRule, NewAlertRule};
use crate::types::candle::{Candle, CandleKey};
use crate::types::instrument::Instrument;
use crate::types::status::ExchangeStatus;
use crate::types::tick::SourceType;

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Vec-backed tick store.
#[derive(Default)]
pub struct InMemoryTickRepository {
    rows: Mutex<Vec<PersistedTick>>,
}

impl InMemoryTickRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<PersistedTick> {
        lock(&self.rows).clone()
    }
}

#[async_trait]
impl TickRepository for InMemoryTickRepository {
    async fn bulk_insert(&self, ticks: &[PersistedTick]) -> Result<u64> {
        lock(&self.rows).extend_from_slice(ticks);
        Ok(ticks.len() as u64)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|t| t.timestamp >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

/// Map-backed candle store keyed exactly like the unique index.
#[derive(Default)]
pub struct InMemoryCandleRepository {
    rows: Mutex<HashMap<CandleKey, Candle>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Candle> {
        lock(&self.rows).values().cloned().collect()
    }

    pub fn get(&self, key: &CandleKey) -> Option<Candle> {
        lock(&self.rows).get(key).cloned()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn bulk_upsert(&self, candles: &[Candle]) -> Result<u64> {
        let mut rows = lock(&self.rows);
        for candle in candles {
            rows.insert(candle.key(), candle.clone());
        }
        Ok(candles.len() as u64)
    }
}

pub struct InMemoryInstrumentRepository {
    next_id: AtomicI64,
    rows: Mutex<HashMap<(String, String), Instrument>>,
}

impl InMemoryInstrumentRepository {
    pub fn new() -> Self {
        InMemoryInstrumentRepository {
            next_id: AtomicI64::new(1),
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl InstrumentRepository for InMemoryInstrumentRepository {
    async fn get_or_create(&self, symbol: &str, exchange: &str) -> Result<Instrument> {
        let key = (symbol.to_string(), exchange.to_string());
        let mut rows = lock(&self.rows);
        if let Some(existing) = rows.get(&key) {
            return Ok(existing.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instrument = Instrument::new(id, symbol, exchange);
        rows.insert(key, instrument.clone());
        Ok(instrument)
    }
}

pub struct InMemoryAlertRuleRepository {
    next_id: AtomicI64,
    rows: Mutex<HashMap<i64, AlertRule>>,
}

impl InMemoryAlertRuleRepository {
    pub fn new() -> Self {
        InMemoryAlertRuleRepository {
            next_id: AtomicI64::new(1),
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AlertRuleRepository for InMemoryAlertRuleRepository {
    async fn get_all_active(&self) -> Result<Vec<AlertRule>> {
        Ok(lock(&self.rows)
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AlertRule>> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    async fn create(&self, rule: NewAlertRule) -> Result<AlertRule> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rule = AlertRule {
            id,
            name: rule.name,
            instrument_id: rule.instrument_id,
            kind: rule.kind,
            threshold: rule.threshold,
            period_minutes: rule.period_minutes,
            is_active: rule.is_active,
            created_at: Utc::now(),
        };
        lock(&self.rows).insert(id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, rule: &AlertRule) -> Result<()> {
        let mut rows = lock(&self.rows);
        if !rows.contains_key(&rule.id) {
            return Err(Error::AlertRuleNotFound(rule.id));
        }
        rows.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        lock(&self.rows)
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::AlertRuleNotFound(id))
    }
}

#[derive(Default)]
pub struct InMemoryAlertHistoryRepository {
    rows: Mutex<Vec<AlertHistory>>,
}

impl InMemoryAlertHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<AlertHistory> {
        lock(&self.rows).clone()
    }
}

#[async_trait]
impl AlertHistoryRepository for InMemoryAlertHistoryRepository {
    async fn add(&self, entry: AlertHistory) -> Result<()> {
        lock(&self.rows).push(entry);
        Ok(())
    }

    async fn get(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AlertHistory>> {
        let mut rows: Vec<AlertHistory> = lock(&self.rows)
            .iter()
            .filter(|h| h.triggered_at >= from && h.triggered_at <= to)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryExchangeStatusRepository {
    rows: Mutex<HashMap<(String, SourceType), ExchangeStatus>>,
}

impl InMemoryExchangeStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExchangeStatusRepository for InMemoryExchangeStatusRepository {
    async fn upsert(&self, status: &ExchangeStatus) -> Result<()> {
        lock(&self.rows).insert(
            (status.exchange.clone(), status.source_type),
            status.clone(),
        );
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<ExchangeStatus>> {
        Ok(lock(&self.rows).values().cloned().collect())
    }

    async fn get(&self, exchange: &str, source_type: SourceType) -> Result<Option<ExchangeStatus>> {
        Ok(lock(&self.rows)
            .get(&(exchange.to_string(), source_type))
            .cloned())
    }
}
