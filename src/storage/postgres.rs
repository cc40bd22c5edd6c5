use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::storage::{
    AlertHistoryRepository, AlertRuleRepository, CandleRepository, ExchangeStatusRepository,
    InstrumentRepository, PersistedTick, TickRepository,
};
use crate::types::alert::{AlertHistory, AlertRule, NewAlertRule, RuleKind};
use crate::types::candle::Candle;
use crate::types::instrument::Instrument;
use crate::types::status::ExchangeStatus;
use crate::types::tick::SourceType;

/// Schema the repositories target. `ticks` is range-partitioned by event
/// timestamp; partition lifecycle is managed outside this service, the
/// DEFAULT partition keeps inserts working either way.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS instruments (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        exchange TEXT NOT NULL,
        base_currency TEXT NOT NULL,
        quote_currency TEXT NOT NULL,
        UNIQUE (symbol, exchange)
    )",
    "CREATE TABLE IF NOT EXISTS ticks (
        instrument_id BIGINT NOT NULL,
        source_type TEXT NOT NULL,
        price NUMERIC NOT NULL,
        volume NUMERIC NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        received_at TIMESTAMPTZ NOT NULL
    ) PARTITION BY RANGE (timestamp)",
    "CREATE TABLE IF NOT EXISTS ticks_default PARTITION OF ticks DEFAULT",
    "CREATE INDEX IF NOT EXISTS idx_ticks_instrument_time ON ticks (instrument_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_ticks_time ON ticks (timestamp DESC)",
    "CREATE TABLE IF NOT EXISTS candles (
        instrument_id BIGINT NOT NULL,
        interval TEXT NOT NULL,
        open_time TIMESTAMPTZ NOT NULL,
        close_time TIMESTAMPTZ NOT NULL,
        open NUMERIC NOT NULL,
        high NUMERIC NOT NULL,
        low NUMERIC NOT NULL,
        close NUMERIC NOT NULL,
        volume NUMERIC NOT NULL,
        trades_count BIGINT NOT NULL,
        UNIQUE (instrument_id, interval, open_time)
    )",
    "CREATE TABLE IF NOT EXISTS alert_rules (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        instrument_id BIGINT NOT NULL,
        kind TEXT NOT NULL,
        threshold NUMERIC NOT NULL,
        period_minutes BIGINT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS alert_histories (
        id UUID PRIMARY KEY,
        rule_id BIGINT NOT NULL,
        instrument_id BIGINT NOT NULL,
        message TEXT NOT NULL,
        triggered_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_alert_histories_triggered_at ON alert_histories (triggered_at DESC)",
    "CREATE TABLE IF NOT EXISTS exchange_statuses (
        exchange TEXT NOT NULL,
        source_type TEXT NOT NULL,
        is_online BOOLEAN NOT NULL,
        last_tick_at TIMESTAMPTZ,
        last_error TEXT,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (exchange, source_type)
    )",
];

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }
    Ok(pool)
}

fn parse_kind(kind: &str) -> Result<RuleKind> {
    RuleKind::parse(kind).ok_or_else(|| Error::UnknownRuleKind(kind.to_string()))
}

fn parse_source_type(source_type: &str) -> SourceType {
    match source_type {
        "polled" => SourceType::Polled,
        _ => SourceType::Streaming,
    }
}

pub struct PgTickRepository {
    pool: PgPool,
}

impl PgTickRepository {
    pub fn new(pool: PgPool) -> Self {
        PgTickRepository { pool }
    }
}

#[async_trait]
impl TickRepository for PgTickRepository {
    async fn bulk_insert(&self, ticks: &[PersistedTick]) -> Result<u64> {
        if ticks.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO ticks (instrument_id, source_type, price, volume, timestamp, received_at) ",
        );
        builder.push_values(ticks, |mut row, tick| {
            row.push_bind(tick.instrument_id)
                .push_bind(tick.source_type.as_str())
                .push_bind(tick.price)
                .push_bind(tick.volume)
                .push_bind(tick.timestamp)
                .push_bind(tick.received_at);
        });
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ticks WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgCandleRepository {
    pool: PgPool,
}

impl PgCandleRepository {
    pub fn new(pool: PgPool) -> Self {
        PgCandleRepository { pool }
    }
}

#[async_trait]
impl CandleRepository for PgCandleRepository {
    async fn bulk_upsert(&self, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO candles (instrument_id, interval, open_time, close_time, open, high, low, close, volume, trades_count) ",
        );
        builder.push_values(candles, |mut row, candle| {
            row.push_bind(candle.instrument_id)
                .push_bind(candle.interval.as_str())
                .push_bind(candle.open_time)
                .push_bind(candle.close_time)
                .push_bind(candle.open)
                .push_bind(candle.high)
                .push_bind(candle.low)
                .push_bind(candle.close)
                .push_bind(candle.volume)
                .push_bind(candle.trades_count as i64);
        });
        builder.push(
            " ON CONFLICT (instrument_id, interval, open_time) DO UPDATE SET \
             close_time = EXCLUDED.close_time, open = EXCLUDED.open, high = EXCLUDED.high, \
             low = EXCLUDED.low, close = EXCLUDED.close, volume = EXCLUDED.volume, \
             trades_count = EXCLUDED.trades_count",
        );
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

pub struct PgInstrumentRepository {
    pool: PgPool,
}

impl PgInstrumentRepository {
    pub fn new(pool: PgPool) -> Self {
        PgInstrumentRepository { pool }
    }
}

#[async_trait]
impl InstrumentRepository for PgInstrumentRepository {
    async fn get_or_create(&self, symbol: &str, exchange: &str) -> Result<Instrument> {
        let derived = Instrument::new(0, symbol, exchange);
        let row = sqlx::query(
            "INSERT INTO instruments (symbol, exchange, base_currency, quote_currency) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (symbol, exchange) DO UPDATE SET symbol = EXCLUDED.symbol \
             RETURNING id, symbol, exchange, base_currency, quote_currency",
        )
        .bind(symbol)
        .bind(exchange)
        .bind(&derived.base_currency)
        .bind(&derived.quote_currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(Instrument {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            exchange: row.try_get("exchange")?,
            base_currency: row.try_get("base_currency")?,
            quote_currency: row.try_get("quote_currency")?,
        })
    }
}

pub struct PgAlertRuleRepository {
    pool: PgPool,
}

impl PgAlertRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        PgAlertRuleRepository { pool }
    }

    fn rule_from_row(row: &sqlx::postgres::PgRow) -> Result<AlertRule> {
        let kind: String = row.try_get("kind")?;
        Ok(AlertRule {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            instrument_id: row.try_get("instrument_id")?,
            kind: parse_kind(&kind)?,
            threshold: row.try_get::<Decimal, _>("threshold")?,
            period_minutes: row.try_get("period_minutes")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AlertRuleRepository for PgAlertRuleRepository {
    async fn get_all_active(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query(
            "SELECT id, name, instrument_id, kind, threshold, period_minutes, is_active, created_at \
             FROM alert_rules WHERE is_active",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::rule_from_row).collect()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AlertRule>> {
        let row = sqlx::query(
            "SELECT id, name, instrument_id, kind, threshold, period_minutes, is_active, created_at \
             FROM alert_rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::rule_from_row).transpose()
    }

    async fn create(&self, rule: NewAlertRule) -> Result<AlertRule> {
        let row = sqlx::query(
            "INSERT INTO alert_rules (name, instrument_id, kind, threshold, period_minutes, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, name, instrument_id, kind, threshold, period_minutes, is_active, created_at",
        )
        .bind(&rule.name)
        .bind(rule.instrument_id)
        .bind(rule.kind.as_str())
        .bind(rule.threshold)
        .bind(rule.period_minutes)
        .bind(rule.is_active)
        .fetch_one(&self.pool)
        .await?;
        Self::rule_from_row(&row)
    }

    async fn update(&self, rule: &AlertRule) -> Result<()> {
        let result = sqlx::query(
            "UPDATE alert_rules SET name = $2, instrument_id = $3, kind = $4, threshold = $5, \
             period_minutes = $6, is_active = $7 WHERE id = $1",
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.instrument_id)
        .bind(rule.kind.as_str())
        .bind(rule.threshold)
        .bind(rule.period_minutes)
        .bind(rule.is_active)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::AlertRuleNotFound(rule.id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::AlertRuleNotFound(id));
        }
        Ok(())
    }
}

pub struct PgAlertHistoryRepository {
    pool: PgPool,
}

impl PgAlertHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        PgAlertHistoryRepository { pool }
    }
}

#[async_trait]
impl AlertHistoryRepository for PgAlertHistoryRepository {
    async fn add(&self, entry: AlertHistory) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_histories (id, rule_id, instrument_id, message, triggered_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(entry.rule_id)
        .bind(entry.instrument_id)
        .bind(&entry.message)
        .bind(entry.triggered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AlertHistory>> {
        let rows = sqlx::query(
            "SELECT id, rule_id, instrument_id, message, triggered_at FROM alert_histories \
             WHERE triggered_at BETWEEN $1 AND $2 ORDER BY triggered_at DESC LIMIT $3",
        )
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AlertHistory {
                    id: row.try_get::<Uuid, _>("id")?,
                    rule_id: row.try_get("rule_id")?,
                    instrument_id: row.try_get("instrument_id")?,
                    message: row.try_get("message")?,
                    triggered_at: row.try_get("triggered_at")?,
                })
            })
            .collect()
    }
}

pub struct PgExchangeStatusRepository {
    pool: PgPool,
}

impl PgExchangeStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        PgExchangeStatusRepository { pool }
    }

    fn status_from_row(row: &sqlx::postgres::PgRow) -> Result<ExchangeStatus> {
        let source_type: String = row.try_get("source_type")?;
        Ok(ExchangeStatus {
            exchange: row.try_get("exchange")?,
            source_type: parse_source_type(&source_type),
            is_online: row.try_get("is_online")?,
            last_tick_at: row.try_get("last_tick_at")?,
            last_error: row.try_get("last_error")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ExchangeStatusRepository for PgExchangeStatusRepository {
    async fn upsert(&self, status: &ExchangeStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO exchange_statuses (exchange, source_type, is_online, last_tick_at, last_error, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (exchange, source_type) DO UPDATE SET is_online = EXCLUDED.is_online, \
             last_tick_at = EXCLUDED.last_tick_at, last_error = EXCLUDED.last_error, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(&status.exchange)
        .bind(status.source_type.as_str())
        .bind(status.is_online)
        .bind(status.last_tick_at)
        .bind(&status.last_error)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<ExchangeStatus>> {
        let rows = sqlx::query(
            "SELECT exchange, source_type, is_online, last_tick_at, last_error, updated_at \
             FROM exchange_statuses ORDER BY exchange, source_type",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::status_from_row).collect()
    }

    async fn get(&self, exchange: &str, source_type: SourceType) -> Result<Option<ExchangeStatus>> {
        let row = sqlx::query(
            "SELECT exchange, source_type, is_online, last_tick_at, last_error, updated_at \
             FROM exchange_statuses WHERE exchange = $1 AND source_type = $2",
        )
        .bind(exchange)
        .bind(source_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::status_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_rejected_on_read() {
        assert!(matches!(
            parse_kind("teleport"),
            Err(Error::UnknownRuleKind(_))
        ));
        assert_eq!(parse_kind("volume_spike").unwrap(), RuleKind::VolumeSpike);
    }
}
