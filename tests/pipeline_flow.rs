//! End-to-end pipeline scenarios over in-memory stores: adapters are
//! simulated by writing raw ticks straight into the pipeline writer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use spotflow::aggregator::{CandleAggregator, InstrumentCache};
use spotflow::alerts::notify::NotificationChannel;
use spotflow::alerts::AlertEngine;
use spotflow::config::{AggregatorConfig, AlertsConfig, ExchangeConfig};
use spotflow::error::Result;
use spotflow::observability::metrics::MetricsRegistry;
use spotflow::pipeline::dedup::{InMemoryDedupStore, TickDeduplicator};
use spotflow::pipeline::{SymbolFilter, TickPipeline};
use spotflow::storage::memory::{
    InMemoryAlertHistoryRepository, InMemoryAlertRuleRepository, InMemoryCandleRepository,
    InMemoryInstrumentRepository, InMemoryTickRepository,
};
use spotflow::storage::AlertRuleRepository;
use spotflow::types::alert::{NewAlertRule, RuleKind};
use spotflow::types::candle::{CandleInterval, CandleKey};
use spotflow::types::tick::{RawTick, SourceType};

struct RecordingChannel {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
        Ok(())
    }
}

struct Harness {
    pipeline: TickPipeline,
    metrics: Arc<MetricsRegistry>,
    aggregator: Arc<CandleAggregator>,
    ticks: Arc<InMemoryTickRepository>,
    candles: Arc<InMemoryCandleRepository>,
    rules: Arc<InMemoryAlertRuleRepository>,
    history: Arc<InMemoryAlertHistoryRepository>,
    channel: Arc<RecordingChannel>,
}

fn harness() -> Harness {
    let metrics = Arc::new(MetricsRegistry::new());
    let ticks = Arc::new(InMemoryTickRepository::new());
    let candles = Arc::new(InMemoryCandleRepository::new());
    let rules = Arc::new(InMemoryAlertRuleRepository::new());
    let history = Arc::new(InMemoryAlertHistoryRepository::new());
    let channel = Arc::new(RecordingChannel {
        sent: Mutex::new(Vec::new()),
    });

    let instruments = Arc::new(InstrumentCache::new(Arc::new(
        InMemoryInstrumentRepository::new(),
    )));
    let aggregator = Arc::new(CandleAggregator::new(
        &AggregatorConfig {
            tick_buffer_size: 500,
            flush_interval_seconds: 10,
            candle_intervals: vec![CandleInterval::OneMinute],
            in_memory_candle_retention_minutes: 120,
        },
        instruments.clone(),
        ticks.clone(),
        candles.clone(),
        metrics.clone(),
    ));
    let alert_engine = Arc::new(AlertEngine::new(
        &AlertsConfig {
            cooldown_seconds: 300,
            max_concurrent_notifications: 10,
            rule_cache_refresh_seconds: 0,
            channels: Vec::new(),
        },
        rules.clone(),
        instruments,
        history.clone(),
        vec![channel.clone()],
    ));

    let dedup = Arc::new(TickDeduplicator::new(Arc::new(InMemoryDedupStore::new())));
    let filter = Arc::new(SymbolFilter::from_config(&[ExchangeConfig {
        exchange: "binance".to_string(),
        symbols: vec!["BTCUSDT".to_string()],
    }]));
    let pipeline = TickPipeline::new(dedup, filter, metrics.clone());
    pipeline.register_handler(aggregator.clone()).unwrap();
    pipeline.register_handler(alert_engine).unwrap();

    Harness {
        pipeline,
        metrics,
        aggregator,
        ticks,
        candles,
        rules,
        history,
        channel,
    }
}

fn at(minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, second).unwrap()
}

fn raw_tick(
    symbol: &str,
    source_type: SourceType,
    price: i64,
    volume: &str,
    ts: DateTime<Utc>,
) -> RawTick {
    RawTick {
        exchange: "binance".to_string(),
        source_type,
        symbol: symbol.to_string(),
        price: Decimal::from(price),
        volume: volume.parse().unwrap(),
        timestamp: ts,
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn same_trade_from_both_sources_collapses_to_one_update() {
    let h = harness();
    let writer = h.pipeline.writer().unwrap();
    h.pipeline.start().unwrap();

    let ts = at(0, 0);
    writer
        .send(raw_tick("btcusdt", SourceType::Streaming, 50000, "1.5", ts))
        .await
        .unwrap();
    writer
        .send(raw_tick("BTCUSDT", SourceType::Polled, 50000, "1.5", ts))
        .await
        .unwrap();

    drop(writer);
    h.pipeline.shutdown().await.unwrap();

    let snap = h.metrics.snapshot();
    assert_eq!(snap.exchanges["binance"].ticks_received, 2);
    assert_eq!(snap.exchanges["binance"].ticks_processed, 1);
    assert_eq!(snap.exchanges["binance"].duplicates_filtered, 1);

    // Exactly one candle update happened.
    h.aggregator.flush_at(at(2, 0)).await;
    let candle = h
        .candles
        .get(&CandleKey {
            instrument_id: 1,
            interval: CandleInterval::OneMinute,
            open_time: at(0, 0),
        })
        .unwrap();
    assert_eq!(candle.trades_count, 1);
    assert_eq!(candle.volume, "1.5".parse().unwrap());
}

#[tokio::test]
async fn one_minute_candle_folds_the_whole_bucket() {
    let h = harness();
    let writer = h.pipeline.writer().unwrap();
    h.pipeline.start().unwrap();

    for (second, price, volume) in [(5, 100, "1"), (20, 110, "2"), (40, 95, "1"), (55, 105, "1")] {
        writer
            .send(raw_tick(
                "BTCUSDT",
                SourceType::Streaming,
                price,
                volume,
                at(0, second),
            ))
            .await
            .unwrap();
    }

    drop(writer);
    h.pipeline.shutdown().await.unwrap();
    h.aggregator.flush_at(at(1, 0)).await;

    let rows = h.candles.rows();
    assert_eq!(rows.len(), 1);
    let candle = &rows[0];
    assert_eq!(candle.open_time, at(0, 0));
    assert_eq!(candle.close_time, at(1, 0));
    assert_eq!(candle.open, Decimal::from(100));
    assert_eq!(candle.high, Decimal::from(110));
    assert_eq!(candle.low, Decimal::from(95));
    assert_eq!(candle.close, Decimal::from(105));
    assert_eq!(candle.volume, Decimal::from(5));
    assert_eq!(candle.trades_count, 4);

    // The raw ticks were buffered for bulk insert as well.
    h.aggregator.flush_at(at(2, 0)).await;
    assert_eq!(h.ticks.rows().len(), 4);
}

#[tokio::test]
async fn price_above_rule_fires_once_and_respects_cooldown() {
    let h = harness();
    let writer = h.pipeline.writer().unwrap();
    h.pipeline.start().unwrap();

    // Register the instrument by flowing one below-threshold tick through,
    // then create the rule against its id.
    writer
        .send(raw_tick("BTCUSDT", SourceType::Streaming, 49000, "1", at(0, 0)))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    h.rules
        .create(NewAlertRule {
            name: "btc breakout".to_string(),
            instrument_id: 1,
            kind: RuleKind::PriceAbove,
            threshold: Decimal::from(50000),
            period_minutes: None,
            is_active: true,
        })
        .await
        .unwrap();

    for (second, price) in [(1, 50001), (2, 50000), (3, 49999), (4, 50001)] {
        writer
            .send(raw_tick("BTCUSDT", SourceType::Streaming, price, "1", at(1, second)))
            .await
            .unwrap();
    }

    drop(writer);
    h.pipeline.shutdown().await.unwrap();

    let history = h.history.rows();
    assert_eq!(history.len(), 1);
    assert!(history[0].message.contains("BTCUSDT"));
    assert!(history[0].message.contains("50001"));

    let sent = h.channel.sent.lock().unwrap_or_else(|e| e.into_inner()).clone();
    assert_eq!(sent.len(), 1);
}

#[tokio::test]
async fn shutdown_drains_every_queued_tick() {
    let h = harness();
    let writer = h.pipeline.writer().unwrap();

    for second in 0..50u32 {
        writer
            .send(raw_tick(
                "BTCUSDT",
                SourceType::Streaming,
                100 + second as i64,
                "1",
                at(0, second),
            ))
            .await
            .unwrap();
    }

    h.pipeline.start().unwrap();
    drop(writer);
    h.pipeline.shutdown().await.unwrap();

    let snap = h.metrics.snapshot();
    assert_eq!(snap.exchanges["binance"].ticks_processed, 50);

    h.aggregator.flush_at(at(5, 0)).await;
    let candle = h
        .candles
        .get(&CandleKey {
            instrument_id: 1,
            interval: CandleInterval::OneMinute,
            open_time: at(0, 0),
        })
        .unwrap();
    assert_eq!(candle.trades_count, 50);
}
