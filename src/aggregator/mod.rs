use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::AggregatorConfig;
use crate::error::Result;
use crate::observability::metrics::MetricsRegistry;
use crate::pipeline::handler::TickHandler;
use crate::storage::{CandleRepository, PersistedTick, TickRepository};
use crate::types::candle::{Candle, CandleInterval, CandleKey};
use crate::types::tick::NormalizedTick;

pub mod instruments;

pub use instruments::InstrumentCache;

/// Folds admitted ticks into per-(instrument, interval, open-time) candles
/// and buffers raw ticks for bulk insert.
///
/// The candle map is the only holder of unflushed OHLCV state; candles are
/// evicted to storage once their window closes or they outlive the in-memory
/// retention horizon for late ticks.
pub struct CandleAggregator {
    instruments: Arc<InstrumentCache>,
    candles: DashMap<CandleKey, Candle>,
    buffer: ArrayQueue<PersistedTick>,
    tick_repo: Arc<dyn TickRepository>,
    candle_repo: Arc<dyn CandleRepository>,
    intervals: Vec<CandleInterval>,
    tick_buffer_size: usize,
    retention: Duration,
    flush_inflight: AtomicBool,
    tick_flush_inflight: AtomicBool,
    metrics: Arc<MetricsRegistry>,
}

impl CandleAggregator {
    pub fn new(
        config: &AggregatorConfig,
        instruments: Arc<InstrumentCache>,
        tick_repo: Arc<dyn TickRepository>,
        candle_repo: Arc<dyn CandleRepository>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        CandleAggregator {
            instruments,
            candles: DashMap::new(),
            // Headroom over the flush threshold so a slow database does not
            // immediately translate into dropped records.
            buffer: ArrayQueue::new(config.tick_buffer_size * 8),
            tick_repo,
            candle_repo,
            intervals: config.candle_intervals.clone(),
            tick_buffer_size: config.tick_buffer_size,
            retention: Duration::minutes(config.in_memory_candle_retention_minutes),
            flush_inflight: AtomicBool::new(false),
            tick_flush_inflight: AtomicBool::new(false),
            metrics,
        }
    }

    /// Periodic entry point; also invoked once more during shutdown.
    pub async fn flush(&self) {
        self.flush_at(Utc::now()).await;
    }

    /// Single-flight: concurrent calls while a flush is executing return
    /// immediately. Ticks flush before candles. An inline tick drain from
    /// the handler holds its own flag, so it skips only this cycle's tick
    /// step and never the candle flush.
    pub async fn flush_at(&self, now: DateTime<Utc>) {
        if self
            .flush_inflight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.flush_ticks_single_flight().await;
        self.flush_candles(now).await;
        self.flush_inflight.store(false, Ordering::SeqCst);
    }

    /// Number of candles currently held in memory.
    pub fn live_candles(&self) -> usize {
        self.candles.len()
    }

    /// Drain up to twice the flush threshold and bulk-insert. A failed
    /// batch is discarded: raw ticks are at-most-once in storage and the
    /// loss is confined to windows where the database is unreachable.
    async fn flush_ticks(&self) {
        let max = self.tick_buffer_size * 2;
        let mut batch = Vec::with_capacity(max.min(self.buffer.len()));
        while batch.len() < max {
            match self.buffer.pop() {
                Some(tick) => batch.push(tick),
                None => break,
            }
        }
        if batch.is_empty() {
            return;
        }

        match self.tick_repo.bulk_insert(&batch).await {
            Ok(stored) => {
                self.metrics.record_ticks_stored(stored);
                debug!(stored, "tick batch flushed");
            }
            Err(e) => {
                warn!(discarded = batch.len(), error = %e, "tick bulk insert failed, batch discarded");
                self.metrics.record_error("aggregator", "tick_flush");
            }
        }
    }

    async fn flush_candles(&self, now: DateTime<Utc>) {
        let selected: Vec<Candle> = self
            .candles
            .iter()
            .filter(|entry| {
                let c = entry.value();
                c.close_time <= now || now - c.open_time > self.retention
            })
            .map(|entry| entry.value().clone())
            .collect();
        if selected.is_empty() {
            return;
        }

        match self.candle_repo.bulk_upsert(&selected).await {
            Ok(upserted) => {
                for candle in &selected {
                    // Keep entries that received ticks after the snapshot;
                    // they will upsert again on the next flush.
                    self.candles
                        .remove_if(&candle.key(), |_, live| live.trades_count == candle.trades_count);
                }
                debug!(upserted, "candle batch flushed");
            }
            Err(e) => {
                warn!(count = selected.len(), error = %e, "candle bulk upsert failed, retrying next flush");
                self.metrics.record_error("aggregator", "candle_flush");
            }
        }
    }

    /// Serializes the tick-buffer drain only; a drain already in flight
    /// makes this call a no-op without touching the candle path.
    async fn flush_ticks_single_flight(&self) {
        if self
            .tick_flush_inflight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.flush_ticks().await;
        self.tick_flush_inflight.store(false, Ordering::SeqCst);
    }

    fn buffer_tick(&self, tick: PersistedTick) {
        if self.buffer.push(tick).is_err() {
            warn!("tick buffer full, dropping record");
            self.metrics.record_error("aggregator", "tick_buffer_full");
        }
    }
}

#[async_trait]
impl TickHandler for CandleAggregator {
    fn name(&self) -> &'static str {
        "candle_aggregator"
    }

    async fn handle(&self, tick: &NormalizedTick) -> Result<()> {
        let instrument = self
            .instruments
            .get_or_create(&tick.symbol, &tick.exchange)
            .await?;

        self.buffer_tick(PersistedTick::from_tick(tick, instrument.id));

        for interval in &self.intervals {
            let open_time = interval.open_time_for(tick.timestamp);
            let key = CandleKey {
                instrument_id: instrument.id,
                interval: *interval,
                open_time,
            };
            // The map entry guard serializes the apply per candle key.
            let mut entry = self
                .candles
                .entry(key)
                .or_insert_with(|| Candle::new(instrument.id, *interval, open_time));
            entry.apply_tick(tick.price, tick.volume);
        }

        if self.buffer.len() >= self.tick_buffer_size {
            self.flush_ticks_single_flight().await;
        }
        Ok(())
    }
}
