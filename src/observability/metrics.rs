use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Per-exchange counter cell. All operations are atomic increments so the
/// hot path never takes a lock beyond the map's shard read.
#[derive(Default)]
struct ExchangeCounters {
    received: AtomicU64,
    processed: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
    processing_ms_total: AtomicU64,
}

/// Process-wide pipeline metrics.
///
/// Averages are the mean of all processing samples since construction; no
/// decay is applied.
pub struct MetricsRegistry {
    started_at: DateTime<Utc>,
    exchanges: DashMap<String, Arc<ExchangeCounters>>,
    errors_by_kind: DashMap<String, Arc<AtomicU64>>,
    queue_size: AtomicU64,
    ticks_stored: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry {
            started_at: Utc::now(),
            exchanges: DashMap::new(),
            errors_by_kind: DashMap::new(),
            queue_size: AtomicU64::new(0),
            ticks_stored: AtomicU64::new(0),
        }
    }

    fn cell(&self, exchange: &str) -> Arc<ExchangeCounters> {
        if let Some(cell) = self.exchanges.get(exchange) {
            return Arc::clone(cell.value());
        }
        Arc::clone(self.exchanges.entry(exchange.to_string()).or_default().value())
    }

    pub fn record_tick_received(&self, exchange: &str) {
        self.cell(exchange).received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_processed(&self, exchange: &str, processing_ms: u64) {
        let cell = self.cell(exchange);
        cell.processed.fetch_add(1, Ordering::Relaxed);
        cell.processing_ms_total
            .fetch_add(processing_ms, Ordering::Relaxed);
    }

    pub fn record_duplicate_filtered(&self, exchange: &str) {
        self.cell(exchange).duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, exchange: &str, kind: &str) {
        self.cell(exchange).errors.fetch_add(1, Ordering::Relaxed);
        let counter = match self.errors_by_kind.get(kind) {
            Some(c) => Arc::clone(c.value()),
            None => Arc::clone(self.errors_by_kind.entry(kind.to_string()).or_default().value()),
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    pub fn record_ticks_stored(&self, count: u64) {
        self.ticks_stored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        let mut exchanges = BTreeMap::new();
        let mut totals = ExchangeStats::default();
        let mut total_ms = 0u64;

        for entry in self.exchanges.iter() {
            let c = entry.value();
            let processed = c.processed.load(Ordering::Relaxed);
            let ms = c.processing_ms_total.load(Ordering::Relaxed);
            let stats = ExchangeStats {
                ticks_received: c.received.load(Ordering::Relaxed),
                ticks_processed: processed,
                duplicates_filtered: c.duplicates.load(Ordering::Relaxed),
                errors: c.errors.load(Ordering::Relaxed),
                avg_processing_ms: mean(ms, processed),
            };
            totals.ticks_received += stats.ticks_received;
            totals.ticks_processed += stats.ticks_processed;
            totals.duplicates_filtered += stats.duplicates_filtered;
            totals.errors += stats.errors;
            total_ms += ms;
            exchanges.insert(entry.key().clone(), stats);
        }
        totals.avg_processing_ms = mean(total_ms, totals.ticks_processed);

        let errors_by_kind = self
            .errors_by_kind
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            snapshot_at: now,
            uptime_seconds: (now - self.started_at).num_seconds(),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            ticks_stored_total: self.ticks_stored.load(Ordering::Relaxed),
            errors_by_kind,
            totals,
            exchanges,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(total_ms: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_ms as f64 / count as f64
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExchangeStats {
    pub ticks_received: u64,
    pub ticks_processed: u64,
    pub duplicates_filtered: u64,
    pub errors: u64,
    pub avg_processing_ms: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub snapshot_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub queue_size: u64,
    pub ticks_stored_total: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub totals: ExchangeStats,
    pub exchanges: BTreeMap<String, ExchangeStats>,
}
