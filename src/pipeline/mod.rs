use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::error::{Error, Result};
use crate::observability::metrics::MetricsRegistry;
use crate::observability::tracing::tick_span;
use crate::types::tick::RawTick;

pub mod dedup;
pub mod filter;
pub mod handler;

pub use dedup::TickDeduplicator;
pub use filter::SymbolFilter;
pub use handler::TickHandler;

/// Bound on queued raw ticks. Producers block when the queue is full; this
/// is the backpressure signal and nothing is ever dropped.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Producer endpoint handed to adapters. Cloneable; every adapter task gets
/// its own copy and blocks on `send` when the pipeline is saturated.
#[derive(Clone)]
pub struct TickWriter {
    tx: mpsc::Sender<RawTick>,
    metrics: Arc<MetricsRegistry>,
}

impl TickWriter {
    pub async fn send(&self, tick: RawTick) -> Result<()> {
        self.metrics.record_tick_received(&tick.exchange);
        self.tx.send(tick).await.map_err(|_| Error::QueueClosed)
    }
}

/// The ingestion pipeline: a bounded multi-producer single-consumer queue
/// with a normalize → dedup → filter → fan-out consumer.
///
/// Handlers are registered before `start`; `start` is idempotent-rejecting.
/// `shutdown` closes the writer side, lets the consumer drain what is
/// queued, and joins it.
pub struct TickPipeline {
    tx: Mutex<Option<mpsc::Sender<RawTick>>>,
    rx: Mutex<Option<mpsc::Receiver<RawTick>>>,
    handlers: Mutex<Vec<Arc<dyn TickHandler>>>,
    started: AtomicBool,
    consumer: Mutex<Option<JoinHandle<()>>>,
    deduplicator: Arc<TickDeduplicator>,
    filter: Arc<SymbolFilter>,
    metrics: Arc<MetricsRegistry>,
}

impl TickPipeline {
    pub fn new(
        deduplicator: Arc<TickDeduplicator>,
        filter: Arc<SymbolFilter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::with_capacity(QUEUE_CAPACITY, deduplicator, filter, metrics)
    }

    pub fn with_capacity(
        capacity: usize,
        deduplicator: Arc<TickDeduplicator>,
        filter: Arc<SymbolFilter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        TickPipeline {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            handlers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            consumer: Mutex::new(None),
            deduplicator,
            filter,
            metrics,
        }
    }

    /// Append a handler; dispatch follows registration order.
    pub fn register_handler(&self, handler: Arc<dyn TickHandler>) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::HandlerRegisteredAfterStart);
        }
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
        Ok(())
    }

    pub fn writer(&self) -> Result<TickWriter> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => Ok(TickWriter {
                tx: tx.clone(),
                metrics: self.metrics.clone(),
            }),
            None => Err(Error::QueueClosed),
        }
    }

    /// Spawn the single consumer task. A second call is an error.
    pub fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::PipelineAlreadyStarted);
        }

        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(Error::PipelineAlreadyStarted)?;
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let deduplicator = self.deduplicator.clone();
        let filter = self.filter.clone();
        let metrics = self.metrics.clone();

        let handle = tokio::spawn(async move {
            consume(rx, handlers, deduplicator, filter, metrics).await;
        });
        *self.consumer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Close the writer side, drain the queue, and join the consumer.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::PipelineNotStarted);
        }
        // Dropping the pipeline's sender closes the channel once every
        // adapter's writer clone is gone too.
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();

        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "pipeline consumer terminated abnormally");
            }
        }
        Ok(())
    }
}

async fn consume(
    mut rx: mpsc::Receiver<RawTick>,
    handlers: Vec<Arc<dyn TickHandler>>,
    deduplicator: Arc<TickDeduplicator>,
    filter: Arc<SymbolFilter>,
    metrics: Arc<MetricsRegistry>,
) {
    while let Some(raw) = rx.recv().await {
        metrics.record_queue_size(rx.len() as u64);

        let received_at = raw.received_at;
        let tick = raw.normalize();
        let span = tick_span(&tick.exchange, &tick.symbol);

        async {
            match deduplicator.is_unique(&tick).await {
                Ok(true) => {}
                Ok(false) => {
                    metrics.record_duplicate_filtered(&tick.exchange);
                    return;
                }
                Err(e) => {
                    // Fail open: the unique upsert keys downstream tolerate
                    // the occasional duplicate row.
                    warn!(error = %e, "dedup backend unavailable, admitting tick");
                    metrics.record_error(&tick.exchange, "dedup");
                }
            }

            if !filter.is_allowed(&tick) {
                return;
            }

            for handler in &handlers {
                if let Err(e) = handler.handle(&tick).await {
                    warn!(handler = handler.name(), error = %e, "tick handler failed");
                    metrics.record_error(&tick.exchange, "handler");
                }
            }

            let elapsed_ms = (Utc::now() - received_at).num_milliseconds().max(0) as u64;
            metrics.record_tick_processed(&tick.exchange, elapsed_ms);
        }
        .instrument(span)
        .await;
    }
    debug!("pipeline consumer drained and stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::pipeline::dedup::InMemoryDedupStore;
    use crate::types::tick::{NormalizedTick, SourceType};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TickHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, tick: &NormalizedTick) -> Result<()> {
            self.seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(tick.symbol.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl TickHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _tick: &NormalizedTick) -> Result<()> {
            Err(Error::FeedDecode("synthetic failure".to_string()))
        }
    }

    fn raw(symbol: &str, source_type: SourceType, second: u32) -> RawTick {
        RawTick {
            exchange: "binance".to_string(),
            source_type,
            symbol: symbol.to_string(),
            price: Decimal::from(50000),
            volume: "1.5".parse().unwrap(),
            timestamp: chrono::Utc
                .with_ymd_and_hms(2024, 1, 1, 12, 0, second)
                .unwrap(),
            received_at: Utc::now(),
        }
    }

    fn pipeline(capacity: usize) -> (TickPipeline, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let dedup = Arc::new(TickDeduplicator::new(Arc::new(InMemoryDedupStore::new())));
        let filter = Arc::new(SymbolFilter::from_config(&[ExchangeConfig {
            exchange: "binance".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
        }]));
        (
            TickPipeline::with_capacity(capacity, dedup, filter, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (p, _) = pipeline(8);
        p.start().unwrap();
        assert!(matches!(p.start(), Err(Error::PipelineAlreadyStarted)));
        p.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn registering_after_start_is_rejected() {
        let (p, _) = pipeline(8);
        p.start().unwrap();
        let result = p.register_handler(Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        }));
        assert!(matches!(result, Err(Error::HandlerRegisteredAfterStart)));
        p.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_is_filtered_and_counted() {
        let (p, metrics) = pipeline(8);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        p.register_handler(recorder.clone()).unwrap();

        let writer = p.writer().unwrap();
        writer.send(raw("btcusdt", SourceType::Streaming, 0)).await.unwrap();
        writer.send(raw("BTCUSDT", SourceType::Polled, 0)).await.unwrap();
        p.start().unwrap();
        drop(writer);
        p.shutdown().await.unwrap();

        let seen = recorder.seen.lock().unwrap_or_else(|e| e.into_inner()).clone();
        assert_eq!(seen, vec!["BTCUSDT".to_string()]);

        let snap = metrics.snapshot();
        assert_eq!(snap.exchanges["binance"].duplicates_filtered, 1);
        assert_eq!(snap.exchanges["binance"].ticks_processed, 1);
        assert_eq!(snap.exchanges["binance"].ticks_received, 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_next_one() {
        let (p, metrics) = pipeline(8);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        p.register_handler(Arc::new(Failing)).unwrap();
        p.register_handler(recorder.clone()).unwrap();

        let writer = p.writer().unwrap();
        writer.send(raw("btcusdt", SourceType::Streaming, 0)).await.unwrap();
        p.start().unwrap();
        drop(writer);
        p.shutdown().await.unwrap();

        assert_eq!(
            recorder.seen.lock().unwrap_or_else(|e| e.into_inner()).len(),
            1
        );
        let snap = metrics.snapshot();
        assert_eq!(snap.errors_by_kind["handler"], 1);
        assert_eq!(snap.exchanges["binance"].ticks_processed, 1);
    }

    #[tokio::test]
    async fn unlisted_symbol_is_dropped_without_metric() {
        let (p, metrics) = pipeline(8);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        p.register_handler(recorder.clone()).unwrap();

        let writer = p.writer().unwrap();
        writer.send(raw("dogeusdt", SourceType::Streaming, 0)).await.unwrap();
        p.start().unwrap();
        drop(writer);
        p.shutdown().await.unwrap();

        assert!(recorder.seen.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
        let snap = metrics.snapshot();
        assert_eq!(snap.exchanges["binance"].ticks_processed, 0);
        assert_eq!(snap.exchanges["binance"].duplicates_filtered, 0);
    }

    #[tokio::test]
    async fn producers_block_when_queue_is_full() {
        let (p, _) = pipeline(2);
        let writer = p.writer().unwrap();

        writer.send(raw("btcusdt", SourceType::Streaming, 0)).await.unwrap();
        writer.send(raw("btcusdt", SourceType::Streaming, 1)).await.unwrap();

        // Queue is at capacity and the consumer has not started: the next
        // send must block rather than drop.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            writer.send(raw("btcusdt", SourceType::Streaming, 2)),
        )
        .await;
        assert!(blocked.is_err());

        // Once the consumer drains, the same send completes.
        p.start().unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            writer.send(raw("btcusdt", SourceType::Streaming, 3)),
        )
        .await
        .expect("send should unblock after drain")
        .unwrap();

        drop(writer);
        p.shutdown().await.unwrap();
    }

    #[test]
    fn queue_capacity_matches_contract() {
        assert_eq!(QUEUE_CAPACITY, 10_000);
    }
}
