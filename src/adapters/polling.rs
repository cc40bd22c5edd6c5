use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::adapters::{forward_tick, AdapterRuntime, AdapterShared, ExchangeAdapter};
use crate::error::Result;
use crate::pipeline::TickWriter;
use crate::types::status::ExchangeStatus;
use crate::types::tick::{RawTick, SourceType};

/// Fetches recent trades for one symbol from an exchange's REST surface.
/// Cross-poll duplicates are the deduplicator's problem, not the fetcher's.
#[async_trait]
pub trait TickFetcher: Send + Sync + 'static {
    async fn fetch(&self, client: &reqwest::Client, symbol: &str) -> Result<Vec<RawTick>>;
}

/// REST polling adapter: one timer loop covering the adapter's symbols.
pub struct PollingAdapter<F: TickFetcher> {
    fetcher: Arc<F>,
    symbols: Vec<String>,
    poll_interval: Duration,
    shared: Arc<AdapterShared>,
    runtime: AdapterRuntime,
}

impl<F: TickFetcher> PollingAdapter<F> {
    pub fn new(exchange: &str, symbols: Vec<String>, poll_interval: Duration, fetcher: F) -> Self {
        PollingAdapter {
            fetcher: Arc::new(fetcher),
            symbols,
            poll_interval,
            shared: Arc::new(AdapterShared::new(exchange, SourceType::Polled)),
            runtime: AdapterRuntime::new(),
        }
    }
}

#[async_trait]
impl<F: TickFetcher> ExchangeAdapter for PollingAdapter<F> {
    fn exchange(&self) -> &str {
        self.shared.exchange()
    }

    fn source_type(&self) -> SourceType {
        SourceType::Polled
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    async fn start(&self, writer: TickWriter) -> Result<()> {
        let stop_rx = self.runtime.begin(self.exchange())?;
        let fetcher = self.fetcher.clone();
        let symbols = self.symbols.clone();
        let shared = self.shared.clone();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            run_poll(fetcher, symbols, poll_interval, writer, shared, stop_rx).await;
        });
        self.runtime.launch(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.runtime.finish(self.exchange()).await
    }

    fn status(&self) -> ExchangeStatus {
        self.shared.status()
    }
}

async fn run_poll<F: TickFetcher>(
    fetcher: Arc<F>,
    symbols: Vec<String>,
    poll_interval: Duration,
    writer: TickWriter,
    shared: Arc<AdapterShared>,
    mut stop_rx: watch::Receiver<bool>,
) {
    eprintln!("DEBUG run_poll entered at {:?}", std::time::Instant::now());
    let client = reqwest::Client::new();
    eprintln!("DEBUG client built at {:?}", std::time::Instant::now());
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        eprintln!("DEBUG loop iter");
        tokio::select! {
            changed = stop_rx.changed() => {
                eprintln!("DEBUG changed branch");
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                eprintln!("DEBUG tick branch");
                for symbol in &symbols {
                    match fetcher.fetch(&client, symbol).await {
                        Ok(ticks) => {
                            shared.set_online(true);
                            for tick in ticks {
                                if !forward_tick(&writer, &shared, tick).await {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(exchange = shared.exchange(), symbol = %symbol, error = %e, "poll failed");
                            shared.record_error(e.to_string());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::error::Error;
    use crate::observability::metrics::MetricsRegistry;
    use crate::pipeline::dedup::{InMemoryDedupStore, TickDeduplicator};
    use crate::pipeline::{SymbolFilter, TickPipeline};
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct StaticFetcher;

    #[async_trait]
    impl TickFetcher for StaticFetcher {
        async fn fetch(&self, _client: &reqwest::Client, symbol: &str) -> Result<Vec<RawTick>> {
            Ok(vec![RawTick {
                exchange: "binance".to_string(),
                source_type: SourceType::Polled,
                symbol: symbol.to_string(),
                price: Decimal::from(50000),
                volume: Decimal::ONE,
                timestamp: Utc::now(),
                received_at: Utc::now(),
            }])
        }
    }

    fn pipeline() -> (Arc<TickPipeline>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let dedup = Arc::new(TickDeduplicator::new(Arc::new(InMemoryDedupStore::new())));
        let filter = Arc::new(SymbolFilter::from_config(&[ExchangeConfig {
            exchange: "binance".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
        }]));
        (
            Arc::new(TickPipeline::new(dedup, filter, metrics.clone())),
            metrics,
        )
    }

    #[tokio::test]
    async fn polls_and_forwards_until_stopped() {
        let (pipeline, metrics) = pipeline();
        pipeline.start().unwrap();

        let adapter = PollingAdapter::new(
            "binance",
            vec!["BTCUSDT".to_string()],
            Duration::from_millis(10),
            StaticFetcher,
        );
        let t0 = std::time::Instant::now();
        adapter.start(pipeline.writer().unwrap()).await.unwrap();
        eprintln!("DEBUG start returned at {:?}", t0.elapsed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        eprintln!("DEBUG sleep done at {:?}", t0.elapsed());
        adapter.stop().await.unwrap();
        eprintln!("DEBUG stop done at {:?}", t0.elapsed());

        let status = adapter.status();
        eprintln!("DEBUG status = exchange={} online={} last_tick_at={:?} last_error={:?}", status.exchange, status.is_online, status.last_tick_at, status.last_error);
        eprintln!("DEBUG metrics snapshot = {:?}", metrics.snapshot());
        assert!(status.last_tick_at.is_some());
        assert!(metrics.snapshot().exchanges["binance"].ticks_received >= 1);

        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (pipeline, _) = pipeline();
        let adapter = PollingAdapter::new(
            "binance",
            vec!["BTCUSDT".to_string()],
            Duration::from_millis(10),
            StaticFetcher,
        );

        adapter.start(pipeline.writer().unwrap()).await.unwrap();
        assert!(matches!(
            adapter.start(pipeline.writer().unwrap()).await,
            Err(Error::AdapterNotIdle(_))
        ));
        adapter.stop().await.unwrap();
    }
}
