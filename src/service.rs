use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::adapters::binance::{BinanceRestFetcher, BinanceTradeDecoder};
use crate::adapters::{ExchangeAdapter, PollingAdapter, StreamingAdapter};
use crate::aggregator::{CandleAggregator, InstrumentCache};
use crate::alerts::notify::build_channels;
use crate::alerts::AlertEngine;
use crate::api::{create_router, ApiState};
use crate::config::{AppConfig, ExchangeConfig};
use crate::error::{Error, Result};
use crate::observability::metrics::MetricsRegistry;
use crate::pipeline::dedup::{DedupStore, InMemoryDedupStore, RedisDedupStore, TickDeduplicator};
use crate::pipeline::{SymbolFilter, TickPipeline};
use crate::storage::memory::{
    InMemoryAlertHistoryRepository, InMemoryAlertRuleRepository, InMemoryCandleRepository,
    InMemoryExchangeStatusRepository, InMemoryInstrumentRepository, InMemoryTickRepository,
};
use crate::storage::postgres::{
    self, PgAlertHistoryRepository, PgAlertRuleRepository, PgCandleRepository,
    PgExchangeStatusRepository, PgInstrumentRepository, PgTickRepository,
};
use crate::storage::{
    AlertHistoryRepository, AlertRuleRepository, CandleRepository, ExchangeStatusRepository,
    InstrumentRepository, TickRepository,
};
use crate::utils::TaskSupervisor;

const STATUS_PROBE_INTERVAL: Duration = Duration::from_secs(30);
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ADAPTER_STOP_DEADLINE: Duration = Duration::from_secs(5);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

struct Stores {
    ticks: Arc<dyn TickRepository>,
    candles: Arc<dyn CandleRepository>,
    instruments: Arc<dyn InstrumentRepository>,
    rules: Arc<dyn AlertRuleRepository>,
    history: Arc<dyn AlertHistoryRepository>,
    statuses: Arc<dyn ExchangeStatusRepository>,
}

/// Wires configuration, stores, the pipeline and its handlers, adapters and
/// the periodic loops into one runnable unit.
pub struct AppService {
    config: AppConfig,
    metrics: Arc<MetricsRegistry>,
    pipeline: Arc<TickPipeline>,
    aggregator: Arc<CandleAggregator>,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    tick_repo: Arc<dyn TickRepository>,
    status_repo: Arc<dyn ExchangeStatusRepository>,
    history_repo: Arc<dyn AlertHistoryRepository>,
    supervisor: Mutex<TaskSupervisor>,
    shutdown_tx: watch::Sender<bool>,
}

impl AppService {
    pub async fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsRegistry::new());
        let stores = build_stores(&config).await?;

        let dedup_store: Arc<dyn DedupStore> = if config.redis.url.is_empty() {
            info!("no redis configured, using in-process dedup store");
            Arc::new(InMemoryDedupStore::new())
        } else {
            Arc::new(RedisDedupStore::connect(&config.redis.url).await?)
        };
        let deduplicator = Arc::new(TickDeduplicator::new(dedup_store));
        let filter = Arc::new(SymbolFilter::from_config(&config.exchanges));
        let pipeline = Arc::new(TickPipeline::new(deduplicator, filter, metrics.clone()));

        let instrument_cache = Arc::new(InstrumentCache::new(stores.instruments.clone()));
        let aggregator = Arc::new(CandleAggregator::new(
            &config.aggregator,
            instrument_cache.clone(),
            stores.ticks.clone(),
            stores.candles.clone(),
            metrics.clone(),
        ));
        let channels = build_channels(&config.alerts.channels)?;
        let alert_engine = Arc::new(AlertEngine::new(
            &config.alerts,
            stores.rules.clone(),
            instrument_cache,
            stores.history.clone(),
            channels,
        ));

        // The aggregator runs first so alert evaluation sees a populated
        // instrument cache for the tick it is handling.
        pipeline.register_handler(aggregator.clone())?;
        pipeline.register_handler(alert_engine)?;

        let adapters = build_adapters(&config.exchanges)?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(AppService {
            config,
            metrics,
            pipeline,
            aggregator,
            adapters,
            tick_repo: stores.ticks,
            status_repo: stores.statuses,
            history_repo: stores.history,
            supervisor: Mutex::new(TaskSupervisor::new()),
            shutdown_tx,
        })
    }

    /// Start the consumer, the adapters and the periodic loops.
    pub async fn run(&self) -> Result<()> {
        self.pipeline.start()?;

        for adapter in &self.adapters {
            adapter.start(self.pipeline.writer()?).await?;
            info!(
                exchange = adapter.exchange(),
                source = %adapter.source_type(),
                symbols = adapter.symbols().len(),
                "adapter started"
            );
        }

        let api_listener = if self.config.api.enabled {
            let listener = TcpListener::bind(&self.config.api.bind)
                .await
                .map_err(Error::ChannelIo)?;
            info!(bind = %self.config.api.bind, "read api listening");
            Some(listener)
        } else {
            None
        };

        let mut supervisor = self.supervisor.lock().unwrap_or_else(|e| e.into_inner());

        {
            let aggregator = self.aggregator.clone();
            let flush_every = self.config.aggregator.flush_interval();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            supervisor.spawn("flush_loop", async move {
                let mut ticker = interval(flush_every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => aggregator.flush().await,
                    }
                }
            });
        }

        {
            let adapters = self.adapters.clone();
            let status_repo = self.status_repo.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            supervisor.spawn("status_probe", async move {
                let mut ticker = interval(STATUS_PROBE_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            for adapter in &adapters {
                                let status = adapter.status();
                                if let Err(e) = status_repo.upsert(&status).await {
                                    warn!(exchange = %status.exchange, error = %e, "status upsert failed");
                                }
                            }
                        }
                    }
                }
            });
        }

        {
            let tick_repo = self.tick_repo.clone();
            let retention_days = self.config.database.tick_retention_days;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            supervisor.spawn("tick_retention", async move {
                let mut ticker = interval(RETENTION_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
                            match tick_repo.prune_before(cutoff).await {
                                Ok(0) => {}
                                Ok(pruned) => info!(pruned, "expired ticks removed"),
                                Err(e) => warn!(error = %e, "tick retention failed"),
                            }
                        }
                    }
                }
            });
        }

        if let Some(listener) = api_listener {
            let state = Arc::new(ApiState {
                metrics: self.metrics.clone(),
                statuses: self.status_repo.clone(),
                history: self.history_repo.clone(),
            });
            let router = create_router(state);

            let mut shutdown_rx = self.shutdown_tx.subscribe();
            supervisor.spawn("read_api", async move {
                let shutdown = async move {
                    while shutdown_rx.changed().await.is_ok() {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                };
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    warn!(error = %e, "read api terminated");
                }
            });
        }

        Ok(())
    }

    /// Orderly unwind: stop producers, close and drain the pipeline, run a
    /// final best-effort flush, then cancel the periodic loops.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        let stops = self.adapters.iter().map(|adapter| async move {
            match tokio::time::timeout(ADAPTER_STOP_DEADLINE, adapter.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(exchange = adapter.exchange(), error = %e, "adapter stop failed")
                }
                Err(_) => warn!(exchange = adapter.exchange(), "adapter stop timed out"),
            }
        });
        futures_util::future::join_all(stops).await;

        let drain = async {
            if let Err(e) = self.pipeline.shutdown().await {
                warn!(error = %e, "pipeline shutdown failed");
            }
            self.aggregator.flush().await;
        };
        if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
            warn!("shutdown deadline exceeded before drain completed");
        }

        self.supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shutdown_all();
        info!("shutdown complete");
    }
}

async fn build_stores(config: &AppConfig) -> Result<Stores> {
    if config.database.url.is_empty() {
        info!("no database configured, using in-memory stores");
        return Ok(Stores {
            ticks: Arc::new(InMemoryTickRepository::new()),
            candles: Arc::new(InMemoryCandleRepository::new()),
            instruments: Arc::new(InMemoryInstrumentRepository::new()),
            rules: Arc::new(InMemoryAlertRuleRepository::new()),
            history: Arc::new(InMemoryAlertHistoryRepository::new()),
            statuses: Arc::new(InMemoryExchangeStatusRepository::new()),
        });
    }

    let pool = postgres::connect(&config.database).await?;
    Ok(Stores {
        ticks: Arc::new(PgTickRepository::new(pool.clone())),
        candles: Arc::new(PgCandleRepository::new(pool.clone())),
        instruments: Arc::new(PgInstrumentRepository::new(pool.clone())),
        rules: Arc::new(PgAlertRuleRepository::new(pool.clone())),
        history: Arc::new(PgAlertHistoryRepository::new(pool.clone())),
        statuses: Arc::new(PgExchangeStatusRepository::new(pool)),
    })
}

fn build_adapters(exchanges: &[ExchangeConfig]) -> Result<Vec<Arc<dyn ExchangeAdapter>>> {
    let mut adapters: Vec<Arc<dyn ExchangeAdapter>> = Vec::new();
    for ex in exchanges {
        match ex.exchange.to_lowercase().as_str() {
            "binance" => {
                adapters.push(Arc::new(StreamingAdapter::new(
                    &ex.exchange,
                    ex.symbols.clone(),
                    BinanceTradeDecoder,
                )));
                adapters.push(Arc::new(PollingAdapter::new(
                    &ex.exchange,
                    ex.symbols.clone(),
                    DEFAULT_POLL_INTERVAL,
                    BinanceRestFetcher,
                )));
            }
            other => {
                return Err(Error::Config(format!(
                    "no adapter available for exchange {}",
                    other
                )))
            }
        }
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AggregatorConfig, AlertsConfig, ApiConfig, DatabaseConfig, RedisConfig,
    };

    fn config() -> AppConfig {
        AppConfig {
            exchanges: vec![ExchangeConfig {
                exchange: "binance".to_string(),
                symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            }],
            aggregator: AggregatorConfig::default(),
            alerts: AlertsConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            api: ApiConfig {
                bind: "127.0.0.1:0".to_string(),
                enabled: false,
            },
        }
    }

    #[tokio::test]
    async fn builds_streaming_and_polling_adapter_per_exchange() {
        let service = AppService::build(config()).await.unwrap();
        assert_eq!(service.adapters.len(), 2);
        assert!(service
            .adapters
            .iter()
            .any(|a| a.source_type() == crate::types::tick::SourceType::Streaming));
        assert!(service
            .adapters
            .iter()
            .any(|a| a.source_type() == crate::types::tick::SourceType::Polled));
    }

    #[tokio::test]
    async fn unknown_exchange_is_a_configuration_error() {
        let mut cfg = config();
        cfg.exchanges[0].exchange = "krakatoa".to_string();
        assert!(matches!(
            AppService::build(cfg).await,
            Err(Error::Config(_))
        ));
    }
}
