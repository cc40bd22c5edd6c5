use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{Error, Result};
use crate::pipeline::TickWriter;
use crate::types::status::ExchangeStatus;
use crate::types::tick::SourceType;

pub mod binance;
pub mod polling;
pub mod streaming;

pub use polling::{PollingAdapter, TickFetcher};
pub use streaming::{FeedDecoder, StreamingAdapter};

/// Lifecycle states of an adapter. Reconnects happen inside Running; the
/// pipeline never observes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Running,
    Stopping,
}

/// One feed of raw ticks into the pipeline.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> &str;

    fn source_type(&self) -> SourceType;

    fn symbols(&self) -> &[String];

    /// Begin producing into the writer. Fails unless the adapter is idle.
    async fn start(&self, writer: TickWriter) -> Result<()>;

    /// Unwind the producer task. Fails unless the adapter is running.
    async fn stop(&self) -> Result<()>;

    fn status(&self) -> ExchangeStatus;
}

/// Connection health shared between an adapter's producer task and its
/// status surface.
pub struct AdapterShared {
    exchange: String,
    source_type: SourceType,
    is_online: AtomicBool,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl AdapterShared {
    pub fn new(exchange: &str, source_type: SourceType) -> Self {
        AdapterShared {
            exchange: exchange.to_string(),
            source_type,
            is_online: AtomicBool::new(false),
            last_tick_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn set_online(&self, online: bool) {
        self.is_online.store(online, Ordering::SeqCst);
    }

    pub fn record_error(&self, error: String) {
        self.is_online.store(false, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    pub fn record_tick(&self) {
        *self.last_tick_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    pub fn status(&self) -> ExchangeStatus {
        ExchangeStatus {
            exchange: self.exchange.clone(),
            source_type: self.source_type,
            is_online: self.is_online.load(Ordering::SeqCst),
            last_tick_at: *self.last_tick_at.lock().unwrap_or_else(|e| e.into_inner()),
            last_error: self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Start/stop plumbing common to streaming and polling adapters: the
/// Idle -> Running -> Stopping -> Idle machine, the stop signal, and the
/// producer task handle.
pub struct AdapterRuntime {
    state: Mutex<AdapterState>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AdapterRuntime {
    pub fn new() -> Self {
        AdapterRuntime {
            state: Mutex::new(AdapterState::Idle),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AdapterState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transition Idle -> Running and hand back the stop receiver for the
    /// producer task.
    pub fn begin(&self, name: &str) -> Result<watch::Receiver<bool>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != AdapterState::Idle {
            return Err(Error::AdapterNotIdle(name.to_string()));
        }
        *state = AdapterState::Running;

        let (tx, rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx)
    }

    pub fn launch(&self, handle: JoinHandle<()>) {
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Signal the producer task and join it, then return to Idle.
    pub async fn finish(&self, name: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != AdapterState::Running {
                return Err(Error::AdapterNotRunning(name.to_string()));
            }
            *state = AdapterState::Stopping;
        }

        let stop_tx = self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        }

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(adapter = name, error = %e, "adapter task terminated abnormally");
            }
        }

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = AdapterState::Idle;
        Ok(())
    }
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared by both adapter run loops: push a decoded tick downstream,
/// blocking while the pipeline is saturated. Returns false when the
/// pipeline has shut down and the producer should unwind.
pub(crate) async fn forward_tick(
    writer: &TickWriter,
    shared: &Arc<AdapterShared>,
    tick: crate::types::tick::RawTick,
) -> bool {
    shared.record_tick();
    writer.send(tick).await.is_ok()
}
