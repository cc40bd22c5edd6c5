use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::adapters::{forward_tick, AdapterRuntime, AdapterShared, ExchangeAdapter};
use crate::error::Result;
use crate::pipeline::TickWriter;
use crate::types::status::ExchangeStatus;
use crate::types::tick::{RawTick, SourceType};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Turns one exchange's websocket frames into raw ticks.
pub trait FeedDecoder: Send + Sync + 'static {
    /// Subscription URL covering all requested symbols.
    fn stream_url(&self, symbols: &[String]) -> String;

    /// Decode one text frame; Ok(None) for heartbeats and other non-trade
    /// frames.
    fn decode(&self, frame: &str) -> Result<Option<RawTick>>;
}

/// Websocket push adapter.
///
/// The producer task reconnects transparently with exponential backoff; on
/// disconnect the adapter stays Running with `is_online = false` until the
/// next connect succeeds.
pub struct StreamingAdapter<D: FeedDecoder> {
    decoder: Arc<D>,
    symbols: Vec<String>,
    shared: Arc<AdapterShared>,
    runtime: AdapterRuntime,
}

impl<D: FeedDecoder> StreamingAdapter<D> {
    pub fn new(exchange: &str, symbols: Vec<String>, decoder: D) -> Self {
        StreamingAdapter {
            decoder: Arc::new(decoder),
            symbols,
            shared: Arc::new(AdapterShared::new(exchange, SourceType::Streaming)),
            runtime: AdapterRuntime::new(),
        }
    }
}

#[async_trait]
impl<D: FeedDecoder> ExchangeAdapter for StreamingAdapter<D> {
    fn exchange(&self) -> &str {
        self.shared.exchange()
    }

    fn source_type(&self) -> SourceType {
        SourceType::Streaming
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    async fn start(&self, writer: TickWriter) -> Result<()> {
        let stop_rx = self.runtime.begin(self.exchange())?;
        let decoder = self.decoder.clone();
        let symbols = self.symbols.clone();
        let shared = self.shared.clone();

        let handle = tokio::spawn(async move {
            run_stream(decoder, symbols, writer, shared, stop_rx).await;
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

async fn run_stream<D: FeedDecoder>(
    decoder: Arc<D>,
    symbols: Vec<String>,
    writer: TickWriter,
    shared: Arc<AdapterShared>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let url = decoder.stream_url(&symbols);
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *stop_rx.borrow() {
            return;
        }

        match connect_async(&url).await {
            Ok((ws, _)) => {
                info!(exchange = shared.exchange(), "stream connected");
                shared.set_online(true);
                backoff = INITIAL_BACKOFF;

                let (mut sink, mut stream) = ws.split();
                loop {
                    tokio::select! {
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                let _ = sink.send(Message::Close(None)).await;
                                return;
                            }
                        }
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => match decoder.decode(&text) {
                                Ok(Some(tick)) => {
                                    if !forward_tick(&writer, &shared, tick).await {
                                        // Pipeline gone: shutdown in progress.
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!(exchange = shared.exchange(), error = %e, "undecodable frame")
                                }
                            },
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(exchange = shared.exchange(), "stream closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                shared.record_error(e.to_string());
                                break;
                            }
                        }
                    }
                }
                shared.set_online(false);
            }
            Err(e) => {
                shared.record_error(e.to_string());
                warn!(exchange = shared.exchange(), error = %e, "stream connect failed");
            }
        }

        // Cancellable reconnect delay, doubled up to the cap.
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
