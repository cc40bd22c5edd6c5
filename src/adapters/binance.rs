use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::adapters::polling::TickFetcher;
use crate::adapters::streaming::FeedDecoder;
use crate::error::{Error, Result};
use crate::types::tick::{RawTick, SourceType};

const BINANCE_WS_BASE_URL: &str = "wss://stream.binance.com:9443/stream";
const BINANCE_REST_BASE_URL: &str = "https://api.binance.com";
const RECENT_TRADES_LIMIT: u32 = 100;

/// Combined-stream frame wrapping one payload.
#[derive(Debug, Deserialize)]
struct CombinedFrame {
    #[allow(dead_code)]
    stream: String,
    data: TradeData,
}

/// Binance `@trade` event payload.
#[derive(Debug, Deserialize)]
struct TradeData {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

fn to_raw_tick(
    symbol: &str,
    price: &str,
    quantity: &str,
    time_ms: i64,
    source_type: SourceType,
) -> Result<RawTick> {
    let price: Decimal = price
        .parse()
        .map_err(|_| Error::InvalidPrice(price.to_string()))?;
    let volume: Decimal = quantity
        .parse()
        .map_err(|_| Error::InvalidVolume(quantity.to_string()))?;
    let timestamp = Utc
        .timestamp_millis_opt(time_ms)
        .single()
        .ok_or(Error::InvalidTimestamp(time_ms))?;

    Ok(RawTick {
        exchange: "binance".to_string(),
        source_type,
        symbol: symbol.to_string(),
        price,
        volume,
        timestamp,
        received_at: Utc::now(),
    })
}

/// Decoder for Binance spot `@trade` combined streams.
pub struct BinanceTradeDecoder;

impl FeedDecoder for BinanceTradeDecoder {
    fn stream_url(&self, symbols: &[String]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@trade", s.to_lowercase()))
            .collect();
        format!("{}?streams={}", BINANCE_WS_BASE_URL, streams.join("/"))
    }

    fn decode(&self, frame: &str) -> Result<Option<RawTick>> {
        let frame: CombinedFrame =
            serde_json::from_str(frame).map_err(|e| Error::FeedDecode(e.to_string()))?;
        if frame.data.event_type != "trade" {
            return Ok(None);
        }
        to_raw_tick(
            &frame.data.symbol,
            &frame.data.price,
            &frame.data.quantity,
            frame.data.trade_time,
            SourceType::Streaming,
        )
        .map(Some)
    }
}

/// Recent-trades row from `/api/v3/trades`.
#[derive(Debug, Deserialize)]
struct RestTrade {
    #[allow(dead_code)]
    id: u64,
    price: String,
    qty: String,
    time: i64,
}

/// REST fetcher for the recent-trades endpoint; the dedup layer collapses
/// overlap between consecutive polls and with the streaming feed.
pub struct BinanceRestFetcher;

#[async_trait]
impl TickFetcher for BinanceRestFetcher {
    async fn fetch(&self, client: &reqwest::Client, symbol: &str) -> Result<Vec<RawTick>> {
        let url = format!(
            "{}/api/v3/trades?symbol={}&limit={}",
            BINANCE_REST_BASE_URL,
            symbol.to_uppercase(),
            RECENT_TRADES_LIMIT
        );
        let trades: Vec<RestTrade> = client.get(&url).send().await?.json().await?;
        trades
            .into_iter()
            .map(|t| to_raw_tick(symbol, &t.price, &t.qty, t.time, SourceType::Polled))
            .collect()
    }
}
