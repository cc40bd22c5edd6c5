use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a tick reached us from the exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Streaming,
    Polled,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Streaming => "streaming",
            SourceType::Polled => "polled",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trade as produced by an adapter, symbol still in the
/// exchange's native casing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawTick {
    pub exchange: String,
    pub source_type: SourceType,
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl RawTick {
    /// Canonicalize into the form the pipeline hands to handlers.
    pub fn normalize(self) -> NormalizedTick {
        NormalizedTick {
            exchange: self.exchange,
            source_type: self.source_type,
            symbol: self.symbol.to_uppercase(),
            price: self.price,
            volume: self.volume,
            timestamp: self.timestamp,
            received_at: self.received_at,
        }
    }
}

/// A canonicalized tick: upper-case symbol, UTC timestamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizedTick {
    pub exchange: String,
    pub source_type: SourceType,
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl NormalizedTick {
    /// Canonical identity of the trade across source types.
    ///
    /// Source-type and receive-time are deliberately excluded so the same
    /// trade reported by the streaming and polled feed of one exchange
    /// collapses to a single key. Decimals are normalized (trailing zeros
    /// stripped) so equal values render equally.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.exchange,
            self.symbol,
            self.price.normalize(),
            self.volume.normalize(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        )
    }

    /// UTC minute bucket of the event timestamp, used to shard the dedup set.
    pub fn minute_bucket(&self) -> String {
        self.timestamp.format("%Y%m%d%H%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tick(source_type: SourceType, symbol: &str) -> RawTick {
        RawTick {
            exchange: "binance".to_string(),
            source_type,
            symbol: symbol.to_string(),
            price: Decimal::from(50000),
            volume: "1.5".parse().unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            received_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 1).unwrap(),
        }
    }

    #[test]
    fn normalization_uppercases_symbol() {
        let n = tick(SourceType::Streaming, "btcusdt").normalize();
        assert_eq!(n.symbol, "BTCUSDT");
    }

    #[test]
    fn dedup_key_ignores_source_type_and_receive_time() {
        let a = tick(SourceType::Streaming, "btcusdt").normalize();
        let mut b_raw = tick(SourceType::Polled, "BTCUSDT");
        b_raw.received_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 5).unwrap();
        let b = b_raw.normalize();

        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_distinguishes_price() {
        let a = tick(SourceType::Streaming, "btcusdt").normalize();
        let mut b = tick(SourceType::Streaming, "btcusdt").normalize();
        b.price = Decimal::from(50001);

        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dedup_key_normalizes_decimal_scale() {
        let a = tick(SourceType::Streaming, "btcusdt").normalize();
        let mut b = tick(SourceType::Polled, "btcusdt").normalize();
        // Same value parsed with a different scale must collapse.
        b.price = "50000.00".parse().unwrap();
        b.volume = "1.50".parse().unwrap();

        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn minute_bucket_truncates_to_minute() {
        let mut raw = tick(SourceType::Streaming, "btcusdt");
        raw.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap();
        let n = raw.normalize();
        assert_eq!(n.minute_bucket(), "202401011234");
    }
}
