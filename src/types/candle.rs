use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Supported candle intervals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    OneHour,
}

impl CandleInterval {
    pub fn all() -> &'static [CandleInterval] {
        &[
            CandleInterval::OneMinute,
            CandleInterval::FiveMinutes,
            CandleInterval::OneHour,
        ]
    }

    pub fn duration(&self) -> Duration {
        match self {
            CandleInterval::OneMinute => Duration::minutes(1),
            CandleInterval::FiveMinutes => Duration::minutes(5),
            CandleInterval::OneHour => Duration::hours(1),
        }
    }

    /// Canonical short form used on the wire and in persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::OneHour => "1h",
        }
    }

    /// Floor a timestamp to this interval's boundary.
    pub fn open_time_for(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.duration().num_seconds();
        let secs = ts.timestamp();
        let aligned = secs - secs.rem_euclid(step);
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map key for a live candle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub instrument_id: i64,
    pub interval: CandleInterval,
    pub open_time: DateTime<Utc>,
}

/// A single OHLCV candle under accumulation or ready for upsert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_id: i64,
    pub interval: CandleInterval,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trades_count: u64,
}

impl Candle {
    /// An empty candle for the given slot; OHLC fields start at the zero
    /// sentinel until the first tick is applied.
    pub fn new(instrument_id: i64, interval: CandleInterval, open_time: DateTime<Utc>) -> Self {
        Candle {
            instrument_id,
            interval,
            open_time,
            close_time: open_time + interval.duration(),
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: Decimal::ZERO,
            trades_count: 0,
        }
    }

    /// Fold one trade into the candle. Callers must serialize invocations
    /// per candle key.
    pub fn apply_tick(&mut self, price: Decimal, volume: Decimal) {
        if self.trades_count == 0 {
            self.open = price;
        }
        if price > self.high {
            self.high = price;
        }
        if self.low.is_zero() || price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += volume;
        self.trades_count += 1;
    }

    pub fn key(&self) -> CandleKey {
        CandleKey {
            instrument_id: self.instrument_id,
            interval: self.interval,
            open_time: self.open_time,
        }
    }
}
