use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::tick::NormalizedTick;

/// Seconds a dedup bucket lives after its first insert. Duplicates across
/// streaming and polling arrive within seconds; a 60s TTL on minute buckets
/// yields 60-120s of coverage while auto-expiring.
pub const DEDUP_BUCKET_TTL_SECS: u64 = 60;

/// Set-membership backend for dedup buckets.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Add `member` to the bucket's set, returning true iff it was newly
    /// added. The bucket's TTL is assigned only on its first insert.
    async fn add_if_absent(&self, bucket: &str, member: &str) -> Result<bool>;
}

/// Answers "have we seen this trade before" using the canonical dedup key,
/// sharded by the tick's UTC minute bucket.
pub struct TickDeduplicator {
    store: Arc<dyn DedupStore>,
}

impl TickDeduplicator {
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        TickDeduplicator { store }
    }

    pub async fn is_unique(&self, tick: &NormalizedTick) -> Result<bool> {
        let bucket = format!("dedup:{}", tick.minute_bucket());
        self.store.add_if_absent(&bucket, &tick.dedup_key()).await
    }
}

/// Redis-backed store; the SADD reply is authoritative for uniqueness.
pub struct RedisDedupStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisDedupStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(RedisDedupStore { conn })
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn add_if_absent(&self, bucket: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("SADD")
            .arg(bucket)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        if added == 1 {
            // NX: assign the TTL only when the set has none, i.e. on the
            // bucket's first insert.
            let _: i64 = redis::cmd("EXPIRE")
                .arg(bucket)
                .arg(DEDUP_BUCKET_TTL_SECS)
                .arg("NX")
                .query_async(&mut conn)
                .await?;
        }
        Ok(added == 1)
    }
}

/// Process-local store with the same bucket + TTL semantics, used by tests
/// and by deployments without a Redis endpoint.
pub struct InMemoryDedupStore {
    ttl: Duration,
    buckets: Mutex<HashMap<String, (Instant, HashSet<String>)>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEDUP_BUCKET_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        InMemoryDedupStore {
            ttl,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDedupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn add_if_absent(&self, bucket: &str, member: &str) -> Result<bool> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.retain(|_, (deadline, _)| *deadline > now);

        let (_, members) = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| (now + self.ttl, HashSet::new()));
        Ok(members.insert(member.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tick::{RawTick, SourceType};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn tick(source_type: SourceType, symbol: &str, minute: u32) -> NormalizedTick {
        RawTick {
            exchange: "binance".to_string(),
            source_type,
            symbol: symbol.to_string(),
            price: Decimal::from(50000),
            volume: "1.5".parse().unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap(),
            received_at: Utc::now(),
        }
        .normalize()
    }

    #[tokio::test]
    async fn first_sighting_is_unique_second_is_not() {
        let dedup = TickDeduplicator::new(Arc::new(InMemoryDedupStore::new()));

        let a = tick(SourceType::Streaming, "btcusdt", 0);
        assert!(dedup.is_unique(&a).await.unwrap());
        assert!(!dedup.is_unique(&a).await.unwrap());
    }

    #[tokio::test]
    async fn streaming_and_polled_copies_collapse() {
        let dedup = TickDeduplicator::new(Arc::new(InMemoryDedupStore::new()));

        let streamed = tick(SourceType::Streaming, "btcusdt", 0);
        let polled = tick(SourceType::Polled, "BTCUSDT", 0);

        assert!(dedup.is_unique(&streamed).await.unwrap());
        assert!(!dedup.is_unique(&polled).await.unwrap());
    }

    #[tokio::test]
    async fn different_minute_buckets_are_independent() {
        let dedup = TickDeduplicator::new(Arc::new(InMemoryDedupStore::new()));

        assert!(dedup.is_unique(&tick(SourceType::Streaming, "btcusdt", 0)).await.unwrap());
        assert!(dedup.is_unique(&tick(SourceType::Streaming, "btcusdt", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn bucket_expires_after_ttl() {
        let store = Arc::new(InMemoryDedupStore::with_ttl(Duration::from_millis(20)));
        let dedup = TickDeduplicator::new(store);

        let t = tick(SourceType::Streaming, "btcusdt", 0);
        assert!(dedup.is_unique(&t).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(dedup.is_unique(&t).await.unwrap());
    }
}
