use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::storage::InstrumentRepository;
use crate::types::instrument::Instrument;

/// Process-wide instrument cache keyed by (symbol, exchange).
///
/// Instrument identity is stable, so entries are never evicted; writes are
/// idempotent add-if-missing. Only the first sighting of a pair pays the
/// repository round-trip.
pub struct InstrumentCache {
    repo: Arc<dyn InstrumentRepository>,
    cache: DashMap<(String, String), Arc<Instrument>>,
}

impl InstrumentCache {
    pub fn new(repo: Arc<dyn InstrumentRepository>) -> Self {
        InstrumentCache {
            repo,
            cache: DashMap::new(),
        }
    }

    pub async fn get_or_create(&self, symbol: &str, exchange: &str) -> Result<Arc<Instrument>> {
        let key = (symbol.to_string(), exchange.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let created = Arc::new(self.repo.get_or_create(symbol, exchange).await?);
        Ok(Arc::clone(self.cache.entry(key).or_insert(created).value()))
    }

    /// Cache-only lookup; returns None for pairs no tick has touched yet.
    pub fn get(&self, symbol: &str, exchange: &str) -> Option<Arc<Instrument>> {
        self.cache
            .get(&(symbol.to_string(), exchange.to_string()))
            .map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryInstrumentRepository;

    #[tokio::test]
    async fn caches_after_first_lookup() {
        let cache = InstrumentCache::new(Arc::new(InMemoryInstrumentRepository::new()));

        assert!(cache.get("BTCUSDT", "binance").is_none());
        let created = cache.get_or_create("BTCUSDT", "binance").await.unwrap();
        let cached = cache.get("BTCUSDT", "binance").unwrap();
        assert_eq!(created.id, cached.id);
    }
}
