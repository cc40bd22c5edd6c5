use std::collections::HashSet;

use crate::config::ExchangeConfig;
use crate::types::tick::NormalizedTick;

/// Allow-list over (exchange, symbol), built once at startup from the
/// per-exchange configuration. Comparison is against the normalized
/// (upper-cased) symbol.
pub struct SymbolFilter {
    allowed: HashSet<(String, String)>,
}

impl SymbolFilter {
    pub fn from_config(exchanges: &[ExchangeConfig]) -> Self {
        let mut allowed = HashSet::new();
        for ex in exchanges {
            for symbol in &ex.symbols {
                allowed.insert((ex.exchange.to_lowercase(), symbol.to_uppercase()));
            }
        }
        SymbolFilter { allowed }
    }

    pub fn is_allowed(&self, tick: &NormalizedTick) -> bool {
        self.allowed
            .contains(&(tick.exchange.to_lowercase(), tick.symbol.clone()))
    }
}
