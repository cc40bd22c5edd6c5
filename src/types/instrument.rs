use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Known quote currencies, longest first so suffix matching prefers
    /// e.g. USDT over USD for "BTCUSDT".
    static ref QUOTE_CURRENCIES: Vec<&'static str> =
        vec!["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH", "BNB"];
}

/// A tradable pair identity with a stable integer id.
///
/// Unique by (symbol, exchange); created lazily the first time a tick for
/// the pair is observed and cached in-process for the life of the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub base_currency: String,
    pub quote_currency: String,
}

impl Instrument {
    pub fn new(id: i64, symbol: &str, exchange: &str) -> Self {
        let (base, quote) = split_symbol(symbol);
        Instrument {
            id,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            base_currency: base,
            quote_currency: quote,
        }
    }
}

/// Split an upper-cased symbol into (base, quote).
///
/// Longest-suffix match against the known quote list; symbols of length
/// >= 6 with no known quote fall back to a mid split.
pub fn split_symbol(symbol: &str) -> (String, String) {
    for quote in QUOTE_CURRENCIES.iter() {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            let base = &symbol[..symbol.len() - quote.len()];
            return (base.to_string(), quote.to_string());
        }
    }
    if symbol.len() >= 6 {
        let mid = symbol.len() / 2;
        return (symbol[..mid].to_string(), symbol[mid..].to_string());
    }
    (symbol.to_string(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prefers_longest_quote_suffix() {
        assert_eq!(
            split_symbol("BTCUSDT"),
            ("BTC".to_string(), "USDT".to_string())
        );
        // USD must not win over USDC.
        assert_eq!(
            split_symbol("ETHUSDC"),
            ("ETH".to_string(), "USDC".to_string())
        );
    }

    #[test]
    fn split_known_crypto_quotes() {
        assert_eq!(split_symbol("ETHBTC"), ("ETH".to_string(), "BTC".to_string()));
        assert_eq!(split_symbol("ADABNB"), ("ADA".to_string(), "BNB".to_string()));
    }

    #[test]
    fn split_falls_back_to_mid_split() {
        assert_eq!(
            split_symbol("ABCXYZ"),
            ("ABC".to_string(), "XYZ".to_string())
        );
        assert_eq!(
            split_symbol("ABCDXYZ"),
            ("ABC".to_string(), "DXYZ".to_string())
        );
    }

    #[test]
    fn short_unknown_symbol_has_empty_quote() {
        assert_eq!(split_symbol("ABC"), ("ABC".to_string(), String::new()));
    }

    #[test]
    fn instrument_derives_currencies() {
        let inst = Instrument::new(1, "BTCUSDT", "binance");
        assert_eq!(inst.base_currency, "BTC");
        assert_eq!(inst.quote_currency, "USDT");
    }
}
